use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flags::flag_matching_utils::BucketRange;
use crate::flags::flag_models::{Filter, Namespace, ParentCondition, VariationMeta};
use crate::properties::property_models::Condition;

fn default_active() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// An experiment, either declared inline by the caller or derived from an experiment rule.
///
/// Serializes compactly: unset options, `active: true` and
/// `disableStickyBucketing: false` are omitted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub key: String,
    #[serde(default)]
    pub variations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default = "default_active", skip_serializing_if = "is_true")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<BucketRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<i64>,
    #[serde(default, alias = "hash_attribute", skip_serializing_if = "Option::is_none")]
    pub hash_attribute: Option<String>,
    #[serde(default, alias = "hash_version", skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<VariationMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, alias = "fallback_attribute", skip_serializing_if = "Option::is_none")]
    pub fallback_attribute: Option<String>,
    #[serde(
        default,
        alias = "disable_sticky_bucketing",
        skip_serializing_if = "is_false"
    )]
    pub disable_sticky_bucketing: bool,
    #[serde(default, alias = "bucket_version", skip_serializing_if = "Option::is_none")]
    pub bucket_version: Option<u32>,
    #[serde(
        default,
        alias = "min_bucket_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_bucket_version: Option<u32>,
    #[serde(
        default,
        alias = "parent_conditions",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_conditions: Option<Vec<ParentCondition>>,
}

impl Experiment {
    pub fn new(key: impl Into<String>, variations: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            variations,
            weights: None,
            active: true,
            coverage: None,
            ranges: None,
            condition: None,
            namespace: None,
            force: None,
            hash_attribute: None,
            hash_version: None,
            meta: None,
            filters: None,
            seed: None,
            name: None,
            phase: None,
            fallback_attribute: None,
            disable_sticky_bucketing: false,
            bucket_version: None,
            min_bucket_version: None,
            parent_conditions: None,
        }
    }

    pub fn variation_meta(&self, index: usize) -> Option<&VariationMeta> {
        self.meta.as_ref().and_then(|meta| meta.get(index))
    }
}
