use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, EnumString};

use crate::flags::experiment::Experiment;
use crate::properties::property_matching::is_truthy;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Where a resolved feature value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, EnumString, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FeatureResultSource {
    UnknownFeature,
    DefaultValue,
    Force,
    Experiment,
    Override,
    CyclicPrerequisite,
    Prerequisite,
}

impl std::fmt::Display for FeatureResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Outcome of running one experiment for the current attributes.
///
/// `variation_id` is clamped to a valid index even when the user is excluded, so callers
/// must check `in_experiment` rather than the index.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResult {
    pub in_experiment: bool,
    pub variation_id: usize,
    pub value: Value,
    pub hash_used: bool,
    pub hash_attribute: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub passthrough: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sticky_bucket_used: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResult {
    pub value: Value,
    pub on: bool,
    pub off: bool,
    pub source: FeatureResultSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<Experiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_result: Option<ExperimentResult>,
}

impl FeatureResult {
    pub fn new(
        value: Value,
        source: FeatureResultSource,
        experiment: Option<Experiment>,
        experiment_result: Option<ExperimentResult>,
    ) -> Self {
        let on = is_truthy(&value);
        Self {
            value,
            on,
            off: !on,
            source,
            experiment,
            experiment_result,
        }
    }
}
