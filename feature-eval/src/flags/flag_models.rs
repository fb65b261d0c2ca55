use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::errors::FlagError;
use crate::flags::experiment::Experiment;
use crate::flags::flag_matching_utils::BucketRange;
use crate::properties::property_models::Condition;
use crate::utils::decryption::decrypt_payload;

pub const DEFAULT_HASH_ATTRIBUTE: &str = "id";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<bool>,
}

/// Hash-based traffic slice. A user is filtered out when their hash lands in none of `ranges`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default)]
    pub seed: String,
    #[serde(default, alias = "hash_version", skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<u32>,
    #[serde(default)]
    pub ranges: Vec<BucketRange>,
}

/// Legacy namespace, serialized as `[id, start, end]`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Namespace(pub String, pub f64, pub f64);

impl Namespace {
    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn start(&self) -> f64 {
        self.1
    }

    pub fn end(&self) -> f64 {
        self.2
    }
}

/// Prerequisite on another feature. `condition` is evaluated against `{"value": <resolved value>}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParentCondition {
    pub id: String,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub gate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(default, alias = "default_value")]
    pub default_value: Value,
    #[serde(default)]
    pub rules: Vec<FeatureRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRule {
    pub key: Option<String>,
    pub variations: Vec<Value>,
    pub weights: Option<Vec<f64>>,
    pub namespace: Option<Namespace>,
    pub ranges: Option<Vec<BucketRange>>,
    pub meta: Option<Vec<VariationMeta>>,
    pub name: Option<String>,
    pub phase: Option<String>,
    pub disable_sticky_bucketing: bool,
    pub bucket_version: Option<u32>,
    pub min_bucket_version: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Fixed value, optionally behind a `coverage` or `range` rollout gate.
    Force {
        value: Value,
        range: Option<BucketRange>,
    },
    Experiment(Box<ExperimentRule>),
    /// Neither `force` nor `variations`; never matches.
    Inert,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "FeatureRuleDefinition")]
pub struct FeatureRule {
    pub id: Option<String>,
    pub condition: Option<Condition>,
    pub parent_conditions: Option<Vec<ParentCondition>>,
    pub filters: Option<Vec<Filter>>,
    pub seed: Option<String>,
    pub hash_attribute: Option<String>,
    pub fallback_attribute: Option<String>,
    pub hash_version: Option<u32>,
    pub coverage: Option<f64>,
    pub kind: RuleKind,
}

/// Wire shape of a rule, before the force/experiment split.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeatureRuleDefinition {
    id: Option<String>,
    condition: Option<Condition>,
    #[serde(alias = "parent_conditions")]
    parent_conditions: Option<Vec<ParentCondition>>,
    filters: Option<Vec<Filter>>,
    seed: Option<String>,
    #[serde(alias = "hash_attribute")]
    hash_attribute: Option<String>,
    #[serde(alias = "fallback_attribute")]
    fallback_attribute: Option<String>,
    #[serde(alias = "hash_version")]
    hash_version: Option<u32>,
    coverage: Option<f64>,
    range: Option<BucketRange>,
    force: Option<Value>,
    variations: Option<Vec<Value>>,
    key: Option<String>,
    weights: Option<Vec<f64>>,
    namespace: Option<Namespace>,
    ranges: Option<Vec<BucketRange>>,
    meta: Option<Vec<VariationMeta>>,
    name: Option<String>,
    phase: Option<String>,
    #[serde(default, alias = "disable_sticky_bucketing")]
    disable_sticky_bucketing: bool,
    #[serde(alias = "bucket_version")]
    bucket_version: Option<u32>,
    #[serde(alias = "min_bucket_version")]
    min_bucket_version: Option<u32>,
}

impl From<FeatureRuleDefinition> for FeatureRule {
    fn from(def: FeatureRuleDefinition) -> Self {
        let kind = match (def.variations, def.force) {
            (Some(variations), _) => RuleKind::Experiment(Box::new(ExperimentRule {
                key: def.key,
                variations,
                weights: def.weights,
                namespace: def.namespace,
                ranges: def.ranges,
                meta: def.meta,
                name: def.name,
                phase: def.phase,
                disable_sticky_bucketing: def.disable_sticky_bucketing,
                bucket_version: def.bucket_version,
                min_bucket_version: def.min_bucket_version,
            })),
            (None, Some(value)) => RuleKind::Force {
                value,
                range: def.range,
            },
            (None, None) => RuleKind::Inert,
        };

        FeatureRule {
            id: def.id,
            condition: def.condition,
            parent_conditions: def.parent_conditions,
            filters: def.filters,
            seed: def.seed,
            hash_attribute: def.hash_attribute,
            fallback_attribute: def.fallback_attribute,
            hash_version: def.hash_version,
            coverage: def.coverage,
            kind,
        }
    }
}

impl FeatureRule {
    pub fn is_experiment(&self) -> bool {
        matches!(self.kind, RuleKind::Experiment(_))
    }

    /// Builds the experiment an experiment rule runs. The key defaults to the feature key.
    pub fn to_experiment(&self, feature_key: &str) -> Option<Experiment> {
        let RuleKind::Experiment(rule) = &self.kind else {
            return None;
        };

        Some(Experiment {
            key: rule.key.clone().unwrap_or_else(|| feature_key.to_string()),
            variations: rule.variations.clone(),
            weights: rule.weights.clone(),
            coverage: self.coverage,
            ranges: rule.ranges.clone(),
            condition: self.condition.clone(),
            namespace: rule.namespace.clone(),
            hash_attribute: self.hash_attribute.clone(),
            hash_version: self.hash_version,
            meta: rule.meta.clone(),
            filters: self.filters.clone(),
            seed: self.seed.clone(),
            name: rule.name.clone(),
            phase: rule.phase.clone(),
            fallback_attribute: self.fallback_attribute.clone(),
            disable_sticky_bucketing: rule.disable_sticky_bucketing,
            bucket_version: rule.bucket_version,
            min_bucket_version: rule.min_bucket_version,
            parent_conditions: self.parent_conditions.clone(),
            active: true,
            force: None,
        })
    }
}

/// Parses a `{key: definition}` map. A definition that fails to parse is skipped with a
/// warning so one bad feature cannot take down the rest.
pub fn parse_feature_definitions(definitions: &Value) -> HashMap<String, Feature> {
    let Some(definitions) = definitions.as_object() else {
        if !definitions.is_null() {
            tracing::warn!("Feature definitions must be an object, ignoring them");
        }
        return HashMap::new();
    };

    definitions
        .iter()
        .filter_map(
            |(key, definition)| match serde_json::from_value::<Feature>(definition.clone()) {
                Ok(feature) => Some((key.clone(), feature)),
                Err(e) => {
                    tracing::warn!("Skipping unparseable feature '{}': {}", key, e);
                    None
                }
            },
        )
        .collect()
}

/// Decrypts an `encryptedFeatures` payload and parses the feature map it holds.
pub fn decrypt_feature_definitions(
    payload: &str,
    key: &str,
) -> Result<HashMap<String, Feature>, FlagError> {
    let decrypted = decrypt_payload(payload, key)?;
    let definitions: Value = serde_json::from_str(&decrypted)
        .map_err(|e| FlagError::FeatureParseError(format!("decrypted features: {e}")))?;
    Ok(parse_feature_definitions(&definitions))
}
