use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{instrument, warn};

use crate::api::types::{ExperimentResult, FeatureResult, FeatureResultSource};
use crate::flags::callbacks::{FeatureUsageCallback, TrackingCallback};
use crate::flags::experiment::Experiment;
use crate::flags::flag_matching_utils::{calculate_hash, in_range, BucketRange};
use crate::flags::flag_models::{
    decrypt_feature_definitions, parse_feature_definitions, Feature, Filter, ParentCondition,
    RuleKind, DEFAULT_HASH_ATTRIBUTE,
};
use crate::flags::sticky_bucketing::{StickyAssignmentsDocument, StickyBucketService};
use crate::metrics::consts::FEATURE_EVALUATIONS_COUNTER;
use crate::metrics::utils::{inc, inc_recovered_error};
use crate::properties::property_matching::{eval_condition, is_truthy, to_string_representation};
use crate::properties::property_models::Condition;

/// Everything needed to build an [`EvaluationContext`].
#[derive(Clone)]
pub struct ContextOptions {
    pub enabled: bool,
    pub attributes: Value,
    pub url: Option<String>,
    pub features: HashMap<String, Feature>,
    /// `base64(iv).base64(ciphertext)`; replaces `features` when set.
    pub encrypted_features: Option<String>,
    pub decryption_key: Option<String>,
    pub forced_variations: HashMap<String, i64>,
    pub forced_features: HashMap<String, Value>,
    pub qa_mode: bool,
    pub tracking_callback: Option<Arc<dyn TrackingCallback>>,
    pub feature_usage_callback: Option<Arc<dyn FeatureUsageCallback>>,
    pub sticky_bucket_service: Option<Arc<dyn StickyBucketService>>,
    /// Derived from the bucketed rules' hash attributes when unset.
    pub sticky_bucket_identifier_attributes: Option<Vec<String>>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            attributes: Value::Object(Map::new()),
            url: None,
            features: HashMap::new(),
            encrypted_features: None,
            decryption_key: None,
            forced_variations: HashMap::new(),
            forced_features: HashMap::new(),
            qa_mode: false,
            tracking_callback: None,
            feature_usage_callback: None,
            sticky_bucket_service: None,
            sticky_bucket_identifier_attributes: None,
        }
    }
}

impl ContextOptions {
    /// Reads options from a loosely-typed map. Keys may be snake_case or camelCase;
    /// unknown keys are logged and ignored.
    pub fn from_value(options: &Value) -> Self {
        let mut parsed = Self::default();
        let Some(options) = options.as_object() else {
            warn!("Context options must be an object, using defaults");
            return parsed;
        };

        for (key, value) in options {
            match key.as_str() {
                "enabled" => parsed.enabled = is_truthy(value),
                "attributes" => parsed.attributes = normalize_attributes(value),
                "url" => parsed.url = value.as_str().map(str::to_string),
                "features" => parsed.features = parse_feature_definitions(value),
                "encrypted_features" | "encryptedFeatures" => {
                    parsed.encrypted_features = value.as_str().map(str::to_string)
                }
                "decryption_key" | "decryptionKey" => {
                    parsed.decryption_key = value.as_str().map(str::to_string)
                }
                "forced_variations" | "forcedVariations" => {
                    parsed.forced_variations = parse_forced_variations(value)
                }
                "forced_features" | "forcedFeatures" => {
                    parsed.forced_features = value
                        .as_object()
                        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_default()
                }
                "qa_mode" | "qaMode" => parsed.qa_mode = is_truthy(value),
                "sticky_bucket_identifier_attributes" | "stickyBucketIdentifierAttributes" => {
                    parsed.sticky_bucket_identifier_attributes = value.as_array().map(|attrs| {
                        attrs
                            .iter()
                            .filter_map(|attr| attr.as_str().map(str::to_string))
                            .collect()
                    })
                }
                _ => warn!("Unknown context option: {}", key),
            }
        }
        parsed
    }
}

fn normalize_attributes(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        Value::Null => Value::Object(Map::new()),
        other => {
            warn!("Attributes must be an object, got {}", other);
            Value::Object(Map::new())
        }
    }
}

fn parse_forced_variations(value: &Value) -> HashMap<String, i64> {
    let Some(forced) = value.as_object() else {
        return HashMap::new();
    };
    forced
        .iter()
        .filter_map(|(key, index)| match index.as_i64() {
            Some(index) => Some((key.clone(), index)),
            None => {
                warn!("Ignoring non-integer forced variation for '{}'", key);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrerequisiteOutcome {
    Pass,
    Fail,
    Gate,
    Cyclic,
}

/// Holds attributes, feature definitions and overrides, and resolves features and
/// experiments against them.
///
/// Evaluation takes `&mut self`: it records impressions and caches sticky bucket
/// documents. Definitions and attributes are replaced wholesale through the setters.
pub struct EvaluationContext {
    pub(crate) enabled: bool,
    pub(crate) url: Option<String>,
    pub(crate) qa_mode: bool,
    pub(crate) attributes: Value,
    pub(crate) features: Arc<HashMap<String, Feature>>,
    pub(crate) forced_variations: HashMap<String, i64>,
    pub(crate) forced_features: HashMap<String, Value>,
    pub(crate) impressions: HashMap<String, ExperimentResult>,
    pub(crate) tracking_callback: Option<Arc<dyn TrackingCallback>>,
    pub(crate) feature_usage_callback: Option<Arc<dyn FeatureUsageCallback>>,
    pub(crate) sticky_bucket_service: Option<Arc<dyn StickyBucketService>>,
    pub(crate) sticky_bucket_identifier_attributes: Option<Vec<String>>,
    pub(crate) using_derived_sticky_bucket_attributes: bool,
    pub(crate) sticky_bucket_attributes: Option<BTreeMap<String, String>>,
    pub(crate) sticky_bucket_assignment_docs: HashMap<String, StickyAssignmentsDocument>,
}

impl EvaluationContext {
    pub fn new(options: ContextOptions) -> Self {
        let features = match options.encrypted_features.as_deref() {
            Some(payload) => {
                let key = options.decryption_key.as_deref().unwrap_or_default();
                match decrypt_feature_definitions(payload, key) {
                    Ok(features) => features,
                    Err(e) => {
                        warn!("Failed to decrypt features, continuing without any: {}", e);
                        inc_recovered_error(&e);
                        HashMap::new()
                    }
                }
            }
            None => options.features,
        };

        let mut context = Self {
            enabled: options.enabled,
            url: options.url,
            qa_mode: options.qa_mode,
            attributes: normalize_attributes(&options.attributes),
            features: Arc::new(features),
            forced_variations: options.forced_variations,
            forced_features: options.forced_features,
            impressions: HashMap::new(),
            tracking_callback: options.tracking_callback,
            feature_usage_callback: options.feature_usage_callback,
            sticky_bucket_service: options.sticky_bucket_service,
            using_derived_sticky_bucket_attributes: options
                .sticky_bucket_identifier_attributes
                .is_none(),
            sticky_bucket_identifier_attributes: options.sticky_bucket_identifier_attributes,
            sticky_bucket_attributes: None,
            sticky_bucket_assignment_docs: HashMap::new(),
        };
        context.refresh_sticky_buckets(false);
        context
    }

    pub fn from_value(options: &Value) -> Self {
        Self::new(ContextOptions::from_value(options))
    }

    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    pub fn features(&self) -> &HashMap<String, Feature> {
        &self.features
    }

    pub fn impressions(&self) -> &HashMap<String, ExperimentResult> {
        &self.impressions
    }

    pub fn set_attributes(&mut self, attributes: Value) {
        self.attributes = normalize_attributes(&attributes);
        self.refresh_sticky_buckets(false);
    }

    pub fn set_features(&mut self, features: HashMap<String, Feature>) {
        self.features = Arc::new(features);
        self.refresh_sticky_buckets(false);
    }

    pub fn set_features_from_value(&mut self, definitions: &Value) {
        self.set_features(parse_feature_definitions(definitions));
    }

    pub fn set_forced_variations(&mut self, forced_variations: HashMap<String, i64>) {
        self.forced_variations = forced_variations;
    }

    pub fn set_forced_features(&mut self, forced_features: HashMap<String, Value>) {
        self.forced_features = forced_features;
    }

    pub fn set_url(&mut self, url: Option<String>) {
        self.url = url;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_qa_mode(&mut self, qa_mode: bool) {
        self.qa_mode = qa_mode;
    }

    #[instrument(skip_all, fields(feature_key = %key))]
    pub fn eval_feature(&mut self, key: &str) -> FeatureResult {
        let mut stack = HashSet::new();
        self.eval_feature_with_stack(key, &mut stack)
    }

    pub fn is_on(&mut self, key: &str) -> bool {
        self.eval_feature(key).on
    }

    pub fn is_off(&mut self, key: &str) -> bool {
        self.eval_feature(key).off
    }

    /// The resolved value, or `fallback` when it resolves to null.
    pub fn get_feature_value(&mut self, key: &str, fallback: Value) -> Value {
        match self.eval_feature(key).value {
            Value::Null => fallback,
            value => value,
        }
    }

    /// `stack` holds the features currently being resolved on this call path.
    pub(crate) fn eval_feature_with_stack(
        &mut self,
        key: &str,
        stack: &mut HashSet<String>,
    ) -> FeatureResult {
        if let Some(value) = self.forced_features.get(key).cloned() {
            return self.get_feature_result(key, value, FeatureResultSource::Override, None, None);
        }

        let features = Arc::clone(&self.features);
        let Some(feature) = features.get(key) else {
            return self.get_feature_result(
                key,
                Value::Null,
                FeatureResultSource::UnknownFeature,
                None,
                None,
            );
        };

        if stack.contains(key) {
            warn!("Cyclic prerequisite detected for feature '{}'", key);
            return self.get_feature_result(
                key,
                Value::Null,
                FeatureResultSource::CyclicPrerequisite,
                None,
                None,
            );
        }

        stack.insert(key.to_string());
        let result = self.eval_rules(key, feature, stack);
        stack.remove(key);
        result
    }

    fn eval_rules(
        &mut self,
        key: &str,
        feature: &Feature,
        stack: &mut HashSet<String>,
    ) -> FeatureResult {
        for rule in &feature.rules {
            if let Some(parents) = rule.parent_conditions.as_deref() {
                match self.eval_prerequisites(parents, stack) {
                    PrerequisiteOutcome::Pass => {}
                    PrerequisiteOutcome::Fail => continue,
                    PrerequisiteOutcome::Gate => {
                        return self.get_feature_result(
                            key,
                            Value::Null,
                            FeatureResultSource::Prerequisite,
                            None,
                            None,
                        );
                    }
                    PrerequisiteOutcome::Cyclic => {
                        return self.get_feature_result(
                            key,
                            Value::Null,
                            FeatureResultSource::CyclicPrerequisite,
                            None,
                            None,
                        );
                    }
                }
            }

            if rule
                .condition
                .as_ref()
                .is_some_and(|condition| !self.condition_passes(condition))
            {
                continue;
            }

            if rule
                .filters
                .as_deref()
                .is_some_and(|filters| self.is_filtered_out(filters))
            {
                continue;
            }

            match &rule.kind {
                RuleKind::Force { value, range } => {
                    let seed = rule.seed.as_deref().unwrap_or(key);
                    if !self.included_in_rollout(
                        seed,
                        rule.hash_attribute.as_deref(),
                        rule.fallback_attribute.as_deref(),
                        range.as_ref(),
                        rule.coverage,
                        rule.hash_version,
                    ) {
                        continue;
                    }
                    return self.get_feature_result(
                        key,
                        value.clone(),
                        FeatureResultSource::Force,
                        None,
                        None,
                    );
                }
                RuleKind::Experiment(_) => {
                    let Some(experiment) = rule.to_experiment(key) else {
                        continue;
                    };
                    let result = self.run_experiment(&experiment, Some(key), stack);
                    if result.in_experiment && !result.passthrough {
                        return self.get_feature_result(
                            key,
                            result.value.clone(),
                            FeatureResultSource::Experiment,
                            Some(experiment),
                            Some(result),
                        );
                    }
                }
                RuleKind::Inert => {}
            }
        }

        self.get_feature_result(
            key,
            feature.default_value.clone(),
            FeatureResultSource::DefaultValue,
            None,
            None,
        )
    }

    /// Resolves each parent feature and checks its condition against `{"value": ...}`.
    pub(crate) fn eval_prerequisites(
        &mut self,
        parents: &[ParentCondition],
        stack: &mut HashSet<String>,
    ) -> PrerequisiteOutcome {
        for parent in parents {
            let parent_result = self.eval_feature_with_stack(&parent.id, stack);
            if parent_result.source == FeatureResultSource::CyclicPrerequisite {
                return PrerequisiteOutcome::Cyclic;
            }

            let evaluated = json!({ "value": parent_result.value });
            if !eval_condition(&evaluated, &parent.condition) {
                return if parent.gate {
                    PrerequisiteOutcome::Gate
                } else {
                    PrerequisiteOutcome::Fail
                };
            }
        }
        PrerequisiteOutcome::Pass
    }

    pub(crate) fn condition_passes(&self, condition: &Condition) -> bool {
        eval_condition(&self.attributes, condition)
    }

    /// Top-level attribute as a string; missing and null attributes are empty.
    pub(crate) fn get_attribute(&self, key: &str) -> String {
        self.attributes
            .get(key)
            .map(to_string_representation)
            .unwrap_or_default()
    }

    /// Returns the attribute used for hashing and its value. The fallback attribute is only
    /// consulted when a sticky bucket store is configured and the primary value is empty.
    pub(crate) fn get_hash_attribute(
        &self,
        attribute: Option<&str>,
        fallback_attribute: Option<&str>,
    ) -> (String, String) {
        let attribute = attribute.unwrap_or(DEFAULT_HASH_ATTRIBUTE);
        let value = self.get_attribute(attribute);

        if value.is_empty() && self.sticky_bucket_service.is_some() {
            if let Some(fallback) = fallback_attribute {
                let fallback_value = self.get_attribute(fallback);
                if !fallback_value.is_empty() {
                    return (fallback.to_string(), fallback_value);
                }
            }
        }

        (attribute.to_string(), value)
    }

    fn included_in_rollout(
        &self,
        seed: &str,
        hash_attribute: Option<&str>,
        fallback_attribute: Option<&str>,
        range: Option<&BucketRange>,
        coverage: Option<f64>,
        hash_version: Option<u32>,
    ) -> bool {
        if range.is_none() && coverage.is_none() {
            return true;
        }

        let (_, hash_value) = self.get_hash_attribute(hash_attribute, fallback_attribute);
        if hash_value.is_empty() {
            return false;
        }

        let Some(n) = calculate_hash(seed, &hash_value, hash_version.unwrap_or(1)) else {
            return false;
        };

        match (range, coverage) {
            (Some(range), _) => in_range(n, range),
            (None, Some(coverage)) => n <= coverage,
            (None, None) => true,
        }
    }

    /// A user is filtered out when any filter's hash misses all of its ranges. Users without
    /// a value for the filter attribute are never filtered out by it.
    pub(crate) fn is_filtered_out(&self, filters: &[Filter]) -> bool {
        filters.iter().any(|filter| {
            let hash_value =
                self.get_attribute(filter.attribute.as_deref().unwrap_or(DEFAULT_HASH_ATTRIBUTE));
            if hash_value.is_empty() {
                return false;
            }
            match calculate_hash(&filter.seed, &hash_value, filter.hash_version.unwrap_or(2)) {
                Some(n) => !filter.ranges.iter().any(|range| in_range(n, range)),
                None => true,
            }
        })
    }

    fn get_feature_result(
        &self,
        key: &str,
        value: Value,
        source: FeatureResultSource,
        experiment: Option<Experiment>,
        experiment_result: Option<ExperimentResult>,
    ) -> FeatureResult {
        let result = FeatureResult::new(value, source, experiment, experiment_result);

        inc(
            FEATURE_EVALUATIONS_COUNTER,
            &[("source".to_string(), source.to_string())],
            1,
        );

        if source != FeatureResultSource::Override {
            if let Some(callback) = &self.feature_usage_callback {
                callback.on_feature_usage(key, &result);
            }
        }

        result
    }
}
