#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::Value;

use feature_eval::api::types::{ExperimentResult, FeatureResult};
use feature_eval::flags::callbacks::{FeatureUsageCallback, TrackingCallback};
use feature_eval::flags::experiment::Experiment;
use feature_eval::flags::flag_matching::{ContextOptions, EvaluationContext};
use feature_eval::flags::flag_models::parse_feature_definitions;
use feature_eval::flags::sticky_bucketing::StickyBucketService;

pub const ENCRYPTED_FEATURES: &str =
    "m5ylFM6ndyOJA2OPadubkw==.Uu7ViqgKEt/dWvCyhI46q088PkAEJbnXKf3KPZjf9IEQQ+A8fojNoxw4wIbPX3aj";
pub const DECRYPTION_KEY: &str = "Zvwv/+uhpFDznZ6SX28Yjg==";

#[derive(Default)]
pub struct UsageRecorder {
    calls: Mutex<Vec<(String, Value)>>,
}

impl UsageRecorder {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FeatureUsageCallback for UsageRecorder {
    fn on_feature_usage(&self, key: &str, result: &FeatureResult) {
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), result.value.clone()));
    }
}

#[derive(Default)]
pub struct ExposureRecorder {
    calls: Mutex<Vec<(String, ExperimentResult)>>,
}

impl ExposureRecorder {
    pub fn calls(&self) -> Vec<(String, ExperimentResult)> {
        self.calls.lock().unwrap().clone()
    }
}

impl TrackingCallback for ExposureRecorder {
    fn on_experiment_viewed(&self, experiment: &Experiment, result: &ExperimentResult) {
        self.calls
            .lock()
            .unwrap()
            .push((experiment.key.clone(), result.clone()));
    }
}

pub fn context(features: Value, attributes: Value) -> EvaluationContext {
    EvaluationContext::new(ContextOptions {
        attributes,
        features: parse_feature_definitions(&features),
        ..ContextOptions::default()
    })
}

pub fn sticky_context(
    service: Arc<dyn StickyBucketService>,
    features: &Value,
    attributes: Value,
) -> EvaluationContext {
    EvaluationContext::new(ContextOptions {
        attributes,
        features: parse_feature_definitions(features),
        sticky_bucket_service: Some(service),
        ..ContextOptions::default()
    })
}
