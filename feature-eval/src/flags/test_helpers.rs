/* Test Helpers specifically for the flags module */

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::{
    api::types::{ExperimentResult, FeatureResult},
    flags::{
        callbacks::{FeatureUsageCallback, TrackingCallback},
        experiment::Experiment,
        flag_matching::{ContextOptions, EvaluationContext},
        flag_models::{parse_feature_definitions, Feature},
    },
};

pub fn features_from(definitions: Value) -> HashMap<String, Feature> {
    parse_feature_definitions(&definitions)
}

pub fn create_test_context(features: Value, attributes: Value) -> EvaluationContext {
    EvaluationContext::new(ContextOptions {
        attributes,
        features: features_from(features),
        ..ContextOptions::default()
    })
}

#[derive(Default)]
pub struct RecordingUsageCallback {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingUsageCallback {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("lock poisoned").clone()
    }
}

impl FeatureUsageCallback for RecordingUsageCallback {
    fn on_feature_usage(&self, key: &str, result: &FeatureResult) {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push((key.to_string(), result.value.clone()));
    }
}

#[derive(Default)]
pub struct RecordingTrackingCallback {
    calls: Mutex<Vec<(String, ExperimentResult)>>,
}

impl RecordingTrackingCallback {
    pub fn calls(&self) -> Vec<(String, ExperimentResult)> {
        self.calls.lock().expect("lock poisoned").clone()
    }
}

impl TrackingCallback for RecordingTrackingCallback {
    fn on_experiment_viewed(&self, experiment: &Experiment, result: &ExperimentResult) {
        self.calls
            .lock()
            .expect("lock poisoned")
            .push((experiment.key.clone(), result.clone()));
    }
}
