use crate::api::types::{ExperimentResult, FeatureResult};
use crate::flags::experiment::Experiment;

/// Notified once per in-experiment exposure.
pub trait TrackingCallback: Send + Sync {
    fn on_experiment_viewed(&self, experiment: &Experiment, result: &ExperimentResult);
}

/// Notified for every resolved feature except forced overrides.
pub trait FeatureUsageCallback: Send + Sync {
    fn on_feature_usage(&self, key: &str, result: &FeatureResult);
}
