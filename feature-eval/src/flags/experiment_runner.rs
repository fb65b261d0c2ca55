use std::collections::HashSet;

use serde_json::Value;

use crate::api::types::ExperimentResult;
use crate::flags::experiment::Experiment;
use crate::flags::flag_matching::{EvaluationContext, PrerequisiteOutcome};
use crate::flags::flag_matching_utils::{
    calculate_hash, choose_variation, get_bucket_ranges, get_query_string_override, in_namespace,
    BucketRange,
};
use crate::metrics::consts::EXPERIMENT_EXPOSURES_COUNTER;
use crate::metrics::utils::inc;

impl EvaluationContext {
    /// Runs an inline experiment.
    pub fn run(&mut self, experiment: &Experiment) -> ExperimentResult {
        let mut stack = HashSet::new();
        self.run_experiment(experiment, None, &mut stack)
    }

    /// Assigns a variation, returning an excluded result at the first check that fails.
    /// `stack` is the prerequisite call path of the feature that owns the experiment.
    pub(crate) fn run_experiment(
        &mut self,
        experiment: &Experiment,
        feature_id: Option<&str>,
        stack: &mut HashSet<String>,
    ) -> ExperimentResult {
        let num_variations = experiment.variations.len();
        if num_variations < 2 || !self.enabled {
            return self.excluded_result(experiment, feature_id);
        }

        if let Some(url) = &self.url {
            if let Some(index) = get_query_string_override(&experiment.key, url, num_variations) {
                return self.get_experiment_result(
                    experiment,
                    Some(index),
                    false,
                    feature_id,
                    None,
                    false,
                );
            }
        }

        if let Some(&forced) = self.forced_variations.get(&experiment.key) {
            return self.get_experiment_result(
                experiment,
                usize::try_from(forced).ok(),
                false,
                feature_id,
                None,
                false,
            );
        }

        if !experiment.active {
            return self.excluded_result(experiment, feature_id);
        }

        let (hash_attribute, hash_value) = self.get_hash_attribute(
            experiment.hash_attribute.as_deref(),
            experiment.fallback_attribute.as_deref(),
        );
        if hash_value.is_empty() {
            return self.excluded_result(experiment, feature_id);
        }

        let sticky_bucketing_enabled =
            self.sticky_bucket_service.is_some() && !experiment.disable_sticky_bucketing;
        let mut sticky_variation = None;
        if sticky_bucketing_enabled {
            let lookup = self.get_sticky_bucket_variation(experiment);
            if lookup.version_is_blocked {
                return self.get_experiment_result(experiment, None, false, feature_id, None, true);
            }
            sticky_variation = lookup.variation;
        }

        // A sticky assignment bypasses targeting
        if sticky_variation.is_none() {
            if let Some(filters) = &experiment.filters {
                if self.is_filtered_out(filters) {
                    return self.excluded_result(experiment, feature_id);
                }
            } else if let Some(namespace) = &experiment.namespace {
                if !in_namespace(&hash_value, namespace) {
                    return self.excluded_result(experiment, feature_id);
                }
            }

            if let Some(condition) = &experiment.condition {
                if !self.condition_passes(condition) {
                    return self.excluded_result(experiment, feature_id);
                }
            }

            if let Some(parents) = &experiment.parent_conditions {
                if self.eval_prerequisites(parents, stack) != PrerequisiteOutcome::Pass {
                    return self.excluded_result(experiment, feature_id);
                }
            }
        }

        let seed = experiment.seed.as_deref().unwrap_or(&experiment.key);
        let Some(n) = calculate_hash(seed, &hash_value, experiment.hash_version.unwrap_or(1))
        else {
            return self.excluded_result(experiment, feature_id);
        };

        let assigned = match sticky_variation {
            Some(variation) => Some(variation),
            None => {
                let derived: Vec<BucketRange>;
                // Explicit ranges need one entry per variation
                let ranges = match &experiment.ranges {
                    Some(ranges) if ranges.len() == num_variations => ranges.as_slice(),
                    _ => {
                        derived = get_bucket_ranges(
                            num_variations,
                            experiment.coverage,
                            experiment.weights.as_deref(),
                        );
                        derived.as_slice()
                    }
                };
                choose_variation(n, ranges)
            }
        };
        let Some(assigned) = assigned.filter(|&index| index < num_variations) else {
            return self.excluded_result(experiment, feature_id);
        };

        if let Some(forced) = experiment.force {
            return self.get_experiment_result(
                experiment,
                usize::try_from(forced).ok(),
                false,
                feature_id,
                None,
                false,
            );
        }

        if self.qa_mode {
            return self.excluded_result(experiment, feature_id);
        }

        let result = self.get_experiment_result(
            experiment,
            Some(assigned),
            true,
            feature_id,
            Some(n),
            sticky_variation.is_some(),
        );

        if sticky_bucketing_enabled {
            self.persist_sticky_bucket_assignment(
                experiment,
                &hash_attribute,
                &hash_value,
                &result.key,
            );
        }

        self.track_experiment(experiment, &result);
        result
    }

    fn excluded_result(&self, experiment: &Experiment, feature_id: Option<&str>) -> ExperimentResult {
        self.get_experiment_result(experiment, None, false, feature_id, None, false)
    }

    /// Builds a result for `variation`. A missing or out-of-range index yields an excluded
    /// result reporting variation 0.
    pub(crate) fn get_experiment_result(
        &self,
        experiment: &Experiment,
        variation: Option<usize>,
        hash_used: bool,
        feature_id: Option<&str>,
        bucket: Option<f64>,
        sticky_bucket_used: bool,
    ) -> ExperimentResult {
        let (variation_id, in_experiment) = match variation {
            Some(index) if index < experiment.variations.len() => (index, true),
            _ => (0, false),
        };

        let (hash_attribute, hash_value) = self.get_hash_attribute(
            experiment.hash_attribute.as_deref(),
            experiment.fallback_attribute.as_deref(),
        );
        let meta = experiment.variation_meta(variation_id);

        ExperimentResult {
            in_experiment,
            variation_id,
            value: experiment
                .variations
                .get(variation_id)
                .cloned()
                .unwrap_or(Value::Null),
            hash_used,
            hash_attribute,
            hash_value,
            feature_id: feature_id.map(str::to_string),
            key: meta
                .and_then(|meta| meta.key.clone())
                .unwrap_or_else(|| variation_id.to_string()),
            bucket,
            name: meta.and_then(|meta| meta.name.clone()),
            passthrough: meta.and_then(|meta| meta.passthrough).unwrap_or(false),
            sticky_bucket_used,
        }
    }

    fn track_experiment(&mut self, experiment: &Experiment, result: &ExperimentResult) {
        if let Some(callback) = &self.tracking_callback {
            callback.on_experiment_viewed(experiment, result);
        }
        self.impressions
            .insert(experiment.key.clone(), result.clone());
        inc(EXPERIMENT_EXPOSURES_COUNTER, &[], 1);
    }
}
