// Feature evaluation counters
pub const FEATURE_EVALUATIONS_COUNTER: &str = "feature_eval_feature_evaluations_total";
pub const EXPERIMENT_EXPOSURES_COUNTER: &str = "feature_eval_experiment_exposures_total";

// Sticky bucketing
pub const STICKY_BUCKET_SAVES_COUNTER: &str = "feature_eval_sticky_bucket_saves_total";

// Recovered boundary errors (decryption, sticky bucket store, repository)
pub const EVALUATION_ERRORS_COUNTER: &str = "feature_eval_errors_total";
