use crate::api::errors::FlagError;
use crate::metrics::consts::EVALUATION_ERRORS_COUNTER;

pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

/// Counts an error that was recovered from instead of surfaced to the caller.
pub fn inc_recovered_error(err: &FlagError) {
    inc(
        EVALUATION_ERRORS_COUNTER,
        &[("error".to_string(), err.error_code().to_string())],
        1,
    );
}
