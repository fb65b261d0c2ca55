use thiserror::Error;

use crate::utils::decryption::DecryptionError;

/// Errors raised at the boundaries of the evaluation engine.
///
/// Evaluation itself never returns these: the context logs them and falls back to a
/// safe default. They are only surfaced by the strict repository fetch and by store
/// implementations.
#[derive(Error, Debug)]
pub enum FlagError {
    #[error("failed to fetch feature definitions: {0}")]
    FeatureFetchError(String),
    #[error("failed to parse feature definitions: {0}")]
    FeatureParseError(String),
    #[error(transparent)]
    DecryptionError(#[from] DecryptionError),
    #[error("sticky bucket store error: {0}")]
    StickyBucketStoreError(String),
}

impl FlagError {
    /// Returns a short error code for logs and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            FlagError::FeatureFetchError(_) => "feature_fetch_error",
            FlagError::FeatureParseError(_) => "feature_parse_error",
            FlagError::DecryptionError(_) => "decryption_error",
            FlagError::StickyBucketStoreError(_) => "sticky_bucket_store_error",
        }
    }

    /// Fetch errors may succeed on a later attempt, parse errors will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlagError::FeatureFetchError(_))
    }
}

impl From<reqwest::Error> for FlagError {
    fn from(e: reqwest::Error) -> Self {
        FlagError::FeatureFetchError(e.to_string())
    }
}
