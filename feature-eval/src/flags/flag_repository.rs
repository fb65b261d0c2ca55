use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::api::errors::FlagError;
use crate::flags::flag_models::{decrypt_feature_definitions, parse_feature_definitions, Feature};
use crate::metrics::utils::inc_recovered_error;

/// Fetches feature definitions from an SDK endpoint.
///
/// The endpoint responds with `{"features": {...}}`, or `{"encryptedFeatures": "..."}`
/// when the project encrypts its payload; a decryption key selects the latter.
pub struct FeatureRepository {
    endpoint: String,
    decryption_key: Option<String>,
    client: Client,
}

impl FeatureRepository {
    pub fn new(
        endpoint: impl Into<String>,
        decryption_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FlagError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            decryption_key,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Like [`Self::fetch_strict`], but logs the failure and returns `None`.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn fetch(&self) -> Option<HashMap<String, Feature>> {
        match self.fetch_strict().await {
            Ok(features) => Some(features),
            Err(e) => {
                warn!(
                    error_code = e.error_code(),
                    "Failed to fetch feature definitions: {}", e
                );
                inc_recovered_error(&e);
                None
            }
        }
    }

    /// Fetches and parses the definitions.
    ///
    /// Network failures and non-2xx statuses are [`FlagError::FeatureFetchError`]; an empty
    /// body, invalid JSON, a missing payload field or an undecryptable payload are
    /// [`FlagError::FeatureParseError`].
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn fetch_strict(&self) -> Result<HashMap<String, Feature>, FlagError> {
        info!("Fetching feature definitions");

        let response = self.client.get(&self.endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FlagError::FeatureFetchError(format!(
                "unexpected status {status}"
            )));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(FlagError::FeatureParseError(
                "empty response body".to_string(),
            ));
        }

        let payload: Value = serde_json::from_str(&body)
            .map_err(|e| FlagError::FeatureParseError(format!("invalid JSON: {e}")))?;

        let features = match &self.decryption_key {
            Some(key) => {
                let encrypted = payload
                    .get("encryptedFeatures")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        FlagError::FeatureParseError("missing encryptedFeatures".to_string())
                    })?;
                decrypt_feature_definitions(encrypted, key).map_err(|e| match e {
                    FlagError::FeatureParseError(_) => e,
                    other => FlagError::FeatureParseError(other.to_string()),
                })?
            }
            None => {
                let definitions = payload.get("features").ok_or_else(|| {
                    FlagError::FeatureParseError("missing features".to_string())
                })?;
                parse_feature_definitions(definitions)
            }
        };

        info!(feature_count = features.len(), "Fetched feature definitions");
        Ok(features)
    }
}
