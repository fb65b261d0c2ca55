use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Envconfig, Clone)]
pub struct Config {
    pub features_endpoint: String,

    pub decryption_key: Option<String>,

    // JSON object
    #[envconfig(default = "{}")]
    pub attributes: String,

    // Comma-separated feature keys to evaluate
    #[envconfig(default = "")]
    pub feature_keys: String,

    pub url: Option<String>,

    #[envconfig(default = "false")]
    pub qa_mode: FlexBool,

    #[envconfig(default = "true")]
    pub enabled: FlexBool,

    #[envconfig(default = "5000")]
    pub request_timeout_ms: u64,

    #[envconfig(default = "false")]
    pub debug: FlexBool,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            features_endpoint: "http://localhost:3100/api/features/sdk-key".to_string(),
            decryption_key: None,
            attributes: "{}".to_string(),
            feature_keys: "".to_string(),
            url: None,
            qa_mode: FlexBool(false),
            enabled: FlexBool(true),
            request_timeout_ms: 5000,
            debug: FlexBool(false),
        }
    }

    pub fn feature_keys(&self) -> Vec<String> {
        self.feature_keys
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Parses `ATTRIBUTES`, which must be a JSON object.
    pub fn attributes(&self) -> Result<Value, String> {
        if self.attributes.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        match serde_json::from_str::<Value>(&self.attributes) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(other) => Err(format!("ATTRIBUTES must be a JSON object, got {}", other)),
            Err(e) => Err(format!("ATTRIBUTES is not valid JSON: {}", e)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
