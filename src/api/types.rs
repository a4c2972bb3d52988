//! API request and response types.

use serde::{Deserialize, Serialize};

/// Body of `POST /solve`.
///
/// Fields are optional so that a missing field is reported as a bad
/// request instead of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolveRequest {
    /// First task page of the chain
    pub url: Option<String>,

    /// Shared secret; must match the configured one
    pub secret: Option<String>,
}

/// A solve request whose required fields are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSolveRequest {
    pub url: String,
    pub secret: String,
}

impl SolveRequest {
    /// Decode a raw body. Only a JSON object is accepted; serde alone would
    /// also take a positional array for a struct.
    pub fn from_body(body: &[u8]) -> Result<Self, String> {
        let invalid = || "Invalid JSON".to_string();
        match serde_json::from_slice::<serde_json::Value>(body).map_err(|_| invalid())? {
            value @ serde_json::Value::Object(_) => {
                serde_json::from_value(value).map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }

    /// Check that `url` and `secret` are present and non-blank.
    pub fn validate(self) -> Result<ValidSolveRequest, String> {
        let url = non_blank(self.url).ok_or_else(|| "Missing required field: url".to_string())?;
        let secret =
            non_blank(self.secret).ok_or_else(|| "Missing required field: secret".to_string())?;
        Ok(ValidSolveRequest { url, secret })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Acknowledgement for an accepted solve request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResponse {
    pub status: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Whole seconds since the server started
    pub uptime_seconds: u64,
}
