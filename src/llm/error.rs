//! LLM error types.
//!
//! Gateway failures are fatal to the agent step that issued them; the kind is
//! kept so logs can tell quota exhaustion apart from transport trouble.

/// Error from LLM API calls.
#[derive(Debug)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    pub message: String,
}

impl LlmError {
    /// Create an error from a non-success HTTP response.
    pub fn from_status(status_code: u16, message: String) -> Self {
        Self {
            kind: classify_http_status(status_code),
            status_code: Some(status_code),
            message,
        }
    }

    /// Create a network error.
    pub fn network_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::NetworkError,
            status_code: None,
            message,
        }
    }

    /// Create a parse error.
    pub fn parse_error(message: String) -> Self {
        Self {
            kind: LlmErrorKind::ParseError,
            status_code: None,
            message,
        }
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Quota or rate limit exhausted (429)
    RateLimited,
    /// Server error (5xx)
    ServerError,
    /// Client error (400, 401, 403, 404)
    ClientError,
    /// Connection failed or timed out
    NetworkError,
    /// Response body could not be decoded
    ParseError,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmErrorKind::RateLimited => write!(f, "Rate limited"),
            LlmErrorKind::ServerError => write!(f, "Server error"),
            LlmErrorKind::ClientError => write!(f, "Client error"),
            LlmErrorKind::NetworkError => write!(f, "Network error"),
            LlmErrorKind::ParseError => write!(f, "Parse error"),
        }
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
