//! Configuration management for taskchain.
//!
//! Configuration is read from environment variables:
//! - `LLM_API_KEY` - Required (falls back to `GOOGLE_API_KEY`). Model provider key.
//! - `LLM_API_BASE` - Optional. OpenAI-compatible base URL. Defaults to the Gemini endpoint.
//! - `DEFAULT_MODEL` - Optional. Defaults to `gemini-2.5-flash`.
//! - `EMAIL` - Optional. Identity embedded in submissions.
//! - `SECRET` - Required. Shared secret checked by `/solve`.
//! - `HOST` / `PORT` - Optional. Defaults to `0.0.0.0:7860`.
//! - `WORKSPACE_PATH` - Optional. Download and code directory. Defaults to `./LLMFiles`.
//! - `MAX_ITERATIONS` - Optional. Agent step ceiling per run. Defaults to `5000`.
//! - `TOKEN_LIMIT` - Optional. Context budget sent to the model. Defaults to `60000`.
//! - `TASK_TIME_LIMIT_SECS` - Optional. Per-page deadline. Defaults to `180`.
//! - `RETRY_WINDOW_SECS` - Optional. Deadline after a rejected answer. Defaults to `90`.
//! - `MAX_MALFORMED_RETRIES` - Optional. Consecutive repair cap. Defaults to `10`.
//! - `RATE_LIMIT_REQUESTS` / `RATE_LIMIT_PERIOD_SECS` - Optional. Defaults to 4 per 60s.
//! - `CODE_TIMEOUT_SECS` - Optional. `run_code` timeout. Defaults to `120`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Limits applied to every run of the control loop.
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Maximum number of times the agent step may be entered in one run
    pub max_iterations: usize,

    /// Token budget for the trimmed context
    pub token_limit: usize,

    /// Time allowed on a single task page before the override kicks in
    pub task_time_limit: Duration,

    /// Time allowed after a rejected submission (offset-based deadline)
    pub retry_window: Duration,

    /// Consecutive malformed responses tolerated before aborting
    pub max_malformed_retries: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            token_limit: 60_000,
            task_time_limit: Duration::from_secs(180),
            retry_window: Duration::from_secs(90),
            max_malformed_retries: 10,
        }
    }
}

/// Outbound request budget for the model gateway.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per period (also the burst size)
    pub requests: u32,

    /// Refill period
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 4,
            period: Duration::from_secs(60),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model provider API key
    pub api_key: String,

    /// OpenAI-compatible API base URL
    pub api_base: String,

    /// Model identifier
    pub default_model: String,

    /// Email submitted alongside answers
    pub email: String,

    /// Shared secret for `/solve` (also submitted alongside answers)
    pub secret: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Directory for downloads and code execution
    pub workspace_path: PathBuf,

    /// Timeout for a single `run_code` invocation
    pub code_timeout: Duration,

    pub limits: RunLimits,

    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if no API key or `SECRET` is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))?;

        let secret = std::env::var("SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("SECRET".to_string()))?;

        let api_base = std::env::var("LLM_API_BASE")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_API_BASE.to_string());

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let email = std::env::var("EMAIL").unwrap_or_default();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_parse("PORT", 7860u16)?;

        let workspace_path = std::env::var("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("LLMFiles"));

        let defaults = RunLimits::default();
        let limits = RunLimits {
            max_iterations: env_parse("MAX_ITERATIONS", defaults.max_iterations)?,
            token_limit: env_parse("TOKEN_LIMIT", defaults.token_limit)?,
            task_time_limit: Duration::from_secs(env_parse("TASK_TIME_LIMIT_SECS", 180u64)?),
            retry_window: Duration::from_secs(env_parse("RETRY_WINDOW_SECS", 90u64)?),
            max_malformed_retries: env_parse(
                "MAX_MALFORMED_RETRIES",
                defaults.max_malformed_retries,
            )?,
        };

        let rate_limit = RateLimitConfig {
            requests: env_parse("RATE_LIMIT_REQUESTS", 4u32)?,
            period: Duration::from_secs(env_parse("RATE_LIMIT_PERIOD_SECS", 60u64)?),
        };
        if rate_limit.requests == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_REQUESTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let code_timeout = Duration::from_secs(env_parse("CODE_TIMEOUT_SECS", 120u64)?);

        Ok(Self {
            api_key,
            api_base,
            default_model,
            email,
            secret,
            host,
            port,
            workspace_path,
            code_timeout,
            limits,
            rate_limit,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, secret: String, workspace_path: PathBuf) -> Self {
        Self {
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            email: String::new(),
            secret,
            host: "127.0.0.1".to_string(),
            port: 7860,
            workspace_path,
            code_timeout: Duration::from_secs(120),
            limits: RunLimits::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_run_policy() {
        let config = Config::new("key".into(), "s3cret".into(), PathBuf::from("/tmp/ws"));
        assert_eq!(config.limits.max_iterations, 5000);
        assert_eq!(config.limits.token_limit, 60_000);
        assert_eq!(config.limits.task_time_limit, Duration::from_secs(180));
        assert_eq!(config.limits.retry_window, Duration::from_secs(90));
        assert_eq!(config.rate_limit.requests, 4);
        assert_eq!(config.rate_limit.period, Duration::from_secs(60));
    }

    #[test]
    fn env_parse_reports_variable_name() {
        std::env::set_var("TASKCHAIN_TEST_BAD_PORT", "not-a-port");
        let err = env_parse::<u16>("TASKCHAIN_TEST_BAD_PORT", 1).unwrap_err();
        assert!(err.to_string().contains("TASKCHAIN_TEST_BAD_PORT"));
        std::env::remove_var("TASKCHAIN_TEST_BAD_PORT");
    }

    #[test]
    fn env_parse_falls_back_to_default() {
        let value = env_parse::<usize>("TASKCHAIN_TEST_UNSET_VALUE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
