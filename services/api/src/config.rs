//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use liveness_core::{ChallengeType, VerificationPolicy};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where liveness sessions and submissions are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub vision_model: String,
    pub cors_origin: String,
    pub reviewer_token: Option<String>,
    pub sweep_interval: Duration,
    pub policy: VerificationPolicy,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Load Server and Storage Settings ---
        let bind_address =
            parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000".parse::<SocketAddr>().ok())?;

        let store_backend = match lookup("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{}' is not one of postgres, memory", other),
                ))
            }
        };

        let database_url = lookup("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Vision Model Settings ---
        let openai_api_key = lookup("OPENAI_API_KEY");
        let vision_model = lookup("VISION_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        // --- Load HTTP Surface Settings ---
        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());
        let reviewer_token = lookup("REVIEWER_TOKEN").filter(|t| !t.is_empty());
        let sweep_interval = Duration::from_secs(parse_or(&lookup, "SWEEP_INTERVAL_SECS", Some(60))?);

        // --- Load Verification Policy ---
        let defaults = VerificationPolicy::default();
        let policy = VerificationPolicy {
            session_ttl: Duration::from_secs(parse_or(
                &lookup,
                "SESSION_TTL_SECS",
                Some(defaults.session_ttl.as_secs()),
            )?),
            default_challenges: parse_or(
                &lookup,
                "NUM_CHALLENGES",
                Some(defaults.default_challenges),
            )?,
            match_threshold: parse_or(&lookup, "MATCH_THRESHOLD", Some(defaults.match_threshold))?,
            analysis_timeout: Duration::from_secs(parse_or(
                &lookup,
                "ANALYSIS_TIMEOUT_SECS",
                Some(defaults.analysis_timeout.as_secs()),
            )?),
            comparison_timeout: Duration::from_secs(parse_or(
                &lookup,
                "COMPARISON_TIMEOUT_SECS",
                Some(defaults.comparison_timeout.as_secs()),
            )?),
            max_image_bytes: parse_or(&lookup, "MAX_IMAGE_BYTES", Some(defaults.max_image_bytes))?,
            purge_after: Duration::from_secs(parse_or(
                &lookup,
                "PURGE_AFTER_SECS",
                Some(defaults.purge_after.as_secs()),
            )?),
        };

        if !(0.0..=100.0).contains(&policy.match_threshold) {
            return Err(ConfigError::InvalidValue(
                "MATCH_THRESHOLD".to_string(),
                format!("{} is outside 0-100", policy.match_threshold),
            ));
        }
        if !(1..=ChallengeType::ALL.len()).contains(&policy.default_challenges) {
            return Err(ConfigError::InvalidValue(
                "NUM_CHALLENGES".to_string(),
                format!(
                    "{} is outside 1-{}",
                    policy.default_challenges,
                    ChallengeType::ALL.len()
                ),
            ));
        }
        if policy.max_image_bytes == 0 {
            return Err(must_be_positive("MAX_IMAGE_BYTES"));
        }
        for (key, value) in [
            ("SWEEP_INTERVAL_SECS", sweep_interval),
            ("SESSION_TTL_SECS", policy.session_ttl),
            ("ANALYSIS_TIMEOUT_SECS", policy.analysis_timeout),
            ("COMPARISON_TIMEOUT_SECS", policy.comparison_timeout),
        ] {
            if value.is_zero() {
                return Err(must_be_positive(key));
            }
        }

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            openai_api_key,
            vision_model,
            cors_origin,
            reviewer_token,
            sweep_interval,
            policy,
        })
    }
}

fn must_be_positive(key: &str) -> ConfigError {
    ConfigError::InvalidValue(key.to_string(), "must be greater than zero".to_string())
}

/// Parses `key` if it is set, falling back to `default` otherwise.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => default.ok_or_else(|| ConfigError::MissingVar(key.to_string())),
    }
}
