//! Authentication configuration.
//!
//! Configuration is loaded from environment variables. Invalid values are
//! rejected at load time rather than silently replaced with defaults, so a
//! misconfigured deployment fails fast instead of weakening validation.

use jsonwebtoken::Algorithm;
use std::collections::{HashMap, HashSet};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default JWKS cache TTL when the provider sends no cache directive.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Default clock skew leeway applied to `exp`/`nbf` validation.
pub const DEFAULT_CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(10);

/// Maximum allowed clock skew leeway.
///
/// Bounds misconfiguration: an excessively large leeway would keep expired
/// tokens valid long past their lifetime.
pub const MAX_CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(300);

/// Authentication configuration.
///
/// Loaded from environment variables; see [`Config::from_vars`] for the
/// variable names.
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the identity provider's JWKS endpoint.
    pub jwks_uri: String,

    /// Expected `iss` claim value.
    pub issuer: String,

    /// Expected `aud` claim value.
    pub audience: String,

    /// Client identifiers (`cid` claim) permitted to call this gateway.
    pub permitted_client_ids: HashSet<String>,

    /// Signing algorithms accepted in token headers (default: RS256).
    pub allowed_algorithms: Vec<Algorithm>,

    /// Fallback JWKS cache TTL when the provider sends no cache directive.
    pub jwks_ttl: Duration,

    /// Clock skew leeway for `exp`/`nbf` validation.
    pub clock_skew_leeway: Duration,

    /// Request paths that bypass authentication (in addition to the
    /// health/readiness probes, which are always public).
    pub public_paths: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWKS TTL configuration: {0}")]
    InvalidJwksTtl(String),

    #[error("Invalid clock skew leeway configuration: {0}")]
    InvalidClockSkewLeeway(String),

    #[error("Invalid allowed algorithms configuration: {0}")]
    InvalidAlgorithms(String),

    #[error("Invalid permitted client ids configuration: {0}")]
    InvalidClientIds(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// Variables:
    /// - `JWKS_URI` (required)
    /// - `TOKEN_ISSUER` (required)
    /// - `TOKEN_AUDIENCE` (required)
    /// - `PERMITTED_CLIENT_IDS` (required, comma-separated)
    /// - `ALLOWED_ALGORITHMS` (default: "RS256", comma-separated)
    /// - `JWKS_TTL_SECONDS` (default: 3600)
    /// - `CLOCK_SKEW_LEEWAY_SECONDS` (default: 10, max 300)
    /// - `PUBLIC_PATHS` (optional, comma-separated)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwks_uri = vars
            .get("JWKS_URI")
            .ok_or_else(|| ConfigError::MissingEnvVar("JWKS_URI".to_string()))?
            .clone();

        let issuer = vars
            .get("TOKEN_ISSUER")
            .ok_or_else(|| ConfigError::MissingEnvVar("TOKEN_ISSUER".to_string()))?
            .clone();

        let audience = vars
            .get("TOKEN_AUDIENCE")
            .ok_or_else(|| ConfigError::MissingEnvVar("TOKEN_AUDIENCE".to_string()))?
            .clone();

        let permitted_client_ids: HashSet<String> = vars
            .get("PERMITTED_CLIENT_IDS")
            .ok_or_else(|| ConfigError::MissingEnvVar("PERMITTED_CLIENT_IDS".to_string()))?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        if permitted_client_ids.is_empty() {
            return Err(ConfigError::InvalidClientIds(
                "PERMITTED_CLIENT_IDS must contain at least one client id".to_string(),
            ));
        }

        // Parse the algorithm allow-list with validation
        let allowed_algorithms = if let Some(value_str) = vars.get("ALLOWED_ALGORITHMS") {
            let mut algorithms = Vec::new();
            for name in value_str.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let algorithm: Algorithm = name.parse().map_err(|_| {
                    ConfigError::InvalidAlgorithms(format!(
                        "unrecognized signing algorithm '{}'",
                        name
                    ))
                })?;
                algorithms.push(algorithm);
            }
            if algorithms.is_empty() {
                return Err(ConfigError::InvalidAlgorithms(
                    "ALLOWED_ALGORITHMS must contain at least one algorithm".to_string(),
                ));
            }
            algorithms
        } else {
            vec![Algorithm::RS256]
        };

        // Parse JWKS TTL with validation
        let jwks_ttl = if let Some(value_str) = vars.get("JWKS_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwksTtl(format!(
                    "JWKS_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwksTtl(
                    "JWKS_TTL_SECONDS must be greater than 0".to_string(),
                ));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_JWKS_TTL
        };

        // Parse clock skew leeway with validation
        let clock_skew_leeway = if let Some(value_str) = vars.get("CLOCK_SKEW_LEEWAY_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidClockSkewLeeway(format!(
                    "CLOCK_SKEW_LEEWAY_SECONDS must be a valid non-negative integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value > MAX_CLOCK_SKEW_LEEWAY.as_secs() {
                return Err(ConfigError::InvalidClockSkewLeeway(format!(
                    "CLOCK_SKEW_LEEWAY_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW_LEEWAY.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW_LEEWAY
        };

        let public_paths = vars
            .get("PUBLIC_PATHS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            jwks_uri,
            issuer,
            audience,
            permitted_client_ids,
            allowed_algorithms,
            jwks_ttl,
            clock_skew_leeway,
            public_paths,
        })
    }
}
