//! JWKS key directory and cache.
//!
//! The key directory fetches the identity provider's published signing keys
//! (JWKS document); the cache maps `kid` to key material and decides when a
//! refetch is needed.
//!
//! # Refresh policy
//!
//! - Cold cache: the first lookup forces a synchronous fetch.
//! - Warm cache: lookups for known kids return without network I/O.
//! - Expired cache: the next lookup refreshes first; if the refresh fails
//!   the stale key set is retained and served (availability over freshness).
//! - Unknown kid: exactly one forced refresh, even inside the TTL window,
//!   to pick up provider key rotation. A second miss is final for that
//!   call, so a down provider is never amplified into a retry loop.
//!
//! At most two fetch attempts happen per lookup: one TTL-driven, one
//! rotation-driven.

use crate::observability;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Timeout for JWKS HTTP requests.
///
/// A wedged identity provider must not stall the authentication path; the
/// stale-cache fallback covers the gap.
pub const JWKS_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on provider-declared TTLs (24 hours).
///
/// A runaway `max-age` must not pin a key set indefinitely.
pub const JWKS_TTL_CEILING: Duration = Duration::from_secs(86_400);

/// JSON Web Key as published by the identity provider.
///
/// Key material and metadata are passed through unmodified; this crate only
/// ever consumes the public parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID - used to select the correct key for verification. Entries
    /// published without one are dropped at fetch time.
    #[serde(default)]
    pub kid: String,

    /// Key type ("RSA" or "EC" for the families this gateway verifies).
    pub kty: String,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Algorithm hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// JWKS document shape: `{"keys": [...]}`.
#[derive(Debug, Clone, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

/// One point-in-time fetch of the provider's key set.
#[derive(Debug, Clone)]
pub struct KeySet {
    /// Published keys, in provider order.
    pub keys: Vec<Jwk>,

    /// TTL hint from the response's `Cache-Control: max-age` directive;
    /// `None` when the directive is absent or unparseable.
    pub max_age: Option<Duration>,
}

/// A JWKS fetch failure. No partial key set is ever produced.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("JWKS request failed: {0}")]
    Request(reqwest::Error),

    #[error("JWKS endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("JWKS response body is not a valid key set: {0}")]
    Parse(reqwest::Error),
}

/// Source of the provider's published keys.
///
/// Production uses [`HttpKeyDirectory`]; tests inject fakes to exercise the
/// cache's refresh behavior deterministically.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Fetch and parse the current key set.
    async fn fetch(&self) -> Result<KeySet, FetchError>;
}

/// Fetches the JWKS document from the identity provider over HTTP.
pub struct HttpKeyDirectory {
    /// URL of the JWKS endpoint.
    jwks_uri: String,

    /// HTTP client with the fetch timeout applied.
    http_client: reqwest::Client,
}

impl HttpKeyDirectory {
    /// Create a directory reading from the given JWKS endpoint.
    pub fn new(jwks_uri: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(JWKS_HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_uri,
            http_client,
        }
    }
}

#[async_trait]
impl KeyDirectory for HttpKeyDirectory {
    #[instrument(skip(self), fields(url = %self.jwks_uri))]
    async fn fetch(&self) -> Result<KeySet, FetchError> {
        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(FetchError::Request)?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let max_age = parse_max_age(response.headers());
        let document: JwksDocument = response.json().await.map_err(FetchError::Parse)?;

        // Keys without a kid cannot be looked up and must never act as an
        // implicit default; drop them here.
        let published = document.keys.len();
        let keys: Vec<Jwk> = document
            .keys
            .into_iter()
            .filter(|key| !key.kid.is_empty())
            .collect();
        if keys.len() < published {
            tracing::debug!(
                target: "auth.jwks",
                dropped = published - keys.len(),
                "Dropped JWKS entries without a kid"
            );
        }

        Ok(KeySet { keys, max_age })
    }
}

/// Parse a `max-age` TTL hint from the response headers.
///
/// The directive name is matched case-insensitively within the
/// comma-separated `Cache-Control` list; malformed values are ignored
/// rather than treated as a fetch error.
fn parse_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value.split(',').find_map(|directive| {
                directive
                    .trim()
                    .to_ascii_lowercase()
                    .strip_prefix("max-age=")
                    .and_then(|seconds| seconds.parse::<u64>().ok())
            })
        })
        .map(Duration::from_secs)
}

/// Cached key set with its expiry.
struct CacheEntry {
    /// Map of key ID to JWK. Wholly replaced on every successful refresh.
    keys: HashMap<String, Jwk>,

    /// When this entry expires.
    expires_at: Instant,

    /// Monotonic refresh counter, used to deduplicate concurrent refreshes.
    generation: u64,
}

/// TTL- and rotation-aware cache of the provider's signing keys.
///
/// Constructed once at service startup and shared by handle; the verifier
/// consults it on every request.
pub struct JwksCache {
    /// Where keys come from.
    directory: Arc<dyn KeyDirectory>,

    /// Fallback TTL when the provider sends no cache directive.
    default_ttl: Duration,

    /// Current key set, if one has ever been loaded.
    entry: RwLock<Option<CacheEntry>>,

    /// Serializes refreshes: at most one fetch in flight per cache.
    refresh_lock: Mutex<()>,
}

impl JwksCache {
    /// Create a cache over the given key directory.
    pub fn new(directory: Arc<dyn KeyDirectory>, default_ttl: Duration) -> Self {
        Self {
            directory,
            default_ttl,
            entry: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Get a JWK by key ID, refreshing from the directory as needed.
    ///
    /// Returns `Ok(None)` when the provider genuinely does not publish the
    /// key (after the rotation-recovery refresh).
    ///
    /// # Errors
    ///
    /// Returns the underlying `FetchError` only when no key set has ever
    /// been loaded and the fetch fails; once warm, fetch failures degrade
    /// to serving the last known key set.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Option<Jwk>, FetchError> {
        self.get_key_at(kid, Instant::now()).await
    }

    /// Deterministic lookup against an explicit `now` instant.
    ///
    /// Prefer [`get_key`](Self::get_key) in production code. This variant
    /// exists so the refresh policy can be unit-tested without wall-clock
    /// dependence.
    async fn get_key_at(&self, kid: &str, now: Instant) -> Result<Option<Jwk>, FetchError> {
        // Fast path: warm cache, known kid.
        {
            let entry = self.entry.read().await;
            if let Some(cached) = entry.as_ref() {
                if now < cached.expires_at {
                    if let Some(jwk) = cached.keys.get(kid) {
                        tracing::debug!(target: "auth.jwks", "JWKS cache hit");
                        return Ok(Some(jwk.clone()));
                    }
                }
            }
        }

        // TTL-driven refresh for a cold or expired cache.
        let (expired, generation) = self.state(now).await;
        if expired {
            self.refresh_or_fall_back(generation, now).await?;
            if let Some(jwk) = self.lookup(kid).await {
                return Ok(Some(jwk));
            }
        }

        // Unknown kid: force exactly one refresh to cover provider key
        // rotation, then take the answer as final for this call.
        tracing::info!(target: "auth.jwks", "Key not cached; forcing JWKS refresh");
        let (_, generation) = self.state(now).await;
        self.refresh_or_fall_back(generation, now).await?;
        Ok(self.lookup(kid).await)
    }

    /// Whether the cache needs a TTL-driven refresh, and the generation the
    /// decision was based on.
    async fn state(&self, now: Instant) -> (bool, u64) {
        let entry = self.entry.read().await;
        match entry.as_ref() {
            Some(cached) => (now >= cached.expires_at, cached.generation),
            None => (true, 0),
        }
    }

    async fn lookup(&self, kid: &str) -> Option<Jwk> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .and_then(|cached| cached.keys.get(kid).cloned())
    }

    /// Refresh, tolerating failure whenever a previous key set exists.
    async fn refresh_or_fall_back(
        &self,
        observed_generation: u64,
        now: Instant,
    ) -> Result<(), FetchError> {
        match self.refresh(observed_generation, now).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let entry = self.entry.read().await;
                if entry.is_some() {
                    tracing::warn!(
                        target: "auth.jwks",
                        error = %err,
                        "JWKS refresh failed; serving last known key set"
                    );
                    Ok(())
                } else {
                    tracing::error!(
                        target: "auth.jwks",
                        error = %err,
                        "JWKS refresh failed with no cached key set"
                    );
                    Err(err)
                }
            }
        }
    }

    /// Fetch the key set and swap it in atomically.
    ///
    /// Callers pass the generation they observed; if another refresh
    /// completed while this one waited for the guard, the fetch is skipped
    /// and the newer key set stands.
    #[instrument(skip(self))]
    async fn refresh(&self, observed_generation: u64, now: Instant) -> Result<(), FetchError> {
        let _guard = self.refresh_lock.lock().await;

        {
            let entry = self.entry.read().await;
            let current = entry.as_ref().map_or(0, |cached| cached.generation);
            if current != observed_generation {
                tracing::debug!(target: "auth.jwks", "JWKS already refreshed by concurrent caller");
                return Ok(());
            }
        }

        let key_set = match self.directory.fetch().await {
            Ok(key_set) => key_set,
            Err(err) => {
                observability::record_jwks_refresh("failure");
                return Err(err);
            }
        };
        observability::record_jwks_refresh("success");

        let ttl = key_set
            .max_age
            .unwrap_or(self.default_ttl)
            .min(JWKS_TTL_CEILING);
        let keys: HashMap<String, Jwk> = key_set
            .keys
            .into_iter()
            .map(|key| (key.kid.clone(), key))
            .collect();

        tracing::info!(
            target: "auth.jwks",
            key_count = keys.len(),
            ttl_seconds = ttl.as_secs(),
            "JWKS cache refreshed"
        );

        let mut entry = self.entry.write().await;
        *entry = Some(CacheEntry {
            keys,
            expires_at: now + ttl,
            generation: observed_generation + 1,
        });

        Ok(())
    }
}
