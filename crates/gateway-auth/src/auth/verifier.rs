//! Token verification.
//!
//! Decides whether an opaque bearer token is a valid, currently-authorized
//! credential: signature against the provider's published key, registered
//! claims, and the gateway's permitted-client check.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The header's algorithm is checked against the allow-list before any
//!   signature work (defends against alg-confusion attacks)
//! - A token without a `kid` is rejected outright; there is no "default"
//!   or "first" key fallback
//! - Only public key material is ever handled here
//! - The caller-facing outcome is coarse; specific reasons stay in logs

use crate::auth::claims::VerifiedClaims;
use crate::auth::decision::{AuthDecision, RejectReason};
use crate::auth::jwks::{Jwk, JwksCache};
use crate::config::Config;
use crate::observability;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Maximum allowed token size in bytes (8KB).
///
/// Oversized tokens are rejected before base64 decoding or any
/// cryptographic work.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// The token header fields this gateway acts on.
#[derive(Debug, PartialEq, Eq, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Verifies bearer tokens against the cached provider key set.
pub struct TokenVerifier {
    /// Key cache consulted for the token's `kid`.
    keys: Arc<JwksCache>,

    /// Expected `iss` claim value.
    expected_issuer: String,

    /// Expected `aud` claim value.
    expected_audience: String,

    /// Signing algorithms accepted in token headers.
    allowed_algorithms: Vec<Algorithm>,

    /// Client identifiers permitted to call this gateway.
    permitted_client_ids: HashSet<String>,

    /// Clock skew leeway applied to `exp`/`nbf`.
    leeway: Duration,
}

impl TokenVerifier {
    /// Create a verifier over the given key cache.
    pub fn new(config: &Config, keys: Arc<JwksCache>) -> Self {
        Self {
            keys,
            expected_issuer: config.issuer.clone(),
            expected_audience: config.audience.clone(),
            allowed_algorithms: config.allowed_algorithms.clone(),
            permitted_client_ids: config.permitted_client_ids.clone(),
            leeway: config.clock_skew_leeway,
        }
    }

    /// Verify a bearer token.
    ///
    /// Checks run in a fixed order and stop at the first failure:
    /// header parse, `kid` presence, key lookup (with rotation recovery),
    /// verification-key construction, algorithm allow-list, signature,
    /// registered claims (`exp`, `nbf`, `iss`, `aud`), permitted client.
    ///
    /// Every failure mode resolves to a reject decision; nothing here can
    /// take the host process down.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> AuthDecision {
        let decision = self.verify_inner(token).await;
        match &decision {
            AuthDecision::Accepted(_) => {
                tracing::debug!(target: "auth.verifier", "Token accepted");
                observability::record_auth_decision("accepted");
            }
            AuthDecision::Rejected(reason) => {
                tracing::debug!(
                    target: "auth.verifier",
                    reason = reason.as_str(),
                    detail = ?reason,
                    "Token rejected"
                );
                observability::record_auth_decision(reason.as_str());
            }
        }
        decision
    }

    async fn verify_inner(&self, token: &str) -> AuthDecision {
        // 1. Unsigned header: algorithm and key ID.
        let header = match parse_header(token) {
            Ok(header) => header,
            Err(reason) => return AuthDecision::Rejected(reason),
        };

        // 2. Key selection must be unambiguous.
        let Some(kid) = header.kid.filter(|kid| !kid.is_empty()) else {
            return AuthDecision::Rejected(RejectReason::MissingKeyId);
        };

        // 3. Published key for this kid, with rotation recovery.
        let jwk = match self.keys.get_key(&kid).await {
            Ok(Some(jwk)) => jwk,
            Ok(None) => return AuthDecision::Rejected(RejectReason::UnknownSigningKey),
            Err(err) => {
                tracing::warn!(
                    target: "auth.verifier",
                    error = %err,
                    "Key directory unavailable and no cached key set"
                );
                return AuthDecision::Rejected(RejectReason::KeyDirectoryUnavailable);
            }
        };

        // 4. Verification key from the JWK's public material.
        let decoding_key = match decoding_key_for(&jwk) {
            Ok(key) => key,
            Err(reason) => return AuthDecision::Rejected(reason),
        };

        // 5. Algorithm allow-list before any signature work. Unknown names
        //    ("none" included) never reach the crypto layer.
        let Ok(algorithm) = header.alg.parse::<Algorithm>() else {
            return AuthDecision::Rejected(RejectReason::AlgorithmNotAllowed);
        };
        if !self.allowed_algorithms.contains(&algorithm) {
            return AuthDecision::Rejected(RejectReason::AlgorithmNotAllowed);
        }

        // A published alg hint must agree with what the token claims.
        if jwk.alg.as_deref().is_some_and(|hint| hint != header.alg) {
            tracing::warn!(
                target: "auth.verifier",
                token_alg = %header.alg,
                "JWK algorithm hint contradicts token header"
            );
            return AuthDecision::Rejected(RejectReason::UnsupportedKeyType);
        }

        // 5-6. Signature, then registered claims.
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.expected_issuer]);
        validation.set_audience(&[&self.expected_audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud"]);

        let token_data = match decode::<VerifiedClaims>(token, &decoding_key, &validation) {
            Ok(data) => data,
            Err(err) => return AuthDecision::Rejected(reject_reason_for(&err)),
        };
        let claims = token_data.claims;

        // 7. The token must carry a permitted client identifier.
        match claims.cid.as_deref() {
            Some(cid) if self.permitted_client_ids.contains(cid) => {}
            _ => return AuthDecision::Rejected(RejectReason::ClientNotAuthorized),
        }

        // 8. All checks passed.
        AuthDecision::Accepted(claims)
    }
}

/// Parse the token's unsigned header without verifying anything.
///
/// The `kid` extracted here is only ever used to look keys up in the
/// trusted JWKS; the token is still fully verified afterwards.
fn parse_header(token: &str) -> Result<TokenHeader, RejectReason> {
    if token.len() > MAX_TOKEN_SIZE_BYTES {
        tracing::debug!(
            target: "auth.verifier",
            token_size = token.len(),
            max_size = MAX_TOKEN_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(RejectReason::MalformedToken);
    }

    // Compact serialization: header.payload.signature
    let mut segments = token.split('.');
    let header_segment = match (segments.next(), segments.next(), segments.next(), segments.next())
    {
        (Some(header), Some(_payload), Some(_signature), None) => header,
        _ => return Err(RejectReason::MalformedToken),
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_segment).map_err(|e| {
        tracing::debug!(target: "auth.verifier", error = %e, "Failed to decode token header base64");
        RejectReason::MalformedToken
    })?;

    serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "auth.verifier", error = %e, "Failed to parse token header JSON");
        RejectReason::MalformedToken
    })
}

/// Build a verification key from a JWK.
///
/// Closed dispatch over the key type: RSA keys from modulus/exponent, EC
/// keys from curve coordinates. Anything else, or unusable material, is an
/// unsupported key.
fn decoding_key_for(jwk: &Jwk) -> Result<DecodingKey, RejectReason> {
    match jwk.kty.as_str() {
        "RSA" => {
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                tracing::warn!(target: "auth.verifier", "RSA JWK missing modulus or exponent");
                return Err(RejectReason::UnsupportedKeyType);
            };
            DecodingKey::from_rsa_components(n, e).map_err(|err| {
                tracing::warn!(target: "auth.verifier", error = %err, "Invalid RSA key material");
                RejectReason::UnsupportedKeyType
            })
        }
        "EC" => {
            let (Some(x), Some(y)) = (jwk.x.as_deref(), jwk.y.as_deref()) else {
                tracing::warn!(target: "auth.verifier", "EC JWK missing curve coordinates");
                return Err(RejectReason::UnsupportedKeyType);
            };
            DecodingKey::from_ec_components(x, y).map_err(|err| {
                tracing::warn!(target: "auth.verifier", error = %err, "Invalid EC key material");
                RejectReason::UnsupportedKeyType
            })
        }
        other => {
            tracing::warn!(target: "auth.verifier", kty = %other, "Unsupported JWK key type");
            Err(RejectReason::UnsupportedKeyType)
        }
    }
}

/// Map a decode failure onto the internal reject taxonomy.
fn reject_reason_for(err: &jsonwebtoken::errors::Error) -> RejectReason {
    match err.kind() {
        ErrorKind::ExpiredSignature => RejectReason::ClaimValidationFailed("exp".to_string()),
        ErrorKind::ImmatureSignature => RejectReason::ClaimValidationFailed("nbf".to_string()),
        ErrorKind::InvalidIssuer => RejectReason::ClaimValidationFailed("iss".to_string()),
        ErrorKind::InvalidAudience => RejectReason::ClaimValidationFailed("aud".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            RejectReason::ClaimValidationFailed(claim.clone())
        }
        ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            RejectReason::MalformedToken
        }
        // Key/algorithm family disagreement surfaces here after the
        // allow-list check, so it is a key problem, not an alg problem.
        ErrorKind::InvalidAlgorithm => RejectReason::UnsupportedKeyType,
        _ => RejectReason::SignatureInvalid,
    }
}
