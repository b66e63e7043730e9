//! The outcome of one verification call.
//!
//! Internal reject reasons are kept for logging and metrics; the boundary
//! only ever sees the coarse [`RejectCategory`], so a caller cannot probe
//! which specific check failed.

use crate::auth::claims::VerifiedClaims;

/// Result of verifying one bearer token.
#[derive(Debug, Clone)]
pub enum AuthDecision {
    /// Token is valid and the caller is a permitted client.
    Accepted(VerifiedClaims),

    /// Token was rejected; the reason stays server-side.
    Rejected(RejectReason),
}

impl AuthDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthDecision::Accepted(_))
    }

    /// The verified claims, if the token was accepted.
    pub fn claims(&self) -> Option<&VerifiedClaims> {
        match self {
            AuthDecision::Accepted(claims) => Some(claims),
            AuthDecision::Rejected(_) => None,
        }
    }
}

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Token is not a parseable three-segment compact serialization.
    MalformedToken,

    /// Token header carries no `kid`; key selection would be ambiguous.
    MissingKeyId,

    /// No published key matches the token's `kid`, even after a forced
    /// refresh.
    UnknownSigningKey,

    /// The matching JWK cannot produce a verification key (unsupported
    /// `kty`, missing or unusable key material, or an `alg` hint that
    /// contradicts the token header).
    UnsupportedKeyType,

    /// Token header declares an algorithm outside the allow-list.
    AlgorithmNotAllowed,

    /// Signature did not verify against the published key.
    SignatureInvalid,

    /// A registered claim failed validation; carries the claim name.
    ClaimValidationFailed(String),

    /// The `cid` claim is absent or not in the permitted client set.
    ClientNotAuthorized,

    /// The key directory could not be reached and no key set has ever
    /// been cached.
    KeyDirectoryUnavailable,
}

/// Coarse, boundary-facing classification of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCategory {
    /// The credential itself is bad, expired, or unrecognized (HTTP 401).
    Unauthorized,

    /// The credential is genuine but the identity is not entitled (HTTP 403).
    Forbidden,

    /// Authentication is temporarily impossible (HTTP 503).
    Unavailable,
}

impl RejectReason {
    /// Collapse the internal reason into the class exposed to callers.
    pub fn category(&self) -> RejectCategory {
        match self {
            RejectReason::ClientNotAuthorized => RejectCategory::Forbidden,
            RejectReason::KeyDirectoryUnavailable => RejectCategory::Unavailable,
            _ => RejectCategory::Unauthorized,
        }
    }

    /// Stable label for logs and metrics. Bounded cardinality: one label
    /// per variant, claim names are logged separately.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MalformedToken => "malformed_token",
            RejectReason::MissingKeyId => "missing_key_id",
            RejectReason::UnknownSigningKey => "unknown_signing_key",
            RejectReason::UnsupportedKeyType => "unsupported_key_type",
            RejectReason::AlgorithmNotAllowed => "algorithm_not_allowed",
            RejectReason::SignatureInvalid => "signature_invalid",
            RejectReason::ClaimValidationFailed(_) => "claim_validation_failed",
            RejectReason::ClientNotAuthorized => "client_not_authorized",
            RejectReason::KeyDirectoryUnavailable => "key_directory_unavailable",
        }
    }
}
