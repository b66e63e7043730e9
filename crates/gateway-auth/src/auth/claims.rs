//! Claims extracted from validated tokens.
//!
//! `VerifiedClaims` is produced once per successful verification and handed
//! to the caller; it is never persisted. The `sub` and `cid` fields carry
//! caller identifiers and are redacted in Debug output to keep them out of
//! logs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The `aud` claim: providers serialize it as a single string or an array.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    /// Whether the claim names the given audience.
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s == audience,
            Audience::Multiple(v) => v.iter().any(|a| a == audience),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Audience::None => true,
            Audience::Single(s) => s.is_empty(),
            Audience::Multiple(v) => v.is_empty(),
        }
    }
}

/// Registered claims of a verified token.
///
/// `exp` and `nbf` are mandatory (verification rejects tokens without them),
/// so they are plain fields; the remaining registered claims are optional.
/// Provider-specific claims land in `extra` unmodified.
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Issuer.
    pub iss: String,

    /// Audience(s) the token was minted for.
    #[serde(default)]
    pub aud: Audience,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Not-before timestamp (Unix epoch seconds).
    pub nbf: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Subject - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Client identifier - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,

    /// Any remaining claims, passed through unmodified.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Custom Debug implementation that redacts caller identifiers.
impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("cid", &self.cid.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
