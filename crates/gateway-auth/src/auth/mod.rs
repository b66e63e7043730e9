//! Bearer-token authentication core.
//!
//! This module contains the JWKS key cache and the token verifier.
//!
//! # Components
//!
//! - `jwks` - Key directory (HTTP fetch) and TTL-aware key cache
//! - `verifier` - Token signature, claim, and identity validation
//! - `claims` - Claims extracted from validated tokens
//! - `decision` - The accept/reject outcome of one verification call

pub mod claims;
pub mod decision;
pub mod jwks;
pub mod verifier;

pub use claims::{Audience, VerifiedClaims};
pub use decision::{AuthDecision, RejectCategory, RejectReason};
pub use jwks::{FetchError, HttpKeyDirectory, Jwk, JwksCache, KeyDirectory, KeySet};
pub use verifier::TokenVerifier;
