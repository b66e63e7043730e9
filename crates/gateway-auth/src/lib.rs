//! Bearer-token authentication for the agent gateway.
//!
//! This library owns the gateway's request-authentication decision:
//! it fetches and caches the identity provider's public signing keys
//! (JWKS) and validates inbound bearer tokens against them.
//!
//! # Architecture
//!
//! ```text
//! middleware::require_auth -> auth::TokenVerifier -> auth::JwksCache -> auth::KeyDirectory
//! ```
//!
//! - [`auth::KeyDirectory`] fetches and parses the JWKS document over HTTP
//! - [`auth::JwksCache`] caches keys by `kid` with TTL and key-rotation recovery
//! - [`auth::TokenVerifier`] validates signature, registered claims, and the
//!   client identifier, producing an [`auth::AuthDecision`]
//! - [`middleware::require_auth`] adapts the decision to HTTP responses for
//!   axum applications
//!
//! The host application is responsible for routing, request parsing, and
//! everything else; this crate only answers "is this request authenticated".
//!
//! # Modules
//!
//! - `config` - Authentication configuration from environment
//! - `auth` - Key cache and token verifier
//! - `middleware` - axum middleware adapter
//! - `observability` - Metrics definitions

pub mod auth;
pub mod config;
pub mod middleware;
pub mod observability;
