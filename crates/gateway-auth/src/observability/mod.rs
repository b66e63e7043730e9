//! Observability for the authentication path.
//!
//! # Components
//!
//! - `metrics` - Counter definitions with bounded labels

pub mod metrics;

pub use metrics::{record_auth_decision, record_jwks_refresh};
