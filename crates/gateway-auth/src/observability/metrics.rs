//! Metrics definitions for the authentication path.
//!
//! All metrics follow Prometheus naming conventions with a `gateway_auth_`
//! prefix and a `_total` suffix for counters. The host application is
//! responsible for installing a recorder/exporter.
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome` on decisions: "accepted" plus one value per reject reason
//!   variant (claim names are not labels)
//! - `outcome` on refreshes: "success" | "failure"

use metrics::counter;

/// Record the outcome of one token verification.
///
/// Metric: `gateway_auth_decisions_total`
/// Labels: `outcome`
pub fn record_auth_decision(outcome: &'static str) {
    counter!("gateway_auth_decisions_total", "outcome" => outcome).increment(1);
}

/// Record the outcome of one JWKS refresh attempt.
///
/// Metric: `gateway_auth_jwks_refreshes_total`
/// Labels: `outcome`
pub fn record_jwks_refresh(outcome: &'static str) {
    counter!("gateway_auth_jwks_refreshes_total", "outcome" => outcome).increment(1);
}
