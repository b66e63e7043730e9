//! Authentication middleware for protected routes.
//!
//! Extracts the bearer token from the Authorization header, runs it through
//! the verifier, and either forwards the request with the verified claims in
//! its extensions or renders the rejection.
//!
//! Responses expose only the coarse outcome (401/403/503); the specific
//! reject reason stays in server-side logs. Bodies are JSON by default and
//! plain text for callers that accept `text/event-stream`, matching the
//! gateway's streaming clients.

use crate::auth::{AuthDecision, RejectCategory, TokenVerifier, VerifiedClaims};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

/// Health/readiness probes always bypass authentication.
const PROBE_PATHS: [&str; 2] = ["/healthz", "/readyz"];

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Token verifier backed by the JWKS cache.
    pub verifier: Arc<TokenVerifier>,

    /// Additional request paths that bypass authentication.
    pub public_paths: HashSet<String>,
}

impl AuthState {
    pub fn new(verifier: Arc<TokenVerifier>, public_paths: impl IntoIterator<Item = String>) -> Self {
        Self {
            verifier,
            public_paths: public_paths.into_iter().collect(),
        }
    }
}

/// Authentication middleware.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - Probe paths (`/healthz`, `/readyz`) and configured public paths pass
///   through untouched
/// - Missing/malformed header or a rejected token: 401 with a
///   `WWW-Authenticate` header
/// - Valid token from a non-permitted client: 403
/// - Key directory unreachable with nothing cached: 503
/// - Otherwise the request continues with [`VerifiedClaims`] in its
///   extensions
#[instrument(skip(state, req, next), name = "middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if PROBE_PATHS.contains(&path) || state.public_paths.contains(path) {
        return next.run(req).await;
    }

    let accept = accept_header(req.headers());

    let Some(token) = bearer_token(req.headers()) else {
        tracing::debug!(target: "middleware.auth", "Missing or malformed Authorization header");
        return unauthorized("Missing or malformed Authorization header.", &accept);
    };

    match state.verifier.verify(token).await {
        AuthDecision::Accepted(claims) => {
            // Claims go into request extensions for downstream handlers.
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        AuthDecision::Rejected(reason) => {
            tracing::warn!(
                target: "middleware.auth",
                reason = reason.as_str(),
                "Request rejected"
            );
            match reason.category() {
                RejectCategory::Unauthorized => {
                    unauthorized("Invalid or expired access token.", &accept)
                }
                RejectCategory::Forbidden => {
                    forbidden("Client is not authorized for this gateway.", &accept)
                }
                RejectCategory::Unavailable => unavailable(&accept),
            }
        }
    }
}

/// Extension trait for extracting claims from a request.
pub trait ClaimsExt {
    /// The authenticated claims, or `None` if the auth middleware was not
    /// applied to this request.
    fn claims(&self) -> Option<&VerifiedClaims>;
}

impl<B> ClaimsExt for axum::extract::Request<B> {
    fn claims(&self) -> Option<&VerifiedClaims> {
        self.extensions().get::<VerifiedClaims>()
    }
}

fn accept_header(headers: &HeaderMap) -> String {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn wants_event_stream(accept: &str) -> bool {
    accept.contains("text/event-stream")
}

fn unauthorized(reason: &str, accept: &str) -> Response {
    let mut response = if wants_event_stream(accept) {
        (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("error unauthorized: {reason}"),
        )
            .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized", "reason": reason})),
        )
            .into_response()
    };

    if let Ok(value) = "Bearer realm=\"agent-gateway\", error=\"invalid_token\"".parse() {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

fn forbidden(reason: &str, accept: &str) -> Response {
    if wants_event_stream(accept) {
        (
            StatusCode::FORBIDDEN,
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("error forbidden: {reason}"),
        )
            .into_response()
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "forbidden", "reason": reason})),
        )
            .into_response()
    }
}

fn unavailable(accept: &str) -> Response {
    let reason = "Authentication service temporarily unavailable.";
    if wants_event_stream(accept) {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/event-stream")],
            format!("error unavailable: {reason}"),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "unavailable", "reason": reason})),
        )
            .into_response()
    }
}
