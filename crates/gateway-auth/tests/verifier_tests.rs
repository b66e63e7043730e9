//! Token verification integration tests.
//!
//! Exercises the verifier end-to-end against a mocked JWKS endpoint with
//! real RSA and EC signing keys.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::*;
use gateway_auth::auth::{AuthDecision, RejectCategory, RejectReason};
use wiremock::MockServer;

fn assert_rejected_with(decision: &AuthDecision, expected: &RejectReason) {
    match decision {
        AuthDecision::Rejected(reason) => assert_eq!(reason, expected),
        AuthDecision::Accepted(_) => panic!("expected rejection, token was accepted"),
    }
}

#[tokio::test]
async fn test_accepts_valid_rs256_token() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(60), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k1", &TestClaims::valid());
    let decision = verifier.verify(&token).await;

    assert!(decision.is_accepted());
    let claims = decision.claims().expect("accepted decision carries claims");
    assert_eq!(claims.iss, TEST_ISSUER);
    assert!(claims.aud.contains(TEST_AUDIENCE));
    assert_eq!(claims.cid.as_deref(), Some(PERMITTED_CLIENT));

    // One cold fetch, no more.
    assert_eq!(jwks_request_count(&server).await, 1);
}

#[tokio::test]
async fn test_second_verification_hits_warm_cache() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(60), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k1", &TestClaims::valid());
    assert!(verifier.verify(&token).await.is_accepted());
    assert!(verifier.verify(&token).await.is_accepted());

    assert_eq!(jwks_request_count(&server).await, 1);
}

#[tokio::test]
async fn test_max_age_zero_forces_refresh_on_next_call() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(0), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k1", &TestClaims::valid());
    assert!(verifier.verify(&token).await.is_accepted());
    assert!(verifier.verify(&token).await.is_accepted());

    // max-age=0 means "no caching": every verification refetches.
    assert_eq!(jwks_request_count(&server).await, 2);
}

#[tokio::test]
async fn test_rotated_key_recovered_by_forced_refresh() {
    let server = MockServer::start().await;
    // The first fetch sees only k1; after rotation the provider publishes
    // k1 and k2.
    mount_jwks(
        &server,
        jwks_document(&[rsa_jwk_json("k1")]),
        Some(3600),
        Some(1),
    )
    .await;
    mount_jwks(
        &server,
        jwks_document(&[rsa_jwk_json("k1"), rsa_jwk_json("k2")]),
        Some(3600),
        None,
    )
    .await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    // Warm the cache onto the pre-rotation key set.
    let token_k1 = sign_rs256("k1", &TestClaims::valid());
    assert!(verifier.verify(&token_k1).await.is_accepted());

    // A token under the rotated key triggers exactly one forced refresh.
    let token_k2 = sign_rs256("k2", &TestClaims::valid());
    assert!(verifier.verify(&token_k2).await.is_accepted());
    assert_eq!(jwks_request_count(&server).await, 2);
}

#[tokio::test]
async fn test_unknown_kid_rejected_after_single_forced_refresh() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k9", &TestClaims::valid());
    let decision = verifier.verify(&token).await;

    assert_rejected_with(&decision, &RejectReason::UnknownSigningKey);
    // Cold fetch plus one rotation-driven refresh, nothing more.
    assert_eq!(jwks_request_count(&server).await, 2);
}

#[tokio::test]
async fn test_stale_key_set_serves_through_provider_outage() {
    let server = MockServer::start().await;
    // One good response with immediate expiry, then the provider goes down.
    mount_jwks(
        &server,
        jwks_document(&[rsa_jwk_json("k1")]),
        Some(0),
        Some(1),
    )
    .await;
    mount_jwks_failure(&server).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k1", &TestClaims::valid());
    assert!(verifier.verify(&token).await.is_accepted());

    // The refresh fails, but the known key still verifies the token.
    assert!(verifier.verify(&token).await.is_accepted());
    assert_eq!(jwks_request_count(&server).await, 2);
}

#[tokio::test]
async fn test_cold_cache_with_provider_down_is_unavailable() {
    let server = MockServer::start().await;
    mount_jwks_failure(&server).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k1", &TestClaims::valid());
    let decision = verifier.verify(&token).await;

    assert_rejected_with(&decision, &RejectReason::KeyDirectoryUnavailable);
    match decision {
        AuthDecision::Rejected(reason) => {
            assert_eq!(reason.category(), RejectCategory::Unavailable);
        }
        AuthDecision::Accepted(_) => unreachable!(),
    }
}

#[tokio::test]
async fn test_expiry_leeway_boundaries() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    // 11 seconds past expiry: beyond the 10s leeway, rejected.
    let mut claims = TestClaims::valid();
    claims.exp = chrono::Utc::now().timestamp() - 11;
    let decision = verifier.verify(&sign_rs256("k1", &claims)).await;
    assert_rejected_with(
        &decision,
        &RejectReason::ClaimValidationFailed("exp".to_string()),
    );

    // 9 seconds past expiry: inside the leeway, accepted.
    let mut claims = TestClaims::valid();
    claims.exp = chrono::Utc::now().timestamp() - 9;
    assert!(verifier.verify(&sign_rs256("k1", &claims)).await.is_accepted());
}

#[tokio::test]
async fn test_rejects_token_not_yet_valid() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let mut claims = TestClaims::valid();
    claims.nbf = chrono::Utc::now().timestamp() + 120;
    let decision = verifier.verify(&sign_rs256("k1", &claims)).await;

    assert_rejected_with(
        &decision,
        &RejectReason::ClaimValidationFailed("nbf".to_string()),
    );
}

#[tokio::test]
async fn test_rejects_wrong_issuer() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let mut claims = TestClaims::valid();
    claims.iss = "https://rogue-idp.example.com".to_string();
    let decision = verifier.verify(&sign_rs256("k1", &claims)).await;

    assert_rejected_with(
        &decision,
        &RejectReason::ClaimValidationFailed("iss".to_string()),
    );
}

#[tokio::test]
async fn test_rejects_wrong_audience() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let mut claims = TestClaims::valid();
    claims.aud = "api://some-other-service".to_string();
    let decision = verifier.verify(&sign_rs256("k1", &claims)).await;

    assert_rejected_with(
        &decision,
        &RejectReason::ClaimValidationFailed("aud".to_string()),
    );
}

#[tokio::test]
async fn test_rejects_unlisted_client_id() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    // Signature, issuer, audience, and times are all valid; only the
    // client identifier is wrong.
    let mut claims = TestClaims::valid();
    claims.cid = Some("client-z".to_string());
    let decision = verifier.verify(&sign_rs256("k1", &claims)).await;

    assert_rejected_with(&decision, &RejectReason::ClientNotAuthorized);
    match decision {
        AuthDecision::Rejected(reason) => {
            assert_eq!(reason.category(), RejectCategory::Forbidden);
        }
        AuthDecision::Accepted(_) => unreachable!(),
    }
}

#[tokio::test]
async fn test_rejects_missing_client_id() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let mut claims = TestClaims::valid();
    claims.cid = None;
    let decision = verifier.verify(&sign_rs256("k1", &claims)).await;

    assert_rejected_with(&decision, &RejectReason::ClientNotAuthorized);
}

#[tokio::test]
async fn test_rejects_disallowed_algorithm_even_with_matching_key() {
    let server = MockServer::start().await;
    // The provider publishes the EC key, so the signature would verify if
    // the algorithm were permitted.
    mount_jwks(&server, jwks_document(&[ec_jwk_json("ec1")]), Some(3600), None).await;

    // Default allow-list: RS256 only.
    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_es256("ec1", &TestClaims::valid());
    let decision = verifier.verify(&token).await;

    assert_rejected_with(&decision, &RejectReason::AlgorithmNotAllowed);
}

#[tokio::test]
async fn test_accepts_es256_token_when_allow_listed() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[ec_jwk_json("ec1")]), Some(3600), None).await;

    let config = test_config(&server, &[("ALLOWED_ALGORITHMS", "RS256,ES256")]);
    let verifier = verifier_for(&config);

    let token = sign_es256("ec1", &TestClaims::valid());
    assert!(verifier.verify(&token).await.is_accepted());
}

#[tokio::test]
async fn test_rejects_alg_none_token() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT","kid":"k1"}"#);
    let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"attacker"}"#);
    let token = format!("{header}.{payload}.");

    let decision = verifier.verify(&token).await;
    assert_rejected_with(&decision, &RejectReason::AlgorithmNotAllowed);
}

#[tokio::test]
async fn test_rejects_tampered_payload() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k1", &TestClaims::valid());

    // Swap in a payload with an upgraded client id; the signature no
    // longer covers the content.
    let mut segments = token.split('.');
    let header = segments.next().unwrap();
    let payload = segments.next().unwrap();
    let signature = segments.next().unwrap();

    let decoded = URL_SAFE_NO_PAD.decode(payload).unwrap();
    let mut claims: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
    claims["cid"] = serde_json::Value::String("client-b".to_string());
    let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());

    let forged = format!("{header}.{forged_payload}.{signature}");
    let decision = verifier.verify(&forged).await;

    assert_rejected_with(&decision, &RejectReason::SignatureInvalid);
}

#[tokio::test]
async fn test_rejects_missing_kid() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    // Sign without a kid: key selection would be ambiguous.
    let encoding_key =
        jsonwebtoken::EncodingKey::from_rsa_pem(RSA_PRIVATE_KEY_PEM.as_bytes()).unwrap();
    let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    let token = jsonwebtoken::encode(&header, &TestClaims::valid(), &encoding_key).unwrap();

    let decision = verifier.verify(&token).await;
    assert_rejected_with(&decision, &RejectReason::MissingKeyId);

    // No key lookup should have happened at all.
    assert_eq!(jwks_request_count(&server).await, 0);
}

#[tokio::test]
async fn test_rejects_malformed_token() {
    let server = MockServer::start().await;
    mount_jwks(&server, jwks_document(&[rsa_jwk_json("k1")]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let decision = verifier.verify("not-a-token").await;
    assert_rejected_with(&decision, &RejectReason::MalformedToken);
}

#[tokio::test]
async fn test_rejects_unsupported_key_type() {
    let server = MockServer::start().await;
    let okp_key = serde_json::json!({
        "kty": "OKP",
        "kid": "okp1",
        "crv": "Ed25519",
        "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"
    });
    mount_jwks(&server, jwks_document(&[okp_key]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("okp1", &TestClaims::valid());
    let decision = verifier.verify(&token).await;

    assert_rejected_with(&decision, &RejectReason::UnsupportedKeyType);
}

#[tokio::test]
async fn test_entries_without_kid_are_dropped() {
    let server = MockServer::start().await;
    // A keyless entry must never become an implicit default.
    let anonymous_key = serde_json::json!({
        "kty": "RSA",
        "use": "sig",
        "n": RSA_N,
        "e": RSA_E
    });
    mount_jwks(&server, jwks_document(&[anonymous_key]), Some(3600), None).await;

    let config = test_config(&server, &[]);
    let verifier = verifier_for(&config);

    let token = sign_rs256("k1", &TestClaims::valid());
    let decision = verifier.verify(&token).await;

    assert_rejected_with(&decision, &RejectReason::UnknownSigningKey);
}
