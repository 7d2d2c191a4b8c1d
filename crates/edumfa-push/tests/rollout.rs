//! Integration tests for the rollout engine.
//!
//! Uses wiremock for the enrollment endpoint. Tests cover the success path,
//! the failure variant of every step, the per-token concurrency guard and
//! reset/resume.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use edumfa_push::{
    CallbackClient, MemoryTokenRepository, PushError, RolloutEngine, RolloutOutcome, RolloutState,
    SoftwareKeystore, StaticPushHandle, Token, TokenRepository,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    repo: MemoryTokenRepository,
    keystore: CountingKeystore,
    engine: RolloutEngine,
}

fn harness_with(tokens: Vec<Token>, handle: &str) -> Harness {
    let repo = MemoryTokenRepository::with_tokens(tokens);
    let keystore = CountingKeystore::default();
    let engine = RolloutEngine::new(
        Arc::new(repo.clone()),
        Arc::new(keystore.clone()),
        Arc::new(StaticPushHandle::new(handle)),
        CallbackClient::new(&test_config()).unwrap(),
    )
    .with_key_size_bits(TEST_KEY_BITS);
    Harness {
        repo,
        keystore,
        engine,
    }
}

fn harness(tokens: Vec<Token>) -> Harness {
    harness_with(tokens, "fcm-token")
}

async fn stored(repo: &MemoryTokenRepository, id: &str) -> Token {
    repo.get(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_rollout_completes() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();

    Mock::given(method("POST"))
        .and(path("/ttype/push"))
        .and(body_partial_json(serde_json::json!({
            "enrollment_credential": "enroll-secret",
            "serial": "PIPU0001",
            "fbtoken": "fcm-token"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_key.enrollment_body()))
        .expect(1)
        .mount(&server)
        .await;

    let token = pending_token("PIPU0001", callback(&server));
    let h = harness(vec![token.clone()]);

    let outcome = h.engine.rollout(&token).await;
    match &outcome {
        RolloutOutcome::Completed { server_public_key } => {
            assert_eq!(server_public_key, &server_key.stored());
        }
        other => panic!("expected Completed, got {:?}", other),
    }

    let token = stored(&h.repo, "PIPU0001").await;
    assert_eq!(token.rollout_state, RolloutState::Completed);
    assert_eq!(token.server_public_key, Some(server_key.stored()));
    assert!(token
        .public_key
        .as_deref()
        .unwrap()
        .starts_with("-----BEGIN PUBLIC KEY-----"));
    assert!(!h.engine.is_rolling_out("PIPU0001"));

    // The submitted key is armor-free
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let pubkey = body["pubkey"].as_str().unwrap();
    assert!(!pubkey.contains("-----"));
    assert!(!pubkey.contains('\n'));
}

#[tokio::test]
async fn test_keygen_failure_maps_to_keygen_failed() {
    let token = pending_token("S1", dead_callback());
    let repo = MemoryTokenRepository::with_tokens(vec![token.clone()]);
    let engine = RolloutEngine::new(
        Arc::new(repo.clone()),
        Arc::new(BrokenKeystore),
        Arc::new(StaticPushHandle::new("fcm-token")),
        CallbackClient::new(&test_config()).unwrap(),
    );

    let outcome = engine.rollout(&token).await;
    assert_eq!(
        outcome.failed_state(),
        Some(RolloutState::RSAKeyGenerationFailed)
    );
    assert!(matches!(outcome.error(), Some(PushError::Keystore { .. })));

    let token = stored(&repo, "S1").await;
    assert_eq!(token.rollout_state, RolloutState::RSAKeyGenerationFailed);
    assert!(token.public_key.is_none());
    assert!(token.server_public_key.is_none());
}

#[tokio::test]
async fn test_network_failure_maps_to_send_failed() {
    let token = pending_token("S1", dead_callback());
    let h = harness(vec![token.clone()]);

    let outcome = h.engine.rollout(&token).await;
    assert_eq!(
        outcome.failed_state(),
        Some(RolloutState::SendRSAPublicKeyFailed)
    );
    assert!(matches!(outcome.error(), Some(PushError::Network { .. })));

    let token = stored(&h.repo, "S1").await;
    assert_eq!(token.rollout_state, RolloutState::SendRSAPublicKeyFailed);
    // Key generation had succeeded
    assert!(token.public_key.is_some());
    assert!(token.server_public_key.is_none());
}

#[tokio::test]
async fn test_server_error_maps_to_send_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let token = pending_token("S1", callback(&server));
    let h = harness(vec![token.clone()]);

    let outcome = h.engine.rollout(&token).await;
    assert_eq!(
        outcome.failed_state(),
        Some(RolloutState::SendRSAPublicKeyFailed)
    );
    assert!(matches!(
        outcome.error(),
        Some(PushError::Http { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_push_handle_failure_belongs_to_send_step() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let token = pending_token("S1", callback(&server));
    let h = harness_with(vec![token.clone()], "");

    let outcome = h.engine.rollout(&token).await;
    assert_eq!(
        outcome.failed_state(),
        Some(RolloutState::SendRSAPublicKeyFailed)
    );
    assert!(matches!(outcome.error(), Some(PushError::PushHandle { .. })));
}

#[tokio::test]
async fn test_malformed_response_maps_to_parsing_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": {"status": true}})),
        )
        .mount(&server)
        .await;

    let token = pending_token("S1", callback(&server));
    let h = harness(vec![token.clone()]);

    let outcome = h.engine.rollout(&token).await;
    assert_eq!(
        outcome.failed_state(),
        Some(RolloutState::ParsingResponseFailed)
    );
    assert!(matches!(
        outcome.error(),
        Some(PushError::InvalidResponse { .. })
    ));
    let token = stored(&h.repo, "S1").await;
    assert_eq!(token.rollout_state, RolloutState::ParsingResponseFailed);
    assert!(token.server_public_key.is_none());
}

#[tokio::test]
async fn test_missing_callback_fails_send_step() {
    let mut token = pending_token("S1", dead_callback());
    token.version = 2;
    token.callback_url = None;
    let h = harness(vec![token.clone()]);

    let outcome = h.engine.rollout(&token).await;
    assert_eq!(
        outcome.failed_state(),
        Some(RolloutState::SendRSAPublicKeyFailed)
    );
    assert!(matches!(
        outcome.error(),
        Some(PushError::MissingCallback { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_rollouts_same_token_run_once() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    Mock::given(method("POST"))
        .and(path("/ttype/push"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(server_key.enrollment_body())
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let token = pending_token("S1", callback(&server));
    let h = harness(vec![token.clone()]);

    let (first, second) = tokio::join!(h.engine.rollout(&token), h.engine.rollout(&token));

    let outcomes = [first, second];
    let completed = outcomes.iter().filter(|o| o.is_success()).count();
    let in_progress = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o,
                RolloutOutcome::Rejected {
                    error: PushError::RolloutInProgress { .. }
                }
            )
        })
        .count();
    assert_eq!(completed, 1);
    assert_eq!(in_progress, 1);
    assert_eq!(h.keystore.generated(), 1);
    assert!(h.engine.registry().is_empty());
}

#[tokio::test]
async fn test_finished_token_rejected_without_mutation() {
    let server_key = ServerKey::generate();
    let token = completed_token("S1", dead_callback(), &server_key);
    let h = harness(vec![token.clone()]);

    let outcome = h.engine.rollout(&token).await;
    assert!(matches!(
        outcome,
        RolloutOutcome::Rejected {
            error: PushError::AlreadyProcessed {
                state: RolloutState::Completed,
                ..
            }
        }
    ));
    assert_eq!(stored(&h.repo, "S1").await, token);
    assert_eq!(h.keystore.generated(), 0);

    let mut failed = pending_token("S2", dead_callback());
    failed.rollout_state = RolloutState::SendRSAPublicKeyFailed;
    h.repo.insert(failed.clone()).await.unwrap();
    let outcome = h.engine.rollout(&failed).await;
    assert!(matches!(outcome, RolloutOutcome::Rejected { .. }));
    assert_eq!(
        stored(&h.repo, "S2").await.rollout_state,
        RolloutState::SendRSAPublicKeyFailed
    );
}

#[tokio::test]
async fn test_reset_only_from_failed_state() {
    let mut failed = pending_token("S1", dead_callback());
    failed.rollout_state = RolloutState::ParsingResponseFailed;
    let pending = pending_token("S2", dead_callback());
    let h = harness(vec![failed, pending]);

    let reset = h.engine.reset("S1").await.unwrap();
    assert_eq!(reset.rollout_state, RolloutState::Pending);

    let err = h.engine.reset("S2").await.unwrap_err();
    assert!(matches!(
        err,
        PushError::InvalidTransition {
            from: RolloutState::Pending,
            to: RolloutState::Pending,
            ..
        }
    ));
    assert!(matches!(
        h.engine.reset("missing").await,
        Err(PushError::TokenNotFound { .. })
    ));
}

#[tokio::test]
async fn test_start_pending_rollouts_resumes_unfinished_tokens() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_key.enrollment_body()))
        .expect(2)
        .mount(&server)
        .await;

    let fresh = pending_token("A", callback(&server));
    let mut interrupted = pending_token("B", callback(&server));
    interrupted.rollout_state = RolloutState::SendRSAPublicKey;
    let done = completed_token("C", callback(&server), &server_key);
    let h = harness(vec![fresh, interrupted, done]);

    let handles = h.engine.start_pending_rollouts().await.unwrap();
    assert_eq!(handles.len(), 2);
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    for id in ["A", "B", "C"] {
        assert_eq!(
            stored(&h.repo, id).await.rollout_state,
            RolloutState::Completed
        );
    }
}

#[tokio::test]
async fn test_software_keystore_holds_key_after_rollout() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_key.enrollment_body()))
        .mount(&server)
        .await;

    let token = pending_token("S1", callback(&server));
    let repo = MemoryTokenRepository::with_tokens(vec![token.clone()]);
    let keystore = SoftwareKeystore::new();
    let engine = RolloutEngine::new(
        Arc::new(repo),
        Arc::new(keystore.clone()),
        Arc::new(StaticPushHandle::new("fcm-token")),
        CallbackClient::new(&test_config()).unwrap(),
    )
    .with_key_size_bits(TEST_KEY_BITS);

    assert!(engine.rollout(&token).await.is_success());
    assert_eq!(keystore.aliases().await, vec!["S1".to_string()]);
}
