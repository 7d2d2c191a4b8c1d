//! Integration tests for challenge polling and signed responses.

mod common;

use std::sync::Arc;

use common::*;
use edumfa_push::crypto::{poll_message, response_message};
use edumfa_push::{
    CallbackClient, ChallengePoller, Decision, Keystore, PushError, PushRequest,
    PushRequestStatus, ResponseService, RolloutState, SoftwareKeystore,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn keystore_with(aliases: &[&str]) -> SoftwareKeystore {
    let keystore = SoftwareKeystore::new();
    for alias in aliases {
        keystore.generate_key_pair(alias, TEST_KEY_BITS).await.unwrap();
    }
    keystore
}

fn poller(keystore: &SoftwareKeystore) -> ChallengePoller {
    ChallengePoller::new(
        Arc::new(keystore.clone()),
        CallbackClient::new(&test_config()).unwrap(),
    )
}

#[tokio::test]
async fn test_poll_batch_isolates_failing_token() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();

    for serial in ["A", "C"] {
        Mock::given(method("GET"))
            .and(path("/ttype/push"))
            .and(query_param("serial", serial))
            .respond_with(ResponseTemplate::new(200).set_body_json(poll_body(vec![
                server_key.challenge(&format!("nonce-{}", serial), serial),
            ])))
            .expect(1)
            .mount(&server)
            .await;
    }

    let tokens = vec![
        completed_token("A", callback(&server), &server_key),
        completed_token("B", dead_callback(), &server_key),
        completed_token("C", callback(&server), &server_key),
    ];
    let keystore = keystore_with(&["A", "B", "C"]).await;

    let batch = poller(&keystore).poll_all(&tokens).await;

    let mut nonces: Vec<&str> = batch.challenges.iter().map(|c| c.nonce.as_str()).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec!["nonce-A", "nonce-C"]);
    assert_eq!(batch.failed, 1);
    assert!(!batch.success());
    let error = batch.error.unwrap();
    assert!(matches!(error, PushError::PollFailed { failed: 1 }));
    assert_eq!(error.to_string(), "1 token(s) failed to poll");

    for challenge in &batch.challenges {
        assert!(challenge.id.starts_with(&format!("poll-{}-", challenge.nonce)));
        assert_eq!(challenge.status, PushRequestStatus::Pending);
    }
}

#[tokio::test]
async fn test_poll_token_reports_specific_error() {
    let server_key = ServerKey::generate();
    let keystore = keystore_with(&["B"]).await;
    let token = completed_token("B", dead_callback(), &server_key);

    let result = poller(&keystore).poll_token(&token).await;
    assert_eq!(result.serial, "B");
    assert!(result.challenges.is_empty());
    assert!(matches!(result.error, Some(PushError::Network { .. })));
}

#[tokio::test]
async fn test_unverifiable_challenge_is_dropped() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    let impostor = ServerKey::generate();

    let mut tampered = server_key.challenge("nonce-tampered", "S1");
    tampered["question"] = "still fine, not signed".into();
    tampered["title"] = "changed".into();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(poll_body(vec![
            server_key.challenge("nonce-good", "S1"),
            impostor.challenge("nonce-forged", "S1"),
            tampered,
            serde_json::json!({"nonce": "nonce-broken"}),
        ])))
        .mount(&server)
        .await;

    let keystore = keystore_with(&["S1"]).await;
    let token = completed_token("S1", callback(&server), &server_key);

    let batch = poller(&keystore).poll_all(&[token]).await;
    assert!(batch.success());
    assert_eq!(batch.challenges.len(), 1);
    assert_eq!(batch.challenges[0].nonce, "nonce-good");
}

#[tokio::test]
async fn test_only_completed_tokens_are_polled() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut failed = pending_token("P", callback(&server));
    failed.rollout_state = RolloutState::SendRSAPublicKeyFailed;
    let tokens = vec![failed, completed_token("S1", callback(&server), &server_key)];
    let keystore = keystore_with(&["P", "S1"]).await;

    let batch = poller(&keystore).poll_all(&tokens).await;
    assert!(batch.success());
    assert!(batch.challenges.is_empty());
}

#[tokio::test]
async fn test_poll_request_is_signed_by_device_key() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let keystore = keystore_with(&["S1"]).await;
    let token = completed_token("S1", callback(&server), &server_key);
    let batch = poller(&keystore).poll_all(&[token]).await;
    assert!(batch.success());

    let requests = server.received_requests().await.unwrap();
    let query: std::collections::HashMap<String, String> = requests[0]
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let timestamp = &query["timestamp"];
    assert!(timestamp.ends_with('Z'));
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    assert!(
        verify_device_signature(
            &keystore,
            "S1",
            &poll_message("S1", timestamp),
            &query["signature"]
        )
        .await
    );
}

fn pending_request(serial: &str) -> PushRequest {
    PushRequest {
        id: "poll-n1-1".into(),
        status: PushRequestStatus::Pending,
        sent_at: 1,
        nonce: "n1".into(),
        question: "Log in?".into(),
        serial: serial.into(),
        signature: "SIG".into(),
        sslverify: "1".into(),
        title: "eduMFA".into(),
        url: "https://mfa.example.org".into(),
    }
}

#[tokio::test]
async fn test_respond_signs_decline() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    Mock::given(method("POST"))
        .and(path("/ttype/push"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let keystore = keystore_with(&["S1"]).await;
    let token = completed_token("S1", callback(&server), &server_key);
    let service = ResponseService::new(
        Arc::new(keystore.clone()),
        CallbackClient::new(&test_config()).unwrap(),
    );

    service
        .respond(&pending_request("S1"), &token, Decision::Decline)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["nonce"], "n1");
    assert_eq!(body["serial"], "S1");
    assert_eq!(body["decline"], 1);
    assert!(
        verify_device_signature(
            &keystore,
            "S1",
            &response_message("n1", "S1", true),
            body["signature"].as_str().unwrap()
        )
        .await
    );
}

#[tokio::test]
async fn test_respond_non_200_is_failure() {
    let server = MockServer::start().await;
    let server_key = ServerKey::generate();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("nonce expired"))
        .mount(&server)
        .await;

    let keystore = keystore_with(&["S1"]).await;
    let token = completed_token("S1", callback(&server), &server_key);
    let service = ResponseService::new(
        Arc::new(keystore),
        CallbackClient::new(&test_config()).unwrap(),
    );

    let err = service
        .respond(&pending_request("S1"), &token, Decision::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, PushError::Http { status: 400, .. }));
}
