//! Shared fixtures: a server signing key, device keystores and tokens.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use data_encoding::BASE32;
use edumfa_push::crypto::{challenge_signed_data, strip_newlines};
use edumfa_push::{
    ClientConfig, Keystore, PushError, PushResult, RolloutState, SoftwareKeystore, Token,
};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::RsaPrivateKey;
use url::Url;
use wiremock::MockServer;

pub const TEST_KEY_BITS: usize = 1024;

pub fn test_config() -> ClientConfig {
    ClientConfig::default()
        .with_timeout_secs(5)
        .with_key_size_bits(TEST_KEY_BITS)
}

/// The eduMFA server's signing key.
pub struct ServerKey {
    pub private: RsaPrivateKey,
    pub pem: String,
}

impl ServerKey {
    pub fn generate() -> Self {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), TEST_KEY_BITS).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        Self { private, pem }
    }

    /// Public key as stored on the token after rollout.
    pub fn stored(&self) -> String {
        strip_newlines(&self.pem)
    }

    pub fn sign_base32(&self, message: &str) -> String {
        let signature = SigningKey::<Sha256>::new(self.private.clone()).sign(message.as_bytes());
        BASE32.encode(&signature.to_vec())
    }

    /// A poll record for `serial` signed by this key.
    pub fn challenge(&self, nonce: &str, serial: &str) -> serde_json::Value {
        let url = "https://mfa.example.org";
        let title = "eduMFA";
        let signature = self.sign_base32(&challenge_signed_data(nonce, url, serial, title, "1"));
        serde_json::json!({
            "nonce": nonce,
            "question": "Do you want to log in?",
            "serial": serial,
            "signature": signature,
            "sslverify": "1",
            "title": title,
            "url": url,
        })
    }

    /// Body returned by the enrollment endpoint.
    pub fn enrollment_body(&self) -> serde_json::Value {
        serde_json::json!({
            "detail": {"public_key": self.pem},
            "result": {"status": true, "value": true}
        })
    }
}

pub fn poll_body(records: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({"result": {"status": true, "value": records}})
}

pub fn callback(server: &MockServer) -> Url {
    Url::parse(&format!("{}/ttype/push", server.uri())).unwrap()
}

/// An address nothing listens on.
pub fn dead_callback() -> Url {
    Url::parse("http://127.0.0.1:1/ttype/push").unwrap()
}

pub fn pending_token(id: &str, callback_url: Url) -> Token {
    Token::new(id, callback_url).with_enrollment_credential("enroll-secret")
}

pub fn completed_token(id: &str, callback_url: Url, server: &ServerKey) -> Token {
    let mut token = pending_token(id, callback_url);
    token.rollout_state = RolloutState::Completed;
    token.public_key = Some("device-key".to_string());
    token.server_public_key = Some(server.stored());
    token
}

pub fn descriptor(server: &MockServer, serial: &str) -> String {
    format!(
        "edumfa://push/eduMFA:alice?v=1&serial={}&url={}&enrollment_credential=enroll-secret&ttl=10&sslverify=1",
        serial,
        callback(server)
    )
}

/// Verify a device signature (Base32) with the keystore's key for `alias`.
pub async fn verify_device_signature(
    keystore: &SoftwareKeystore,
    alias: &str,
    message: &str,
    signature_b32: &str,
) -> bool {
    let public = keystore.get(alias).await.unwrap().to_public_key();
    let raw = BASE32.decode(signature_b32.as_bytes()).unwrap();
    let signature = Signature::try_from(raw.as_slice()).unwrap();
    VerifyingKey::<Sha256>::new(public)
        .verify(message.as_bytes(), &signature)
        .is_ok()
}

/// Software keystore that counts key generations.
#[derive(Default, Clone)]
pub struct CountingKeystore {
    pub inner: SoftwareKeystore,
    pub generated: Arc<AtomicUsize>,
}

impl CountingKeystore {
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Keystore for CountingKeystore {
    async fn generate_key_pair(&self, alias: &str, bits: usize) -> PushResult<String> {
        self.generated.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_key_pair(alias, bits).await
    }

    async fn sign(&self, alias: &str, message: &[u8]) -> PushResult<String> {
        self.inner.sign(alias, message).await
    }

    async fn delete_key(&self, alias: &str) -> PushResult<()> {
        self.inner.delete_key(alias).await
    }
}

/// Keystore whose every operation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokenKeystore;

#[async_trait]
impl Keystore for BrokenKeystore {
    async fn generate_key_pair(&self, _alias: &str, _bits: usize) -> PushResult<String> {
        Err(PushError::Keystore {
            message: "secure element unavailable".into(),
        })
    }

    async fn sign(&self, _alias: &str, _message: &[u8]) -> PushResult<String> {
        Err(PushError::Keystore {
            message: "secure element unavailable".into(),
        })
    }

    async fn delete_key(&self, _alias: &str) -> PushResult<()> {
        Err(PushError::Keystore {
            message: "secure element unavailable".into(),
        })
    }
}
