//! Keystore capability.
//!
//! Private keys never leave the keystore; callers address them by alias
//! (the token serial) and only ever see public keys and signatures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use tokio::sync::RwLock;
use tracing::debug;

use crate::crypto::base64_to_base32;
use crate::error::{PushError, PushResult};

/// Default RSA modulus size for device keys.
pub const DEFAULT_KEY_SIZE_BITS: usize = 4096;

/// Asymmetric key operations scoped by alias.
///
/// Implementations may be backed by a platform keystore (Android Keystore,
/// iOS Keychain) or by software keys for development.
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Generate (or replace) the keypair for `alias`; returns the public key
    /// as SPKI PEM.
    async fn generate_key_pair(&self, alias: &str, bits: usize) -> PushResult<String>;

    /// Sign `message` with the private key for `alias` (RSA PKCS#1 v1.5,
    /// SHA-256); returns the signature as Base64.
    async fn sign(&self, alias: &str, message: &[u8]) -> PushResult<String>;

    /// Remove the private key for `alias`.
    async fn delete_key(&self, alias: &str) -> PushResult<()>;
}

/// In-memory RSA keystore.
#[derive(Debug, Clone, Default)]
pub struct SoftwareKeystore {
    keys: Arc<RwLock<HashMap<String, RsaPrivateKey>>>,
}

impl SoftwareKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an existing key under `alias`.
    pub async fn insert(&self, alias: impl Into<String>, key: RsaPrivateKey) {
        self.keys.write().await.insert(alias.into(), key);
    }

    pub async fn get(&self, alias: &str) -> Option<RsaPrivateKey> {
        self.keys.read().await.get(alias).cloned()
    }

    pub async fn contains(&self, alias: &str) -> bool {
        self.keys.read().await.contains_key(alias)
    }

    pub async fn aliases(&self) -> Vec<String> {
        self.keys.read().await.keys().cloned().collect()
    }
}

/// Generate an RSA key off the async worker threads.
pub async fn generate_rsa_key(bits: usize) -> PushResult<RsaPrivateKey> {
    tokio::task::spawn_blocking(move || RsaPrivateKey::new(&mut rand::thread_rng(), bits))
        .await
        .map_err(PushError::keystore)?
        .map_err(PushError::keystore)
}

pub fn public_key_pem(key: &RsaPrivateKey) -> PushResult<String> {
    key.to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(PushError::keystore)
}

/// PKCS#1 v1.5 / SHA-256 signature, Base64-encoded.
pub fn sign_base64(key: &RsaPrivateKey, message: &[u8]) -> String {
    let signature = SigningKey::<Sha256>::new(key.clone()).sign(message);
    BASE64.encode(signature.to_vec())
}

/// Sign `message` with `alias` and re-encode for the wire (Base32).
pub async fn sign_for_wire(keystore: &dyn Keystore, alias: &str, message: &str) -> PushResult<String> {
    let signature = keystore.sign(alias, message.as_bytes()).await?;
    base64_to_base32(&signature)
}

#[async_trait]
impl Keystore for SoftwareKeystore {
    async fn generate_key_pair(&self, alias: &str, bits: usize) -> PushResult<String> {
        let key = generate_rsa_key(bits).await?;
        let pem = public_key_pem(&key)?;
        self.keys.write().await.insert(alias.to_string(), key);
        debug!(alias = %alias, bits, "generated key pair");
        Ok(pem)
    }

    async fn sign(&self, alias: &str, message: &[u8]) -> PushResult<String> {
        let key = self.get(alias).await.ok_or_else(|| PushError::Keystore {
            message: format!("no key for alias {}", alias),
        })?;
        Ok(sign_base64(&key, message))
    }

    async fn delete_key(&self, alias: &str) -> PushResult<()> {
        match self.keys.write().await.remove(alias) {
            Some(_) => Ok(()),
            None => Err(PushError::Keystore {
                message: format!("no key for alias {}", alias),
            }),
        }
    }
}
