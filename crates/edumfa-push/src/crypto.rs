//! Message canonicalization, signature transcoding and server signature
//! verification.
//!
//! All signatures are RSA PKCS#1 v1.5 over SHA-256. The keystore produces
//! Base64; the wire format wants RFC 4648 Base32.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use data_encoding::{BASE32, BASE32_NOPAD};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;

use crate::error::{PushError, PushResult};
use crate::types::ChallengeRecord;

/// Remove `-----BEGIN ...-----` / `-----END ...-----` lines and all whitespace.
pub fn strip_pem_armor(pem: &str) -> String {
    let mut out = String::with_capacity(pem.len());
    let mut rest = pem;
    while let Some(start) = rest.find("-----") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 5..];
        match after.find("-----") {
            Some(end) => rest = &after[end + 5..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.retain(|c| !c.is_whitespace());
    out
}

/// Server keys arrive with literal newlines; they are stored without them.
pub fn strip_newlines(key: &str) -> String {
    key.replace(['\n', '\r'], "")
}

/// Re-encode a Base64 signature as padded Base32.
pub fn base64_to_base32(signature_b64: &str) -> PushResult<String> {
    let raw = BASE64
        .decode(signature_b64.trim())
        .map_err(|e| PushError::keystore(format!("keystore returned invalid base64: {}", e)))?;
    Ok(BASE32.encode(&raw))
}

/// `"{serial}|{timestamp}"`
pub fn poll_message(serial: &str, timestamp: &str) -> String {
    format!("{}|{}", serial, timestamp)
}

/// `"{nonce}|{serial}"`, with `"|decline"` appended when declining.
pub fn response_message(nonce: &str, serial: &str, decline: bool) -> String {
    let mut msg = format!("{}|{}", nonce, serial);
    if decline {
        msg.push_str("|decline");
    }
    msg
}

/// `"1"` is the only truthy wire value.
fn normalize_sslverify(sslverify: &str) -> u8 {
    u8::from(sslverify == "1")
}

/// Payload the server signs for each challenge:
/// `"{nonce}|{url}|{serial}|{title}|{0|1}"`.
pub fn challenge_signed_data(nonce: &str, url: &str, serial: &str, title: &str, sslverify: &str) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        nonce,
        url,
        serial,
        title,
        normalize_sslverify(sslverify)
    )
}

pub fn record_signed_data(record: &ChallengeRecord) -> String {
    challenge_signed_data(
        &record.nonce,
        &record.url,
        &record.serial,
        &record.title,
        &record.sslverify,
    )
}

/// Decode a server public key: PEM (with or without newlines) or bare
/// Base64, holding either SPKI or PKCS#1 DER.
pub fn decode_public_key(key: &str) -> PushResult<RsaPublicKey> {
    let der = BASE64
        .decode(strip_pem_armor(key))
        .map_err(|e| PushError::invalid_response(format!("invalid base64 public key: {}", e)))?;

    RsaPublicKey::from_public_key_der(&der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
        .map_err(|e| PushError::invalid_response(format!("invalid RSA public key: {}", e)))
}

/// Signature bytes from the server's encoding.
///
/// Base32 is tried first, then Base64. Returns every candidate decoding.
fn signature_candidates(signature: &str) -> Vec<Vec<u8>> {
    let sig = signature.trim();
    let mut candidates = Vec::new();
    let upper = sig.to_ascii_uppercase();
    if let Ok(bytes) = BASE32.decode(upper.as_bytes()) {
        candidates.push(bytes);
    } else if let Ok(bytes) = BASE32_NOPAD.decode(upper.as_bytes()) {
        candidates.push(bytes);
    }
    if let Ok(bytes) = BASE64.decode(sig) {
        candidates.push(bytes);
    }
    candidates
}

/// Verify `signature` over `message` against the server public key.
///
/// Errors only when the key itself cannot be decoded; a signature that does
/// not verify is `Ok(false)`.
pub fn verify_server_signature(
    server_public_key: &str,
    message: &str,
    signature: &str,
) -> PushResult<bool> {
    let key = decode_public_key(server_public_key)?;
    let verifying_key = VerifyingKey::<Sha256>::new(key);

    Ok(signature_candidates(signature).iter().any(|bytes| {
        Signature::try_from(bytes.as_slice())
            .map(|sig| verifying_key.verify(message.as_bytes(), &sig).is_ok())
            .unwrap_or(false)
    }))
}

/// Verify a challenge record's own signature against the server key.
pub fn verify_challenge(server_public_key: &str, record: &ChallengeRecord) -> PushResult<bool> {
    verify_server_signature(server_public_key, &record_signed_data(record), &record.signature)
}
