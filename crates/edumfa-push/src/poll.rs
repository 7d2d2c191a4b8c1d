//! Challenge polling across completed tokens.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::CallbackClient;
use crate::crypto::{poll_message, verify_challenge};
use crate::error::{PushError, PushResult};
use crate::keystore::{sign_for_wire, Keystore};
use crate::types::{ChallengeRecord, PushRequest, Token};

/// Poll outcome for a single token.
#[derive(Debug)]
pub struct TokenPollResult {
    pub serial: String,
    /// Verified challenges; empty on error.
    pub challenges: Vec<PushRequest>,
    pub error: Option<PushError>,
}

/// Aggregate of one batch poll.
#[derive(Debug, Default)]
pub struct PollBatch {
    /// Verified challenges from every token that answered.
    pub challenges: Vec<PushRequest>,
    /// Number of tokens whose poll failed.
    pub failed: usize,
    /// `PollFailed` when `failed > 0`.
    pub error: Option<PushError>,
}

impl PollBatch {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetches and verifies pending challenges.
#[derive(Clone)]
pub struct ChallengePoller {
    keystore: Arc<dyn Keystore>,
    client: CallbackClient,
}

impl ChallengePoller {
    pub fn new(keystore: Arc<dyn Keystore>, client: CallbackClient) -> Self {
        Self { keystore, client }
    }

    /// Poll every `Completed` token concurrently.
    pub async fn poll_all(&self, tokens: &[Token]) -> PollBatch {
        let polls = tokens
            .iter()
            .filter(|t| t.is_completed())
            .map(|token| self.poll_token(token));
        let results = join_all(polls).await;

        let mut batch = PollBatch::default();
        for result in results {
            if result.error.is_some() {
                batch.failed += 1;
            }
            batch.challenges.extend(result.challenges);
        }
        if batch.failed > 0 {
            batch.error = Some(PushError::PollFailed {
                failed: batch.failed,
            });
        }
        debug!(
            challenges = batch.challenges.len(),
            failed = batch.failed,
            "poll batch finished"
        );
        batch
    }

    pub async fn poll_token(&self, token: &Token) -> TokenPollResult {
        match self.fetch(token).await {
            Ok(challenges) => TokenPollResult {
                serial: token.id.clone(),
                challenges,
                error: None,
            },
            Err(error) => {
                warn!(serial = %token.id, error = %error, "poll failed");
                TokenPollResult {
                    serial: token.id.clone(),
                    challenges: Vec::new(),
                    error: Some(error),
                }
            }
        }
    }

    async fn fetch(&self, token: &Token) -> PushResult<Vec<PushRequest>> {
        let callback_url = token
            .callback_url
            .as_ref()
            .ok_or_else(|| PushError::MissingCallback {
                serial: token.id.clone(),
            })?;

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let signature = sign_for_wire(
            self.keystore.as_ref(),
            &token.id,
            &poll_message(&token.id, &timestamp),
        )
        .await?;

        let records = self
            .client
            .poll(callback_url, token.ssl_verify, &token.id, &timestamp, &signature)
            .await?;

        let received_at = Utc::now().timestamp_millis();
        Ok(records
            .into_iter()
            .filter_map(|raw| accept_record(token, raw, received_at))
            .collect())
    }
}

/// Decode and verify one raw record. Anything that fails is dropped.
fn accept_record(token: &Token, raw: serde_json::Value, received_at: i64) -> Option<PushRequest> {
    let record: ChallengeRecord = match serde_json::from_value(raw) {
        Ok(record) => record,
        Err(e) => {
            warn!(serial = %token.id, error = %e, "dropping malformed challenge");
            return None;
        }
    };

    let Some(server_public_key) = token.server_public_key.as_deref() else {
        warn!(serial = %token.id, nonce = %record.nonce, "no server key, dropping challenge");
        return None;
    };

    match verify_challenge(server_public_key, &record) {
        Ok(true) => {
            let id = format!("poll-{}-{}", record.nonce, received_at);
            Some(PushRequest::from_record(id, record, received_at))
        }
        Ok(false) => {
            warn!(serial = %token.id, nonce = %record.nonce, "challenge signature invalid");
            None
        }
        Err(e) => {
            warn!(serial = %token.id, nonce = %record.nonce, error = %e, "cannot verify challenge");
            None
        }
    }
}
