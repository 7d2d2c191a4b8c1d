//! Inbound challenge delivery.
//!
//! The notification transport pushes [`InboundMessage`]s into a channel;
//! [`PushIntake`] drains it, verifies each challenge against the token's
//! server key and records it in the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::crypto::{challenge_signed_data, verify_server_signature};
use crate::ledger::RequestLedger;
use crate::repository::TokenRepository;
use crate::types::{PushRequest, PushRequestStatus};

/// Category carried by push authentication notifications.
pub const PUSH_AUTHENTICATION_CATEGORY: &str = "PUSH_AUTHENTICATION";

/// Fields every push authentication payload must carry.
const REQUIRED_FIELDS: [&str; 6] = ["nonce", "question", "serial", "signature", "sslverify", "title"];

/// A message as delivered by the notification transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub sent_time: Option<i64>,
}

pub fn inbound_channel(capacity: usize) -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
    mpsc::channel(capacity)
}

/// Parse a transport message into a pending push request.
///
/// `None` unless the category is push authentication and every required
/// field is present.
pub fn parse_push_request(message: &InboundMessage, now_ms: i64) -> Option<PushRequest> {
    if message.category.as_deref() != Some(PUSH_AUTHENTICATION_CATEGORY) {
        debug!(category = ?message.category, "ignoring non push-authentication message");
        return None;
    }
    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !message.data.contains_key(**f)) {
        warn!(field = %missing, "push message missing field");
        return None;
    }

    let field = |name: &str| message.data.get(name).cloned().unwrap_or_default();
    let nonce = field("nonce");
    let id = message
        .message_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("{}-{}", nonce, now_ms));

    Some(PushRequest {
        id,
        status: PushRequestStatus::Pending,
        sent_at: message.sent_time.unwrap_or(now_ms),
        question: field("question"),
        serial: field("serial"),
        signature: field("signature"),
        sslverify: field("sslverify"),
        title: field("title"),
        url: field("url"),
        nonce,
    })
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Added,
    Duplicate,
    /// Not a push challenge, or malformed.
    Ignored,
    /// Unknown token, missing server key or bad signature.
    Rejected,
}

/// Verify-then-record intake for pushed challenges.
#[derive(Clone)]
pub struct PushIntake {
    repository: Arc<dyn TokenRepository>,
    ledger: RequestLedger,
}

impl PushIntake {
    pub fn new(repository: Arc<dyn TokenRepository>, ledger: RequestLedger) -> Self {
        Self { repository, ledger }
    }

    pub async fn accept(&self, message: &InboundMessage, now_ms: i64) -> IntakeOutcome {
        let Some(request) = parse_push_request(message, now_ms) else {
            return IntakeOutcome::Ignored;
        };

        let server_public_key = match self.repository.get(&request.serial).await {
            Ok(Some(token)) => token.server_public_key,
            Ok(None) => {
                warn!(serial = %request.serial, "push for unknown token");
                return IntakeOutcome::Rejected;
            }
            Err(e) => {
                warn!(serial = %request.serial, error = %e, "token lookup failed");
                return IntakeOutcome::Rejected;
            }
        };
        let Some(server_public_key) = server_public_key else {
            warn!(serial = %request.serial, "push for token without server key");
            return IntakeOutcome::Rejected;
        };

        let signed = challenge_signed_data(
            &request.nonce,
            &request.url,
            &request.serial,
            &request.title,
            &request.sslverify,
        );
        match verify_server_signature(&server_public_key, &signed, &request.signature) {
            Ok(true) => {}
            Ok(false) => {
                warn!(serial = %request.serial, nonce = %request.nonce, "push signature invalid");
                return IntakeOutcome::Rejected;
            }
            Err(e) => {
                warn!(serial = %request.serial, error = %e, "cannot verify push");
                return IntakeOutcome::Rejected;
            }
        }

        if self.ledger.add(request).await {
            IntakeOutcome::Added
        } else {
            IntakeOutcome::Duplicate
        }
    }

    /// Consume `receiver` until every sender is dropped. Returns the number
    /// of requests added.
    pub async fn drain(&self, mut receiver: mpsc::Receiver<InboundMessage>) -> usize {
        let mut added = 0;
        while let Some(message) = receiver.recv().await {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if self.accept(&message, now_ms).await == IntakeOutcome::Added {
                added += 1;
            }
        }
        debug!(added, "inbound channel closed");
        added
    }
}
