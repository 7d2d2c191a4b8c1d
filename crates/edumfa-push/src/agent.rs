//! Device-side orchestration: enrollment, polling, responses and
//! notification actions over one shared token repository and ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::CallbackClient;
use crate::config::ClientConfig;
use crate::descriptor::parse_token;
use crate::error::{PushError, PushResult};
use crate::inbound::{InboundMessage, PushIntake};
use crate::keystore::Keystore;
use crate::ledger::RequestLedger;
use crate::poll::ChallengePoller;
use crate::repository::TokenRepository;
use crate::respond::{Acknowledger, ResponseService};
use crate::rollout::{PushHandleProvider, RolloutEngine, RolloutOutcome};
use crate::types::{Decision, PushRequest, Token};

/// Quick action chosen on a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Accept,
    Decline,
    /// Open the app; no status change.
    Tap,
}

impl NotificationAction {
    fn decision(self) -> Option<Decision> {
        match self {
            Self::Accept => Some(Decision::Accept),
            Self::Decline => Some(Decision::Decline),
            Self::Tap => None,
        }
    }
}

/// Token as stored after enrollment plus the rollout result.
#[derive(Debug)]
pub struct Enrollment {
    pub token: Token,
    pub outcome: RolloutOutcome,
}

/// Summary of one guarded poll.
#[derive(Debug, Default)]
pub struct PollReport {
    /// Verified challenges returned by the servers.
    pub found: usize,
    /// Challenges new to the ledger.
    pub added: usize,
    pub failed: usize,
    pub error: Option<PushError>,
}

impl PollReport {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Clears the in-flight flag on drop.
struct PollInFlight<'a>(&'a AtomicBool);

impl Drop for PollInFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct PushAgent {
    config: ClientConfig,
    repository: Arc<dyn TokenRepository>,
    keystore: Arc<dyn Keystore>,
    ledger: RequestLedger,
    engine: RolloutEngine,
    poller: ChallengePoller,
    responder: ResponseService,
    intake: PushIntake,
    polling: Arc<AtomicBool>,
}

impl PushAgent {
    pub fn new(
        config: ClientConfig,
        repository: Arc<dyn TokenRepository>,
        keystore: Arc<dyn Keystore>,
        push_handle: Arc<dyn PushHandleProvider>,
    ) -> PushResult<Self> {
        let client = CallbackClient::new(&config)?;
        let ledger = RequestLedger::new();
        let engine = RolloutEngine::new(
            repository.clone(),
            keystore.clone(),
            push_handle,
            client.clone(),
        )
        .with_key_size_bits(config.key_size_bits);
        let poller = ChallengePoller::new(keystore.clone(), client.clone());
        let responder = ResponseService::new(keystore.clone(), client);
        let intake = PushIntake::new(repository.clone(), ledger.clone());

        Ok(Self {
            config,
            repository,
            keystore,
            ledger,
            engine,
            poller,
            responder,
            intake,
            polling: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share an existing ledger (e.g. one restored from disk).
    pub fn with_ledger(mut self, ledger: RequestLedger) -> Self {
        self.intake = PushIntake::new(self.repository.clone(), ledger.clone());
        self.ledger = ledger;
        self
    }

    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn Acknowledger>) -> Self {
        self.responder = self.responder.with_acknowledger(acknowledger);
        self
    }

    pub fn ledger(&self) -> &RequestLedger {
        &self.ledger
    }

    pub fn engine(&self) -> &RolloutEngine {
        &self.engine
    }

    pub fn intake(&self) -> &PushIntake {
        &self.intake
    }

    pub async fn tokens(&self) -> PushResult<Vec<Token>> {
        self.repository.list().await
    }

    /// Parse `uri`, store the token and roll it out.
    ///
    /// An already known serial keeps the stored token.
    pub async fn enroll(&self, uri: &str) -> PushResult<Enrollment> {
        let token = parse_token(uri)?;
        if !self.repository.insert(token.clone()).await? {
            debug!(serial = %token.id, "token already enrolled");
        }
        let outcome = self.engine.rollout(&token).await;
        let token = self
            .repository
            .get(&token.id)
            .await?
            .ok_or_else(|| PushError::TokenNotFound {
                serial: token.id.clone(),
            })?;
        Ok(Enrollment { token, outcome })
    }

    /// Roll out again, resetting a failed token first.
    pub async fn retry_rollout(&self, id: &str) -> PushResult<RolloutOutcome> {
        let token = self.get_token(id).await?;
        if token.is_completed() {
            return Err(PushError::AlreadyProcessed {
                serial: token.id,
                state: token.rollout_state,
            });
        }
        let token = if token.rollout_state.is_failed() {
            self.engine.reset(id).await?
        } else {
            token
        };
        Ok(self.engine.rollout(&token).await)
    }

    /// Remove a token and its key.
    ///
    /// Keystore failures are logged; the record is removed regardless.
    pub async fn delete_token(&self, id: &str) -> PushResult<bool> {
        let Some(token) = self.repository.get(id).await? else {
            return Ok(false);
        };
        if token.public_key.is_some() {
            if let Err(e) = self.keystore.delete_key(id).await {
                warn!(serial = %id, error = %e, "failed to delete key");
            }
        }
        let removed = self.repository.remove(id).await?;
        info!(serial = %id, "token deleted");
        Ok(removed)
    }

    /// Poll all completed tokens into the ledger.
    ///
    /// Returns `None` while another poll is running.
    pub async fn poll(&self) -> Option<PollReport> {
        if self
            .polling
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("poll already running");
            return None;
        }
        let _in_flight = PollInFlight(&self.polling);

        let tokens = match self.repository.list().await {
            Ok(tokens) => tokens,
            Err(error) => {
                return Some(PollReport {
                    error: Some(error),
                    ..PollReport::default()
                })
            }
        };

        let batch = self.poller.poll_all(&tokens).await;
        let found = batch.challenges.len();
        let mut added = 0;
        for challenge in batch.challenges {
            if self.ledger.add(challenge).await {
                added += 1;
            }
        }
        if added > 0 {
            info!(found, added, "new push requests");
        }
        Some(PollReport {
            found,
            added,
            failed: batch.failed,
            error: batch.error,
        })
    }

    pub async fn accept(&self, request_id: &str) -> PushResult<PushRequest> {
        self.decide(request_id, Decision::Accept).await
    }

    pub async fn decline(&self, request_id: &str) -> PushResult<PushRequest> {
        self.decide(request_id, Decision::Decline).await
    }

    /// Record `decision` and submit it. Only pending requests are answered;
    /// a failed submission restores the previous status.
    async fn decide(&self, request_id: &str, decision: Decision) -> PushResult<PushRequest> {
        let request = self
            .ledger
            .get_by_id(request_id)
            .await
            .ok_or_else(|| PushError::RequestNotFound {
                id: request_id.to_string(),
            })?;
        if !request.is_pending() {
            return Err(PushError::AlreadyAnswered {
                id: request.id,
                status: request.status,
            });
        }
        let tokens = self.repository.list().await?;
        let token = crate::respond::find_token_for_request(&tokens, &request)
            .cloned()
            .ok_or_else(|| PushError::TokenNotFound {
                serial: request.serial.clone(),
            })?;

        self.ledger.update_status(&request.id, decision.status()).await;
        if let Err(error) = self.responder.respond(&request, &token, decision).await {
            warn!(id = %request.id, error = %error, "response failed, restoring status");
            self.ledger.update_status(&request.id, request.status).await;
            return Err(error);
        }

        Ok(PushRequest {
            status: decision.status(),
            ..request
        })
    }

    /// Handle a notification quick action.
    ///
    /// Polls first so the request is known, then looks it up by id, falling
    /// back to nonce. `Ok(None)` when neither matches.
    pub async fn handle_action(
        &self,
        action: NotificationAction,
        request_id: Option<&str>,
        nonce: Option<&str>,
    ) -> PushResult<Option<PushRequest>> {
        if let Some(report) = self.poll().await {
            if let Some(error) = &report.error {
                debug!(error = %error, "poll before action reported errors");
            }
        }

        let mut request = None;
        if let Some(id) = request_id {
            request = self.ledger.get_by_id(id).await;
        }
        if request.is_none() {
            if let Some(nonce) = nonce {
                request = self.ledger.get_by_nonce(nonce).await;
            }
        }
        let Some(request) = request else {
            warn!(?request_id, ?nonce, "no push request for notification action");
            return Ok(None);
        };

        match action.decision() {
            Some(decision) => self.decide(&request.id, decision).await.map(Some),
            None => Ok(Some(request)),
        }
    }

    /// Expire pending requests older than the configured max age.
    pub async fn expire_stale(&self) -> usize {
        self.ledger
            .expire_stale(self.config.request_max_age_ms, Utc::now().timestamp_millis())
            .await
    }

    /// Feed inbound messages into the ledger until the channel closes.
    pub async fn drain_inbound(&self, receiver: mpsc::Receiver<InboundMessage>) -> usize {
        self.intake.drain(receiver).await
    }

    async fn get_token(&self, id: &str) -> PushResult<Token> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| PushError::TokenNotFound {
                serial: id.to_string(),
            })
    }
}
