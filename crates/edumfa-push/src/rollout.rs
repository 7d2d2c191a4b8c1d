//! Rollout engine: key generation, public key exchange and completion.
//!
//! Each step records its working state before doing any work, so a failure
//! always maps to the failed variant of the step that was running.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::CallbackClient;
use crate::crypto::strip_pem_armor;
use crate::error::{PushError, PushResult};
use crate::keystore::{Keystore, DEFAULT_KEY_SIZE_BITS};
use crate::repository::TokenRepository;
use crate::types::{EnrollmentRequest, RolloutState, Token, TokenUpdate};

/// Source of the push delivery handle (e.g. an FCM registration token).
#[async_trait]
pub trait PushHandleProvider: Send + Sync {
    async fn push_handle(&self) -> PushResult<String>;
}

/// Fixed push handle.
#[derive(Debug, Clone)]
pub struct StaticPushHandle(pub String);

impl StaticPushHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }
}

#[async_trait]
impl PushHandleProvider for StaticPushHandle {
    async fn push_handle(&self) -> PushResult<String> {
        if self.0.is_empty() {
            return Err(PushError::PushHandle {
                message: "no push handle configured".to_string(),
            });
        }
        Ok(self.0.clone())
    }
}

/// Token ids with a rollout currently running.
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct RolloutRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RolloutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `id`. `None` when already claimed.
    pub fn try_acquire(&self, id: &str) -> Option<RolloutGuard> {
        if !self.lock().insert(id.to_string()) {
            return None;
        }
        Some(RolloutGuard {
            registry: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases its registry entry on drop.
#[derive(Debug)]
pub struct RolloutGuard {
    registry: RolloutRegistry,
    id: String,
}

impl RolloutGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for RolloutGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

/// Result of one rollout attempt.
#[derive(Debug)]
pub enum RolloutOutcome {
    /// Token is `Completed`.
    Completed { server_public_key: String },
    /// Rollout did not start; the token was not modified.
    Rejected { error: PushError },
    /// A step failed; the token now sits in `state`.
    Failed { state: RolloutState, error: PushError },
}

impl RolloutOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn failed_state(&self) -> Option<RolloutState> {
        match self {
            Self::Failed { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PushError> {
        match self {
            Self::Completed { .. } => None,
            Self::Rejected { error } | Self::Failed { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> PushResult<String> {
        match self {
            Self::Completed { server_public_key } => Ok(server_public_key),
            Self::Rejected { error } | Self::Failed { error, .. } => Err(error),
        }
    }
}

/// Drives tokens from `Pending` to `Completed`.
#[derive(Clone)]
pub struct RolloutEngine {
    repository: Arc<dyn TokenRepository>,
    keystore: Arc<dyn Keystore>,
    push_handle: Arc<dyn PushHandleProvider>,
    client: CallbackClient,
    registry: RolloutRegistry,
    key_size_bits: usize,
}

impl std::fmt::Debug for RolloutEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutEngine")
            .field("registry", &self.registry)
            .field("key_size_bits", &self.key_size_bits)
            .finish_non_exhaustive()
    }
}

impl RolloutEngine {
    pub fn new(
        repository: Arc<dyn TokenRepository>,
        keystore: Arc<dyn Keystore>,
        push_handle: Arc<dyn PushHandleProvider>,
        client: CallbackClient,
    ) -> Self {
        Self {
            repository,
            keystore,
            push_handle,
            client,
            registry: RolloutRegistry::new(),
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
        }
    }

    pub fn with_key_size_bits(mut self, bits: usize) -> Self {
        self.key_size_bits = bits;
        self
    }

    pub fn registry(&self) -> &RolloutRegistry {
        &self.registry
    }

    pub fn is_rolling_out(&self, id: &str) -> bool {
        self.registry.contains(id)
    }

    /// Run one rollout attempt for `token`.
    pub async fn rollout(&self, token: &Token) -> RolloutOutcome {
        // Claimed before the first await.
        let Some(_guard) = self.registry.try_acquire(&token.id) else {
            debug!(serial = %token.id, "rollout already in progress");
            return RolloutOutcome::Rejected {
                error: PushError::RolloutInProgress {
                    serial: token.id.clone(),
                },
            };
        };

        let current = match self.repository.get(&token.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                return RolloutOutcome::Rejected {
                    error: PushError::TokenNotFound {
                        serial: token.id.clone(),
                    },
                }
            }
            Err(error) => return RolloutOutcome::Rejected { error },
        };

        if current.rollout_state.is_finished() {
            return RolloutOutcome::Rejected {
                error: PushError::AlreadyProcessed {
                    serial: current.id.clone(),
                    state: current.rollout_state,
                },
            };
        }

        let mut step = RolloutState::RSAKeyGeneration;
        match self.run_steps(&current, &mut step).await {
            Ok(server_public_key) => {
                info!(serial = %current.id, "rollout completed");
                RolloutOutcome::Completed { server_public_key }
            }
            Err(error) => {
                let state = step
                    .failed_variant()
                    .unwrap_or(RolloutState::RSAKeyGenerationFailed);
                warn!(serial = %current.id, ?state, error = %error, "rollout failed");
                if let Err(update_err) = self
                    .repository
                    .update(&current.id, TokenUpdate::state(state))
                    .await
                {
                    warn!(serial = %current.id, error = %update_err, "failed to record rollout failure");
                }
                RolloutOutcome::Failed { state, error }
            }
        }
    }

    async fn run_steps(&self, token: &Token, step: &mut RolloutState) -> PushResult<String> {
        *step = RolloutState::RSAKeyGeneration;
        self.enter(&token.id, TokenUpdate::state(*step)).await?;
        let public_key = self
            .keystore
            .generate_key_pair(&token.id, self.key_size_bits)
            .await?;

        *step = RolloutState::SendRSAPublicKey;
        self.enter(&token.id, TokenUpdate::state(*step).with_public_key(&public_key))
            .await?;
        let callback_url = token
            .callback_url
            .as_ref()
            .ok_or_else(|| PushError::MissingCallback {
                serial: token.id.clone(),
            })?;
        let fbtoken = self.push_handle.push_handle().await?;
        let pubkey = strip_pem_armor(&public_key);
        let request = EnrollmentRequest {
            enrollment_credential: token.enrollment_credential.as_deref().unwrap_or_default(),
            serial: &token.id,
            fbtoken: &fbtoken,
            pubkey: &pubkey,
        };
        let body = self
            .client
            .enroll(callback_url, token.ssl_verify, &request)
            .await?;

        *step = RolloutState::ParsingResponse;
        self.enter(&token.id, TokenUpdate::state(*step)).await?;
        let server_public_key = CallbackClient::parse_enrollment_response(&body)?;

        self.enter(
            &token.id,
            TokenUpdate::state(RolloutState::Completed).with_server_public_key(&server_public_key),
        )
        .await?;
        Ok(server_public_key)
    }

    async fn enter(&self, id: &str, update: TokenUpdate) -> PushResult<Token> {
        let token = self.repository.update(id, update).await?;
        info!(serial = %id, state = ?token.rollout_state, "rollout state");
        Ok(token)
    }

    /// Move a failed token back to `Pending`.
    pub async fn reset(&self, id: &str) -> PushResult<Token> {
        let token = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| PushError::TokenNotFound {
                serial: id.to_string(),
            })?;
        if !token.rollout_state.is_failed() {
            return Err(PushError::InvalidTransition {
                serial: id.to_string(),
                from: token.rollout_state,
                to: RolloutState::Pending,
            });
        }
        self.enter(id, TokenUpdate::state(RolloutState::Pending)).await
    }

    /// Spawn one rollout task for every token that still needs one.
    pub async fn start_pending_rollouts(&self) -> PushResult<Vec<JoinHandle<RolloutOutcome>>> {
        let tokens = self.repository.list().await?;
        let handles: Vec<_> = tokens
            .into_iter()
            .filter(|t| t.rollout_state.needs_rollout() && !self.registry.contains(&t.id))
            .map(|token| {
                let engine = self.clone();
                tokio::spawn(async move { engine.rollout(&token).await })
            })
            .collect();
        debug!(count = handles.len(), "started pending rollouts");
        Ok(handles)
    }
}
