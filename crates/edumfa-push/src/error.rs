//! Error types for the push authentication client.

use crate::descriptor::DescriptorError;
use crate::types::{PushRequestStatus, RolloutState};

/// Push client errors.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Enrollment descriptor rejected by the parser.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Transport failure (connect, TLS, timeout, body read).
    #[error("network error: {message}")]
    Network { message: String },

    /// Callback server answered with an unexpected status.
    #[error("server returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Body could not be parsed into the expected shape.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Keystore failed to generate, sign with or delete a key.
    #[error("keystore error: {message}")]
    Keystore { message: String },

    /// Push delivery handle could not be obtained.
    #[error("push handle unavailable: {message}")]
    PushHandle { message: String },

    /// No token with this serial.
    #[error("token not found: {serial}")]
    TokenNotFound { serial: String },

    /// Another rollout for the same serial is running.
    #[error("rollout already in progress: {serial}")]
    RolloutInProgress { serial: String },

    /// Token is completed or failed; rollout will not start.
    #[error("token already processed: {serial} ({state:?})")]
    AlreadyProcessed { serial: String, state: RolloutState },

    /// State change not allowed from the current state.
    #[error("invalid transition for {serial}: {from:?} -> {to:?}")]
    InvalidTransition {
        serial: String,
        from: RolloutState,
        to: RolloutState,
    },

    /// Token has no callback URL (v2 descriptors).
    #[error("token has no callback URL: {serial}")]
    MissingCallback { serial: String },

    /// One or more tokens failed during a batch poll.
    #[error("{failed} token(s) failed to poll")]
    PollFailed { failed: usize },

    /// No push request with this id.
    #[error("push request not found: {id}")]
    RequestNotFound { id: String },

    /// Push request is no longer pending.
    #[error("push request already answered: {id} ({status:?})")]
    AlreadyAnswered {
        id: String,
        status: PushRequestStatus,
    },

    /// Token repository failure.
    #[error("repository error: {message}")]
    Repository { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl PushError {
    /// Whether a caller-driven retry could succeed.
    ///
    /// The engine itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::PushHandle { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn keystore(err: impl std::fmt::Display) -> Self {
        Self::Keystore {
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for PushError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for push client operations.
pub type PushResult<T> = Result<T, PushError>;
