//! Push authentication client for eduMFA.
//!
//! This crate implements the device side of push authentication:
//!
//! - Enrollment descriptor parsing (`edumfa://push/...`)
//! - Rollout: device key generation and public key exchange
//! - Challenge polling with server signature verification
//! - Signed accept/decline responses
//! - A request ledger with nonce deduplication and expiry
//! - Inbound delivery of pushed challenges over a channel
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use edumfa_push::{
//!     ClientConfig, MemoryTokenRepository, PushAgent, SoftwareKeystore, StaticPushHandle,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let agent = PushAgent::new(
//!     ClientConfig::from_env(),
//!     Arc::new(MemoryTokenRepository::new()),
//!     Arc::new(SoftwareKeystore::new()),
//!     Arc::new(StaticPushHandle::new("fcm-registration-token")),
//! )?;
//!
//! let enrollment = agent
//!     .enroll("edumfa://push/eduMFA:alice?v=1&serial=PIPU0001&url=https://mfa.example.org/ttype/push&enrollment_credential=abc")
//!     .await?;
//! println!("rollout: {:?}", enrollment.token.rollout_state);
//!
//! if let Some(report) = agent.poll().await {
//!     println!("{} new push request(s)", report.added);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `EDUMFA_PUSH_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `EDUMFA_PUSH_KEY_SIZE` | RSA modulus size for device keys (default: 4096) |
//! | `EDUMFA_PUSH_REQUEST_MAX_AGE_MS` | Pending request expiry (default: 120000) |
//! | `EDUMFA_PUSH_USER_AGENT` | User-Agent header |

pub mod agent;
pub mod client;
pub mod config;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod inbound;
pub mod keystore;
pub mod ledger;
pub mod poll;
pub mod repository;
pub mod respond;
pub mod rollout;
pub mod types;

// Re-export main types
pub use agent::{Enrollment, NotificationAction, PollReport, PushAgent};
pub use client::CallbackClient;
pub use config::ClientConfig;
pub use descriptor::{parse_token, DescriptorError, ProtocolVersion};
pub use error::{PushError, PushResult};
pub use inbound::{
    inbound_channel, parse_push_request, InboundMessage, IntakeOutcome, PushIntake,
    PUSH_AUTHENTICATION_CATEGORY,
};
pub use keystore::{Keystore, SoftwareKeystore};
pub use ledger::{RequestLedger, DEFAULT_MAX_AGE_MS};
pub use poll::{ChallengePoller, PollBatch, TokenPollResult};
pub use repository::{MemoryTokenRepository, TokenRepository};
pub use respond::{Acknowledger, NoopAcknowledger, ResponseService, TracingAcknowledger};
pub use rollout::{
    PushHandleProvider, RolloutEngine, RolloutGuard, RolloutOutcome, RolloutRegistry,
    StaticPushHandle,
};
pub use types::{
    Decision, PushRequest, PushRequestStatus, RolloutState, Token, TokenUpdate, DEFAULT_TTL_SECS,
};
