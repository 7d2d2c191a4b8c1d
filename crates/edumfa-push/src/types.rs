//! Token and push request records, plus the callback wire types.

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

/// Default advisory TTL in seconds.
pub const DEFAULT_TTL_SECS: u32 = 10;

/// Lifecycle of a token's enrollment.
///
/// Ordered path: `Pending → RSAKeyGeneration → SendRSAPublicKey →
/// ParsingResponse → Completed`. Each working state has one failure variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RolloutState {
    Pending,
    RSAKeyGeneration,
    RSAKeyGenerationFailed,
    SendRSAPublicKey,
    SendRSAPublicKeyFailed,
    ParsingResponse,
    ParsingResponseFailed,
    Completed,
}

impl RolloutState {
    pub const fn is_failed(self) -> bool {
        matches!(
            self,
            Self::RSAKeyGenerationFailed | Self::SendRSAPublicKeyFailed | Self::ParsingResponseFailed
        )
    }

    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed) || self.is_failed()
    }

    pub const fn needs_rollout(self) -> bool {
        !self.is_finished()
    }

    /// Progress percentage for display. Failed states report 100.
    pub const fn progress(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::RSAKeyGeneration => 40,
            Self::SendRSAPublicKey => 70,
            Self::ParsingResponse => 90,
            Self::Completed
            | Self::RSAKeyGenerationFailed
            | Self::SendRSAPublicKeyFailed
            | Self::ParsingResponseFailed => 100,
        }
    }

    /// Failure variant of a working state; `None` for every other state.
    pub const fn failed_variant(self) -> Option<Self> {
        match self {
            Self::RSAKeyGeneration => Some(Self::RSAKeyGenerationFailed),
            Self::SendRSAPublicKey => Some(Self::SendRSAPublicKeyFailed),
            Self::ParsingResponse => Some(Self::ParsingResponseFailed),
            _ => None,
        }
    }
}

/// An enrolled push credential.
///
/// Private key material never lives here; the keystore addresses it by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Serial. Also the keystore alias.
    pub id: String,

    /// Enrollment protocol version.
    pub version: u32,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub issuer: Option<String>,

    /// Endpoint for all signed exchanges. Absent for v2 descriptors.
    #[serde(default)]
    pub callback_url: Option<Url>,

    /// Advisory seconds; informational only.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Bearer credential presented once during key exchange.
    #[serde(default)]
    pub enrollment_credential: Option<String>,

    #[serde(default = "default_true")]
    pub ssl_verify: bool,

    #[serde(default)]
    pub image_url: Option<Url>,

    #[serde(default)]
    pub pin: bool,

    pub rollout_state: RolloutState,

    /// Device public key (PEM), set once key generation succeeds.
    #[serde(default)]
    pub public_key: Option<String>,

    /// Server public key, set iff `rollout_state == Completed`.
    #[serde(default)]
    pub server_public_key: Option<String>,
}

fn default_ttl() -> u32 {
    DEFAULT_TTL_SECS
}

fn default_true() -> bool {
    true
}

impl Token {
    /// A pending v1 token with defaults for every optional field.
    pub fn new(id: impl Into<String>, callback_url: Url) -> Self {
        Self {
            id: id.into(),
            version: 1,
            label: String::new(),
            issuer: None,
            callback_url: Some(callback_url),
            ttl: DEFAULT_TTL_SECS,
            enrollment_credential: None,
            ssl_verify: true,
            image_url: None,
            pin: false,
            rollout_state: RolloutState::Pending,
            public_key: None,
            server_public_key: None,
        }
    }

    pub fn with_enrollment_credential(mut self, credential: impl Into<String>) -> Self {
        self.enrollment_credential = Some(credential.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.rollout_state == RolloutState::Completed
    }
}

/// Partial token mutation applied by the rollout engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUpdate {
    pub rollout_state: Option<RolloutState>,
    pub public_key: Option<String>,
    pub server_public_key: Option<String>,
}

impl TokenUpdate {
    pub fn state(state: RolloutState) -> Self {
        Self {
            rollout_state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_public_key(mut self, key: impl Into<String>) -> Self {
        self.public_key = Some(key.into());
        self
    }

    pub fn with_server_public_key(mut self, key: impl Into<String>) -> Self {
        self.server_public_key = Some(key.into());
        self
    }

    pub fn apply(&self, token: &mut Token) {
        if let Some(state) = self.rollout_state {
            token.rollout_state = state;
        }
        if let Some(key) = &self.public_key {
            token.public_key = Some(key.clone());
        }
        if let Some(key) = &self.server_public_key {
            token.server_public_key = Some(key.clone());
        }
    }
}

/// Status of a push request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushRequestStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

/// A server-issued authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Locally unique id.
    pub id: String,
    pub status: PushRequestStatus,
    /// Milliseconds since the Unix epoch.
    pub sent_at: i64,
    /// Server-issued, unique per challenge. Primary dedup key.
    pub nonce: String,
    pub question: String,
    /// Token id this challenge belongs to.
    pub serial: String,
    pub signature: String,
    pub sslverify: String,
    pub title: String,
    pub url: String,
}

impl PushRequest {
    /// Build a pending request from a verified wire record.
    pub fn from_record(id: impl Into<String>, record: ChallengeRecord, sent_at: i64) -> Self {
        Self {
            id: id.into(),
            status: PushRequestStatus::Pending,
            sent_at,
            nonce: record.nonce,
            question: record.question,
            serial: record.serial,
            signature: record.signature,
            sslverify: record.sslverify,
            title: record.title,
            url: record.url,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PushRequestStatus::Pending
    }
}

/// User decision for a push request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
}

impl Decision {
    pub fn is_decline(self) -> bool {
        self == Self::Decline
    }

    /// Status recorded in the ledger for this decision.
    pub fn status(self) -> PushRequestStatus {
        match self {
            Self::Accept => PushRequestStatus::Accepted,
            Self::Decline => PushRequestStatus::Declined,
        }
    }
}

/// Challenge record as returned by the poll endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub nonce: String,
    #[serde(default)]
    pub question: String,
    pub serial: String,
    pub signature: String,
    #[serde(deserialize_with = "flag_string")]
    pub sslverify: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// Accept `"1"`, `1`, `true` and friends; keep strings as sent.
fn flag_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Bool(true) => "1".to_string(),
        serde_json::Value::Bool(false) => "0".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => "0".to_string(),
    })
}

/// Body of GET `callback_url` (poll).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollEnvelope {
    #[serde(default)]
    pub result: Option<PollResultBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResultBody {
    /// Raw records; each one is decoded and verified on its own.
    #[serde(default)]
    pub value: Option<Vec<serde_json::Value>>,
}

/// Body of the enrollment POST.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentRequest<'a> {
    pub enrollment_credential: &'a str,
    pub serial: &'a str,
    pub fbtoken: &'a str,
    pub pubkey: &'a str,
}

/// Expected enrollment response.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentResponse {
    pub detail: EnrollmentDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentDetail {
    pub public_key: String,
}

/// Body of the response POST.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSubmission<'a> {
    pub nonce: &'a str,
    pub serial: &'a str,
    pub signature: &'a str,
    pub decline: u8,
}
