//! Enrollment descriptor parsing.
//!
//! A descriptor is the URI carried by an enrollment QR code:
//!
//! ```text
//! edumfa://push/{issuer}:{label}?v=1&serial=PIPU0001&url=https://...&enrollment_credential=...
//! ```
//!
//! Parsing is one-shot and strict: every error is kind-tagged and no partial
//! token is ever returned.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::types::{RolloutState, Token, DEFAULT_TTL_SECS};

/// Scheme of push enrollment descriptors.
pub const ENROLLMENT_SCHEME: &str = "edumfa";

/// Scheme of classic OTP descriptors, handled by other authenticator apps.
pub const OTP_SCHEME: &str = "otpauth";

/// Descriptor rejection kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// Malformed descriptor, missing required field or unparsable nested URL.
    #[error("invalid enrollment URL: {message}")]
    InvalidUrl { message: String },

    /// Descriptor uses the OTP scheme instead of the push scheme.
    #[error("OTP descriptors are not supported: {message}")]
    OtpProtocol { message: String },

    /// Version parameter missing, non-numeric or not supported.
    #[error("unsupported token version: {message}")]
    UnsupportedVersion { message: String },
}

fn invalid(message: impl Into<String>) -> DescriptorError {
    DescriptorError::InvalidUrl {
        message: message.into(),
    }
}

/// Supported descriptor versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    /// Serial and label only; the remaining fields are not defined yet.
    V2,
}

impl ProtocolVersion {
    /// Interpret the `v` query parameter.
    pub fn from_param(param: Option<&str>) -> Result<Self, DescriptorError> {
        let unsupported = || DescriptorError::UnsupportedVersion {
            message: format!("the provided token version is not supported: {:?}", param),
        };
        let number: u32 = param
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(unsupported)?;
        match number {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            _ => Err(unsupported()),
        }
    }

    pub fn number(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Parse an enrollment descriptor into a pending token.
pub fn parse_token(uri: &str) -> Result<Token, DescriptorError> {
    let url = Url::parse(uri.trim()).map_err(|_| invalid("the provided URL is invalid"))?;

    match url.scheme() {
        OTP_SCHEME => {
            return Err(DescriptorError::OtpProtocol {
                message: "the provided URL uses the OTP protocol".to_string(),
            })
        }
        ENROLLMENT_SCHEME => {}
        other => {
            return Err(invalid(format!(
                "the provided URL does not use the {} protocol (got {})",
                ENROLLMENT_SCHEME, other
            )))
        }
    }

    let version = ProtocolVersion::from_param(query_param(&url, "v").as_deref())?;
    match version {
        ProtocolVersion::V1 => parse_v1(&url),
        ProtocolVersion::V2 => parse_v2(&url),
    }
}

fn parse_v1(url: &Url) -> Result<Token, DescriptorError> {
    let image_url = query_param(url, "imageUri")
        .map(|raw| Url::parse(&raw).map_err(|_| invalid("the provided image URL is invalid")))
        .transpose()?;

    let (label, issuer) = label_and_issuer(url)?;

    let id = required_param(url, "serial")?;

    let callback_raw = required_param(url, "url")?;
    let callback_url =
        Url::parse(&callback_raw).map_err(|_| invalid("the provided callback URL is invalid"))?;

    let ttl = match non_empty_param(url, "ttl") {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| invalid(format!("invalid ttl: {}", raw)))?,
        None => DEFAULT_TTL_SECS,
    };

    let enrollment_credential = required_param(url, "enrollment_credential")?;

    let ssl_verify = non_empty_param(url, "sslverify")
        .map(|v| v == "1")
        .unwrap_or(true);

    let pin = query_param(url, "pin").as_deref() == Some("True");

    Ok(Token {
        id,
        version: ProtocolVersion::V1.number(),
        label,
        issuer,
        callback_url: Some(callback_url),
        ttl,
        enrollment_credential: Some(enrollment_credential),
        ssl_verify,
        image_url,
        pin,
        rollout_state: RolloutState::Pending,
        public_key: None,
        server_public_key: None,
    })
}

fn parse_v2(url: &Url) -> Result<Token, DescriptorError> {
    let id = required_param(url, "serial")?;

    let label = decoded_path(url)?;
    if label.is_empty() {
        return Err(invalid("no label provided in the URL path"));
    }

    Ok(Token {
        id,
        version: ProtocolVersion::V2.number(),
        label,
        issuer: None,
        callback_url: None,
        ttl: DEFAULT_TTL_SECS,
        enrollment_credential: None,
        ssl_verify: true,
        image_url: None,
        pin: false,
        rollout_state: RolloutState::Pending,
        public_key: None,
        server_public_key: None,
    })
}

/// Split `issuer:label` from the path, or take the whole path as label and
/// the `issuer` query parameter as issuer.
fn label_and_issuer(url: &Url) -> Result<(String, Option<String>), DescriptorError> {
    let path = decoded_path(url)?;
    if path.contains(':') {
        let mut parts = path.split(':');
        let issuer = parts.next().unwrap_or_default().to_string();
        let label = parts.next().unwrap_or_default().to_string();
        return Ok((label, Some(issuer)));
    }

    let issuer = match non_empty_param(url, "issuer") {
        Some(raw) => Some(percent_decode(&raw)?),
        None => None,
    };
    Ok((path, issuer))
}

fn decoded_path(url: &Url) -> Result<String, DescriptorError> {
    let path = url.path();
    percent_decode(path.strip_prefix('/').unwrap_or(path))
}

fn percent_decode(raw: &str) -> Result<String, DescriptorError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| invalid("malformed percent-encoding"))
}

/// First value of a query parameter (already form-decoded).
fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn non_empty_param(url: &Url, name: &str) -> Option<String> {
    query_param(url, name).filter(|v| !v.is_empty())
}

fn required_param(url: &Url, name: &str) -> Result<String, DescriptorError> {
    non_empty_param(url, name).ok_or_else(|| invalid(format!("no {} parameter provided", name)))
}
