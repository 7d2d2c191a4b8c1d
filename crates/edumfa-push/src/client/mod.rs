//! Callback client for the three signed exchanges with the server.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{PushError, PushResult};
use crate::types::{EnrollmentRequest, ResponseSubmission};

mod helpers;
mod http;

use http::{HttpBackend, PollOutcome};

/// Client for a token's `callback_url`.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    http: HttpBackend,
}

impl CallbackClient {
    pub fn new(config: &ClientConfig) -> PushResult<Self> {
        Ok(Self {
            http: HttpBackend {
                client: build_client(config, true)?,
                insecure_client: build_client(config, false)?,
            },
        })
    }

    /// Submit the device public key. Returns the server's public key,
    /// newlines stripped.
    ///
    /// Transport and status failures are `Err` from [`CallbackClient::enroll`];
    /// body parsing is a separate step so callers can attribute failures.
    pub async fn enroll(
        &self,
        callback_url: &Url,
        ssl_verify: bool,
        request: &EnrollmentRequest<'_>,
    ) -> PushResult<String> {
        debug!(url = %callback_url, serial = %request.serial, "sending public key");
        self.http
            .post_enrollment(callback_url, request, ssl_verify)
            .await
    }

    /// Parse an enrollment response body into the server public key.
    pub fn parse_enrollment_response(body: &str) -> PushResult<String> {
        helpers::parse_server_public_key(body)
    }

    /// Fetch pending challenge records for one token. Records are returned
    /// undecoded; verification happens in the poller.
    pub async fn poll(
        &self,
        callback_url: &Url,
        ssl_verify: bool,
        serial: &str,
        timestamp: &str,
        signature: &str,
    ) -> PushResult<Vec<serde_json::Value>> {
        let url = helpers::poll_url(callback_url, serial, timestamp, signature);
        debug!(serial = %serial, "polling challenges");

        match self.http.get_challenges(&url, ssl_verify).await? {
            PollOutcome::Empty => Ok(Vec::new()),
            PollOutcome::Body(body) => helpers::parse_poll_body(&body),
        }
    }

    /// Submit a signed accept/decline decision.
    pub async fn respond(
        &self,
        callback_url: &Url,
        ssl_verify: bool,
        submission: &ResponseSubmission<'_>,
    ) -> PushResult<()> {
        debug!(
            url = %callback_url,
            serial = %submission.serial,
            decline = submission.decline,
            "sending push response"
        );
        self.http
            .post_response(callback_url, submission, ssl_verify)
            .await
    }
}

fn build_client(config: &ClientConfig, ssl_verify: bool) -> PushResult<reqwest::Client> {
    let mut default_headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(&config.user_agent).map_err(|e| PushError::Config {
        message: format!("invalid user agent: {}", e),
    })?;
    default_headers.insert(USER_AGENT, user_agent);

    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .default_headers(default_headers)
        .danger_accept_invalid_certs(!ssl_verify)
        .build()
        .map_err(|e| PushError::Network {
            message: format!("failed to create HTTP client: {}", e),
        })
}
