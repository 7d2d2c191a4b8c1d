//! HTTP layer: status mapping and per-token transport trust.
//!
//! This is the ONLY place for status code handling. client/mod.rs never
//! interprets status codes.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::{PushError, PushResult};

/// Outcome of a challenge poll.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    /// 204 or 404: nothing pending.
    Empty,
    Body(String),
}

/// HTTP backend holding one client per TLS policy.
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    /// Accepts invalid certificates; used for tokens enrolled with `sslverify=0`.
    pub(crate) insecure_client: reqwest::Client,
}

impl HttpBackend {
    fn client_for(&self, ssl_verify: bool) -> &reqwest::Client {
        if ssl_verify {
            &self.client
        } else {
            &self.insecure_client
        }
    }

    /// Enrollment POST; any 2xx yields the body.
    pub(crate) async fn post_enrollment<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
        ssl_verify: bool,
    ) -> PushResult<String> {
        let response = self.post_json(url, body, ssl_verify).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        debug!(status = status.as_u16(), "enrollment accepted");
        read_body(response).await
    }

    /// Poll GET; 204/404 mean no challenges, other 2xx yield the body.
    pub(crate) async fn get_challenges(&self, url: &Url, ssl_verify: bool) -> PushResult<PollOutcome> {
        let response = self
            .client_for(ssl_verify)
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => {
                debug!(status = response.status().as_u16(), "no challenges");
                Ok(PollOutcome::Empty)
            }
            status if status.is_success() => Ok(PollOutcome::Body(read_body(response).await?)),
            _ => Err(error_from_response(response).await),
        }
    }

    /// Response POST; only 200 counts as accepted.
    pub(crate) async fn post_response<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
        ssl_verify: bool,
    ) -> PushResult<()> {
        let response = self.post_json(url, body, ssl_verify).await?;
        if response.status() != StatusCode::OK {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
        ssl_verify: bool,
    ) -> PushResult<reqwest::Response> {
        let payload = serde_json::to_vec(body).map_err(|e| PushError::Config {
            message: format!("failed to encode request body: {}", e),
        })?;
        let response = self
            .client_for(ssl_verify)
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;
        Ok(response)
    }
}

async fn read_body(response: reqwest::Response) -> PushResult<String> {
    response.text().await.map_err(|e| PushError::Network {
        message: format!("failed to read response body: {}", e),
    })
}

async fn error_from_response(response: reqwest::Response) -> PushError {
    let status = response.status();
    let body = response
        .text()
        .await
        .map(|text| text.chars().take(200).collect())
        .unwrap_or_default();
    PushError::Http {
        status: status.as_u16(),
        body,
    }
}
