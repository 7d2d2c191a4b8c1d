//! Signed accept/decline responses.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::client::CallbackClient;
use crate::crypto::response_message;
use crate::error::{PushError, PushResult};
use crate::keystore::{sign_for_wire, Keystore};
use crate::types::{Decision, PushRequest, ResponseSubmission, Token};

/// Side effect emitted after the server accepted a response (haptics,
/// sound, a log line).
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn acknowledge(&self, request: &PushRequest, decision: Decision);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAcknowledger;

#[async_trait]
impl Acknowledger for NoopAcknowledger {
    async fn acknowledge(&self, _request: &PushRequest, _decision: Decision) {}
}

/// Logs accepts at info and declines at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAcknowledger;

#[async_trait]
impl Acknowledger for TracingAcknowledger {
    async fn acknowledge(&self, request: &PushRequest, decision: Decision) {
        match decision {
            Decision::Accept => info!(serial = %request.serial, nonce = %request.nonce, "login approved"),
            Decision::Decline => warn!(serial = %request.serial, nonce = %request.nonce, "login declined"),
        }
    }
}

/// Token the request belongs to.
pub fn find_token_for_request<'a>(tokens: &'a [Token], request: &PushRequest) -> Option<&'a Token> {
    tokens.iter().find(|t| t.id == request.serial)
}

#[derive(Clone)]
pub struct ResponseService {
    keystore: Arc<dyn Keystore>,
    client: CallbackClient,
    acknowledger: Arc<dyn Acknowledger>,
}

impl ResponseService {
    pub fn new(keystore: Arc<dyn Keystore>, client: CallbackClient) -> Self {
        Self {
            keystore,
            client,
            acknowledger: Arc::new(NoopAcknowledger),
        }
    }

    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn Acknowledger>) -> Self {
        self.acknowledger = acknowledger;
        self
    }

    /// Sign and submit `decision` for `request`. No retry.
    pub async fn respond(
        &self,
        request: &PushRequest,
        token: &Token,
        decision: Decision,
    ) -> PushResult<()> {
        if request.serial != token.id {
            return Err(PushError::TokenNotFound {
                serial: request.serial.clone(),
            });
        }
        let callback_url = token
            .callback_url
            .as_ref()
            .ok_or_else(|| PushError::MissingCallback {
                serial: token.id.clone(),
            })?;

        let decline = decision.is_decline();
        let message = response_message(&request.nonce, &token.id, decline);
        let signature = sign_for_wire(self.keystore.as_ref(), &token.id, &message).await?;

        let submission = ResponseSubmission {
            nonce: &request.nonce,
            serial: &token.id,
            signature: &signature,
            decline: u8::from(decline),
        };
        self.client
            .respond(callback_url, token.ssl_verify, &submission)
            .await?;

        info!(serial = %token.id, nonce = %request.nonce, ?decision, "response accepted");
        self.acknowledger.acknowledge(request, decision).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::keystore::SoftwareKeystore;
    use crate::types::PushRequestStatus;
    use url::Url;

    fn request(serial: &str) -> PushRequest {
        PushRequest {
            id: "r1".into(),
            status: PushRequestStatus::Pending,
            sent_at: 0,
            nonce: "n1".into(),
            question: String::new(),
            serial: serial.into(),
            signature: String::new(),
            sslverify: "1".into(),
            title: String::new(),
            url: String::new(),
        }
    }

    #[test]
    fn test_find_token_for_request() {
        let url = Url::parse("https://mfa.example.org").unwrap();
        let tokens = vec![Token::new("A", url.clone()), Token::new("B", url)];
        assert_eq!(find_token_for_request(&tokens, &request("B")).unwrap().id, "B");
        assert!(find_token_for_request(&tokens, &request("C")).is_none());
    }

    #[tokio::test]
    async fn test_respond_rejects_foreign_request() {
        let keystore = Arc::new(SoftwareKeystore::new());
        keystore.generate_key_pair("A", 1024).await.unwrap();
        let service = ResponseService::new(
            keystore,
            CallbackClient::new(&ClientConfig::default()).unwrap(),
        );
        let token = Token::new("A", Url::parse("http://127.0.0.1:1/ttype/push").unwrap());

        let err = service
            .respond(&request("B"), &token, Decision::Accept)
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::TokenNotFound { serial } if serial == "B"));
    }
}
