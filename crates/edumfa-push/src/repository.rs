//! Token repository.
//!
//! Persistence mechanics live behind [`TokenRepository`]; the engine only
//! needs list/get/insert/update/remove by serial.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PushError, PushResult};
use crate::types::{Token, TokenUpdate};

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn list(&self) -> PushResult<Vec<Token>>;

    async fn get(&self, id: &str) -> PushResult<Option<Token>>;

    /// Insert unless a token with the same id exists. Returns whether it was
    /// inserted.
    async fn insert(&self, token: Token) -> PushResult<bool>;

    /// Apply a partial update. Unknown ids are `TokenNotFound`.
    async fn update(&self, id: &str, update: TokenUpdate) -> PushResult<Token>;

    /// Remove by id. Returns whether a token was removed.
    async fn remove(&self, id: &str) -> PushResult<bool>;
}

/// In-memory repository preserving insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenRepository {
    tokens: Arc<RwLock<Vec<Token>>>,
}

impl MemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: Vec<Token>) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(tokens)),
        }
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn list(&self) -> PushResult<Vec<Token>> {
        Ok(self.tokens.read().await.clone())
    }

    async fn get(&self, id: &str) -> PushResult<Option<Token>> {
        Ok(self.tokens.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn insert(&self, token: Token) -> PushResult<bool> {
        let mut tokens = self.tokens.write().await;
        if tokens.iter().any(|t| t.id == token.id) {
            return Ok(false);
        }
        tokens.push(token);
        Ok(true)
    }

    async fn update(&self, id: &str, update: TokenUpdate) -> PushResult<Token> {
        let mut tokens = self.tokens.write().await;
        let token = tokens
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PushError::TokenNotFound {
                serial: id.to_string(),
            })?;
        update.apply(token);
        Ok(token.clone())
    }

    async fn remove(&self, id: &str) -> PushResult<bool> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|t| t.id != id);
        Ok(tokens.len() != before)
    }
}
