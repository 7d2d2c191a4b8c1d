//! On-disk state: tokens and push requests as JSON under the state directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use edumfa_push::{
    MemoryTokenRepository, PushError, PushRequest, PushResult, RequestLedger, Token,
    TokenRepository, TokenUpdate,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub const TOKENS_FILE: &str = "tokens.json";
pub const REQUESTS_FILE: &str = "requests.json";

fn repository_error(path: &Path, err: impl std::fmt::Display) -> PushError {
    PushError::Repository {
        message: format!("{}: {}", path.display(), err),
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> PushResult<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| repository_error(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(repository_error(path, e)),
    }
}

/// Write via a temp file and rename.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> PushResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| repository_error(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| repository_error(path, e))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| repository_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| repository_error(path, e))
}

/// Token repository persisted to `tokens.json` after every mutation.
#[derive(Debug, Clone)]
pub struct FileTokenRepository {
    path: PathBuf,
    memory: MemoryTokenRepository,
}

impl FileTokenRepository {
    pub async fn open(state_dir: &Path) -> PushResult<Self> {
        let path = state_dir.join(TOKENS_FILE);
        let tokens: Vec<Token> = read_json(&path).await?;
        debug!(path = %path.display(), count = tokens.len(), "loaded tokens");
        Ok(Self {
            path,
            memory: MemoryTokenRepository::with_tokens(tokens),
        })
    }

    async fn persist(&self) -> PushResult<()> {
        let tokens = self.memory.list().await?;
        write_json(&self.path, &tokens).await
    }
}

#[async_trait]
impl TokenRepository for FileTokenRepository {
    async fn list(&self) -> PushResult<Vec<Token>> {
        self.memory.list().await
    }

    async fn get(&self, id: &str) -> PushResult<Option<Token>> {
        self.memory.get(id).await
    }

    async fn insert(&self, token: Token) -> PushResult<bool> {
        let inserted = self.memory.insert(token).await?;
        if inserted {
            self.persist().await?;
        }
        Ok(inserted)
    }

    async fn update(&self, id: &str, update: TokenUpdate) -> PushResult<Token> {
        let token = self.memory.update(id, update).await?;
        self.persist().await?;
        Ok(token)
    }

    async fn remove(&self, id: &str) -> PushResult<bool> {
        let removed = self.memory.remove(id).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }
}

pub async fn load_ledger(state_dir: &Path) -> PushResult<RequestLedger> {
    let records: Vec<PushRequest> = read_json(&state_dir.join(REQUESTS_FILE)).await?;
    let ledger = RequestLedger::new();
    ledger.restore(records).await;
    Ok(ledger)
}

pub async fn save_ledger(state_dir: &Path, ledger: &RequestLedger) -> PushResult<()> {
    write_json(&state_dir.join(REQUESTS_FILE), &ledger.snapshot().await).await
}
