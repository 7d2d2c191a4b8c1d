use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use edumfa_push::{ClientConfig, PushAgent, StaticPushHandle, TracingAcknowledger};
use tracing::debug;

use super::super::args::Cli;
use crate::keystore::FileKeystore;
use crate::state::{load_ledger, save_ledger, FileTokenRepository};

/// Agent wired to the on-disk state of one state directory.
pub struct Context {
    pub state_dir: PathBuf,
    pub agent: PushAgent,
}

pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("edumfa-push")
}

impl Context {
    pub async fn open(cli: &Cli) -> anyhow::Result<Self> {
        let state_dir = cli.state_dir.clone().unwrap_or_else(default_state_dir);
        debug!(state_dir = %state_dir.display(), "opening state");

        let repository = FileTokenRepository::open(&state_dir)
            .await
            .context("failed to load tokens")?;
        let ledger = load_ledger(&state_dir)
            .await
            .context("failed to load push requests")?;

        let agent = PushAgent::new(
            ClientConfig::from_env(),
            Arc::new(repository),
            Arc::new(FileKeystore::new(&state_dir)),
            Arc::new(StaticPushHandle::new(cli.push_handle.clone())),
        )
        .context("failed to create push client")?
        .with_ledger(ledger)
        .with_acknowledger(Arc::new(TracingAcknowledger));

        Ok(Self { state_dir, agent })
    }

    /// Persist the ledger.
    pub async fn save(&self) -> anyhow::Result<()> {
        save_ledger(&self.state_dir, self.agent.ledger())
            .await
            .context("failed to save push requests")
    }
}
