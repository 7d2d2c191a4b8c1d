//! File-backed keystore: one PKCS#8 PEM per token under `keys/`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use edumfa_push::keystore::{generate_rsa_key, public_key_pem, sign_base64};
use edumfa_push::{Keystore, PushError, PushResult};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use tracing::debug;

pub const KEYS_DIR: &str = "keys";

fn keystore_error(message: impl std::fmt::Display) -> PushError {
    PushError::Keystore {
        message: message.to_string(),
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path, mode: u32) -> PushResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| {
            keystore_error(format!(
                "failed to set permissions on {}: {}",
                path.display(),
                e
            ))
        })
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path, _mode: u32) -> PushResult<()> {
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join(KEYS_DIR),
        }
    }

    fn key_path(&self, alias: &str) -> PushResult<PathBuf> {
        let valid = !alias.is_empty()
            && alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !alias.starts_with('.');
        if !valid {
            return Err(keystore_error(format!("invalid key alias: {:?}", alias)));
        }
        Ok(self.dir.join(format!("{}.pem", alias)))
    }

    async fn load(&self, alias: &str) -> PushResult<RsaPrivateKey> {
        let path = self.key_path(alias)?;
        let pem = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| keystore_error(format!("no key for alias {}: {}", alias, e)))?;
        RsaPrivateKey::from_pkcs8_pem(&pem).map_err(keystore_error)
    }
}

#[async_trait]
impl Keystore for FileKeystore {
    async fn generate_key_pair(&self, alias: &str, bits: usize) -> PushResult<String> {
        let path = self.key_path(alias)?;
        let key = generate_rsa_key(bits).await?;
        let private_pem = key.to_pkcs8_pem(LineEnding::LF).map_err(keystore_error)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(keystore_error)?;
        restrict_permissions(&self.dir, 0o700).await?;

        let tmp = path.with_extension("pem.tmp");
        tokio::fs::write(&tmp, private_pem.as_bytes())
            .await
            .map_err(keystore_error)?;
        restrict_permissions(&tmp, 0o600).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(keystore_error)?;
        debug!(path = %path.display(), bits, "stored private key");
        public_key_pem(&key)
    }

    async fn sign(&self, alias: &str, message: &[u8]) -> PushResult<String> {
        let key = self.load(alias).await?;
        Ok(sign_base64(&key, message))
    }

    async fn delete_key(&self, alias: &str) -> PushResult<()> {
        let path = self.key_path(alias)?;
        tokio::fs::remove_file(&path).await.map_err(keystore_error)
    }
}
