use super::ports::{CredentialStore, PoolError};
use async_trait::async_trait;
use std::path::PathBuf;

/// Persists the latest generated credential into a `.env` style file
pub struct EnvFileStore {
    path: PathBuf,
    key: String,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl CredentialStore for EnvFileStore {
    async fn persist(&self, token: &str) -> Result<(), PoolError> {
        let path = self.path.clone();
        let key = self.key.clone();
        let token = token.to_string();

        tokio::task::spawn_blocking(move || config::write_env_value(&path, &key, &token))
            .await
            .map_err(|e| PoolError::Persistence(e.to_string()))?
            .map_err(|e| PoolError::Persistence(e.to_string()))
    }
}
