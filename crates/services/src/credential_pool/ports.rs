use async_trait::async_trait;

#[cfg(any(test, feature = "test-mocks"))]
use mockall::automock;

pub use inference_providers::CompletionError as ProbeError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Credential pool is empty")]
    EmptyPool,
    #[error("All credentials are dead: {0}")]
    AllDead(String),
    #[error("Credential probe failed: {0}")]
    ProbeFailed(String),
    #[error("Failed to generate credential: {0}")]
    GenerationFailed(String),
    #[error("Failed to persist credential: {0}")]
    Persistence(String),
}

/// A freshly minted credential and the account it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCredential {
    pub identity: String,
    pub token: String,
}

/// Cheap synthetic exchange telling whether a token still works
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait CredentialProbe: Send + Sync {
    async fn probe(&self, token: &str) -> Result<(), ProbeError>;
}

/// Source of new credentials for self-healing pools
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait CredentialGenerator: Send + Sync {
    async fn generate(&self) -> Result<GeneratedCredential, PoolError>;
}

/// Account login producing an unvalidated credential
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn login(&self) -> Result<GeneratedCredential, PoolError>;
}

/// Durable storage for the most recently generated credential
#[cfg_attr(any(test, feature = "test-mocks"), automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn persist(&self, token: &str) -> Result<(), PoolError>;
}
