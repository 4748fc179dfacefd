use super::{
    mask_token,
    ports::{CredentialGenerator, CredentialProbe, GeneratedCredential, LoginFlow, PoolError},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Extra logins attempted when a freshly minted token fails its probe
pub const EXTRA_LOGIN_ATTEMPTS: usize = 2;

/// Generator that only returns credentials which passed a probe.
///
/// Login errors are returned immediately; probe failures trigger another
/// login until the attempts are used up, after which the last failure is
/// returned as [`PoolError::ProbeFailed`].
pub struct ValidatedGenerator {
    login: Arc<dyn LoginFlow>,
    probe: Arc<dyn CredentialProbe>,
}

impl ValidatedGenerator {
    pub fn new(login: Arc<dyn LoginFlow>, probe: Arc<dyn CredentialProbe>) -> Self {
        Self { login, probe }
    }
}

#[async_trait]
impl CredentialGenerator for ValidatedGenerator {
    async fn generate(&self) -> Result<GeneratedCredential, PoolError> {
        let mut attempt = 0;
        loop {
            let credential = self.login.login().await.inspect_err(|e| {
                tracing::error!(error = %e, "Login failed while generating credential");
            })?;

            match self.probe.probe(&credential.token).await {
                Ok(()) => return Ok(credential),
                Err(e) if attempt < EXTRA_LOGIN_ATTEMPTS => {
                    attempt += 1;
                    tracing::warn!(
                        identity = %credential.identity,
                        token = %mask_token(&credential.token),
                        error = %e,
                        attempt,
                        "Generated credential failed its probe, logging in again"
                    );
                }
                Err(e) => {
                    return Err(PoolError::ProbeFailed(format!(
                        "{}: {e}",
                        credential.identity
                    )))
                }
            }
        }
    }
}
