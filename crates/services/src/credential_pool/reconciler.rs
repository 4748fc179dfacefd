//! Background task keeping a self-healing pool populated.

use super::{
    mask_token,
    ports::{CredentialGenerator, CredentialStore},
    CredentialPool,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub minimum_survival: usize,
    pub warmup: Duration,
    pub interval: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            minimum_survival: 3,
            warmup: Duration::from_secs(3),
            interval: Duration::from_secs(5),
        }
    }
}

/// What one reconcile cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub removed: usize,
    pub generated: bool,
}

pub struct Reconciler {
    pool: Arc<CredentialPool>,
    generator: Arc<dyn CredentialGenerator>,
    store: Arc<dyn CredentialStore>,
    settings: ReconcilerSettings,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(
        pool: Arc<CredentialPool>,
        generator: Arc<dyn CredentialGenerator>,
        store: Arc<dyn CredentialStore>,
        settings: ReconcilerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            generator,
            store,
            settings,
            cancel,
        }
    }

    /// Run until cancelled; join the handle on shutdown
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        tracing::info!(
            minimum_survival = self.settings.minimum_survival,
            interval_secs = self.settings.interval.as_secs(),
            "Credential reconciler started"
        );

        if !self.sleep(self.settings.warmup).await {
            tracing::info!("Credential reconciler stopped");
            return;
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.reconcile_once().await;
            if !self.sleep(self.settings.interval).await {
                break;
            }
        }

        tracing::info!("Credential reconciler stopped");
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// One cycle: purge dead entries, then top the pool up by one credential
    pub async fn reconcile_once(&self) -> ReconcileOutcome {
        let removed = self.pool.sweep_dead().await;
        for credential in &removed {
            tracing::warn!(
                token = %mask_token(&credential.token),
                error = credential.last_error.as_deref().unwrap_or_default(),
                "Removed dead credential from pool"
            );
        }

        let mut outcome = ReconcileOutcome {
            removed: removed.len(),
            generated: false,
        };

        if self.pool.len().await >= self.settings.minimum_survival {
            return outcome;
        }

        // The pool lock is not held while generating
        match self.generator.generate().await {
            Ok(credential) => {
                tracing::info!(
                    identity = %credential.identity,
                    token = %mask_token(&credential.token),
                    "Added generated credential to pool"
                );
                self.pool.push(credential.token.clone()).await;
                outcome.generated = true;
                if let Err(e) = self.store.persist(&credential.token).await {
                    tracing::warn!(error = %e, "Failed to persist generated credential");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to generate credential, retrying next cycle");
            }
        }

        outcome
    }
}
