//! Self-healing pool of backend credentials.
//!
//! All reads and writes go through one async mutex. `acquire` holds it while
//! probing, so two callers can never validate and hand out the same dead
//! token concurrently; the price is that acquisition is serialized.

pub mod generator;
pub mod ports;
pub mod probe;
pub mod reconciler;
pub mod store;

pub use generator::ValidatedGenerator;
pub use ports::{
    CredentialGenerator, CredentialProbe, CredentialStore, GeneratedCredential, LoginFlow,
    PoolError, ProbeError,
};
pub use probe::ChatProbe;
pub use reconciler::{Reconciler, ReconcilerSettings};
pub use store::EnvFileStore;

use config::PoolConfig;
use inference_providers::sentinel;
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Shorten a token for logging
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub dead: bool,
    pub last_error: Option<String>,
}

impl Credential {
    pub fn live(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            dead: false,
            last_error: None,
        }
    }

    fn record_failure(&mut self, message: &str) {
        self.dead = !sentinel::is_transient_failure(message);
        self.last_error = Some(message.to_string());
        tracing::warn!(
            token = %mask_token(&self.token),
            error = message,
            dead = self.dead,
            "Credential failure reported"
        );
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &mask_token(&self.token))
            .field("dead", &self.dead)
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[derive(Default)]
struct PoolState {
    /// Insertion order is probe order
    credentials: Vec<Credential>,
    /// Entry most recently examined; `None` before the first acquisition
    cursor: Option<usize>,
}

pub struct CredentialPool {
    state: Mutex<PoolState>,
    probe: Arc<dyn CredentialProbe>,
    generator: Option<Arc<dyn CredentialGenerator>>,
}

impl CredentialPool {
    pub fn new(tokens: Vec<String>, probe: Arc<dyn CredentialProbe>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                credentials: tokens.into_iter().map(Credential::live).collect(),
                cursor: None,
            }),
            probe,
            generator: None,
        }
    }

    /// Mint credentials on exhaustion and allow background replenishment
    pub fn with_generator(mut self, generator: Arc<dyn CredentialGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn supports_regeneration(&self) -> bool {
        self.generator.is_some()
    }

    pub fn generator(&self) -> Option<Arc<dyn CredentialGenerator>> {
        self.generator.clone()
    }

    /// Hand out the next credential that passes a probe.
    ///
    /// Starts after the cursor and examines each entry at most once. Dead
    /// entries are skipped, live ones probed. When nothing passes, a
    /// configured generator mints a replacement.
    pub async fn acquire(&self) -> Result<String, PoolError> {
        let mut state = self.state.lock().await;
        let len = state.credentials.len();
        if len == 0 && self.generator.is_none() {
            return Err(PoolError::EmptyPool);
        }

        let start = state.cursor.map_or(0, |cursor| cursor + 1);
        let mut last_error = None;

        for offset in 0..len {
            let index = (start + offset) % len;
            state.cursor = Some(index);

            let credential = &state.credentials[index];
            if credential.dead {
                if credential.last_error.is_some() {
                    last_error = credential.last_error.clone();
                }
                continue;
            }

            let token = credential.token.clone();
            match self.probe.probe(&token).await {
                Ok(()) => {
                    tracing::debug!(token = %mask_token(&token), index, "Credential acquired");
                    return Ok(token);
                }
                Err(e) => {
                    let message = e.to_string();
                    let transient = sentinel::is_transient_failure(&message);
                    tracing::warn!(
                        token = %mask_token(&token),
                        error = %message,
                        transient,
                        "Credential probe failed"
                    );
                    let credential = &mut state.credentials[index];
                    credential.dead = !transient;
                    credential.last_error = Some(message.clone());
                    last_error = Some(message);
                }
            }
        }

        let Some(generator) = &self.generator else {
            return Err(PoolError::AllDead(
                last_error.unwrap_or_else(|| "no usable credential".to_string()),
            ));
        };

        tracing::info!("All pooled credentials failed, generating a replacement");
        let generated = generator
            .generate()
            .await
            .map_err(|e| PoolError::AllDead(e.to_string()))?;
        tracing::info!(
            identity = %generated.identity,
            token = %mask_token(&generated.token),
            "Generated credential added to pool"
        );

        state.credentials.push(Credential::live(generated.token.clone()));
        state.cursor = Some(state.credentials.len() - 1);
        Ok(generated.token)
    }

    /// Record a failure observed while using the most recently acquired credential
    pub async fn report_failure(&self, message: &str) {
        if message.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        let Some(index) = state.cursor else {
            return;
        };
        if let Some(credential) = state.credentials.get_mut(index) {
            credential.record_failure(message);
        }
    }

    /// Record a failure observed while using `token`.
    ///
    /// Unlike [`Self::report_failure`] this is unaffected by acquisitions
    /// made since `token` was handed out. Unknown tokens are ignored.
    pub async fn report_failure_for(&self, token: &str, message: &str) {
        if message.is_empty() {
            return;
        }

        let mut state = self.state.lock().await;
        if let Some(credential) = state.credentials.iter_mut().find(|c| c.token == token) {
            credential.record_failure(message);
        }
    }

    pub async fn push(&self, token: impl Into<String>) {
        self.state.lock().await.credentials.push(Credential::live(token));
    }

    /// Remove dead entries, returning them.
    ///
    /// The cursor keeps its logical position: the next acquisition starts at
    /// the first surviving entry after the old cursor.
    pub async fn sweep_dead(&self) -> Vec<Credential> {
        let mut state = self.state.lock().await;
        let old_cursor = state.cursor;

        let mut kept = Vec::with_capacity(state.credentials.len());
        let mut removed = Vec::new();
        let mut cursor = None;
        for (index, credential) in std::mem::take(&mut state.credentials)
            .into_iter()
            .enumerate()
        {
            if credential.dead {
                removed.push(credential);
                continue;
            }
            if old_cursor.is_some_and(|old| index <= old) {
                cursor = Some(kept.len());
            }
            kept.push(credential);
        }

        state.credentials = kept;
        state.cursor = cursor;
        removed
    }

    /// Mark `token` live again. Returns whether it was found.
    pub async fn revive(&self, token: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.credentials.iter_mut().find(|c| c.token == token) {
            Some(credential) => {
                credential.dead = false;
                credential.last_error = None;
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.credentials.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn live_count(&self) -> usize {
        self.state
            .lock()
            .await
            .credentials
            .iter()
            .filter(|c| !c.dead)
            .count()
    }

    pub async fn snapshot(&self) -> Vec<Credential> {
        self.state.lock().await.credentials.clone()
    }
}

/// A pool together with its background reconciler, if any
pub struct PoolHandle {
    pub pool: Arc<CredentialPool>,
    pub reconciler: Option<JoinHandle<()>>,
}

/// Build a pool from configuration.
///
/// Statically configured keys give a fixed pool. Otherwise the pool is seeded
/// with the cached key and, when a login flow is available, becomes
/// self-healing: a validated generator refills it on exhaustion and a
/// reconciler keeps it at the minimum size, persisting new keys to the env file.
pub fn start_pool(
    config: &PoolConfig,
    probe: Arc<dyn CredentialProbe>,
    login: Option<Arc<dyn LoginFlow>>,
    cancel: CancellationToken,
) -> PoolHandle {
    if config.is_static() {
        tracing::info!(keys = config.keys.len(), "Starting static credential pool");
        return PoolHandle {
            pool: Arc::new(CredentialPool::new(config.keys.clone(), probe)),
            reconciler: None,
        };
    }

    let seed: Vec<String> = config.cache_key.iter().cloned().collect();
    let Some(login) = login else {
        tracing::info!(
            seeded = seed.len(),
            "Starting credential pool without a login flow"
        );
        return PoolHandle {
            pool: Arc::new(CredentialPool::new(seed, probe)),
            reconciler: None,
        };
    };

    let generator: Arc<dyn CredentialGenerator> =
        Arc::new(ValidatedGenerator::new(login, probe.clone()));
    let pool = Arc::new(CredentialPool::new(seed, probe).with_generator(generator.clone()));
    let store = Arc::new(EnvFileStore::new(
        &config.env_file,
        PoolConfig::CACHE_KEY_NAME,
    ));
    let settings = ReconcilerSettings {
        minimum_survival: config.minimum_survival,
        warmup: Duration::from_secs(config.warmup_secs),
        interval: Duration::from_secs(config.interval_secs),
    };

    let reconciler = Reconciler::new(pool.clone(), generator, store, settings, cancel).spawn();
    PoolHandle {
        pool,
        reconciler: Some(reconciler),
    }
}

#[cfg(test)]
mod tests {
    use super::ports::{MockCredentialGenerator, MockCredentialProbe};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|t| t.to_string()).collect()
    }

    /// Probe that fails for the given tokens and records every call
    fn probe_failing(
        failures: Vec<(&'static str, ProbeError)>,
    ) -> (Arc<MockCredentialProbe>, Arc<StdMutex<Vec<String>>>) {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut probe = MockCredentialProbe::new();
        probe.expect_probe().returning(move |token| {
            recorded.lock().unwrap().push(token.to_string());
            match failures.iter().find(|(t, _)| *t == token) {
                Some((_, error)) => Err(error.clone()),
                None => Ok(()),
            }
        });
        (Arc::new(probe), calls)
    }

    fn generator_returning(token: &'static str) -> Arc<MockCredentialGenerator> {
        let mut generator = MockCredentialGenerator::new();
        generator.expect_generate().returning(move || {
            Ok(GeneratedCredential {
                identity: "fresh@example.com".to_string(),
                token: token.to_string(),
            })
        });
        Arc::new(generator)
    }

    #[tokio::test]
    async fn test_round_robin_visits_every_live_entry() {
        let (probe, _) = probe_failing(vec![]);
        let pool = CredentialPool::new(tokens(&["a", "b", "c"]), probe);

        let mut handed_out = Vec::new();
        for _ in 0..4 {
            handed_out.push(pool.acquire().await.unwrap());
        }
        assert_eq!(handed_out, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_dead_entry_is_never_probed_again() {
        let (probe, calls) = probe_failing(vec![(
            "b",
            ProbeError::BannedContent("banned".to_string()),
        )]);
        let pool = CredentialPool::new(tokens(&["a", "b", "c"]), probe);

        assert_eq!(pool.acquire().await.unwrap(), "a");
        assert_eq!(pool.acquire().await.unwrap(), "c");
        for _ in 0..4 {
            assert_ne!(pool.acquire().await.unwrap(), "b");
        }

        let b_probes = calls.lock().unwrap().iter().filter(|t| *t == "b").count();
        assert_eq!(b_probes, 1);

        let snapshot = pool.snapshot().await;
        assert!(snapshot[1].dead);
        assert_eq!(snapshot[1].last_error.as_deref(), Some("banned"));
        assert_eq!(pool.live_count().await, 2);
    }

    #[tokio::test]
    async fn test_rate_limited_probe_keeps_entry_live() {
        let limited = Arc::new(AtomicUsize::new(0));
        let counter = limited.clone();
        let mut probe = MockCredentialProbe::new();
        probe.expect_probe().returning(move |token| {
            if token == "a" && counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProbeError::RateLimited)
            } else {
                Ok(())
            }
        });
        let pool = CredentialPool::new(tokens(&["a", "b"]), Arc::new(probe));

        assert_eq!(pool.acquire().await.unwrap(), "b");
        let snapshot = pool.snapshot().await;
        assert!(!snapshot[0].dead);
        assert_eq!(
            snapshot[0].last_error.as_deref(),
            Some(sentinel::RATE_LIMITED)
        );

        assert_eq!(pool.acquire().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_report_failure_targets_last_acquired() {
        let (probe, _) = probe_failing(vec![]);
        let pool = CredentialPool::new(tokens(&["a", "b"]), probe);

        // Nothing acquired yet
        pool.report_failure("boom").await;
        assert_eq!(pool.live_count().await, 2);

        assert_eq!(pool.acquire().await.unwrap(), "a");
        pool.report_failure("").await;
        assert_eq!(pool.live_count().await, 2);

        pool.report_failure(sentinel::RATE_LIMITED).await;
        let snapshot = pool.snapshot().await;
        assert!(!snapshot[0].dead);
        assert_eq!(
            snapshot[0].last_error.as_deref(),
            Some(sentinel::RATE_LIMITED)
        );

        pool.report_failure("account disabled").await;
        let snapshot = pool.snapshot().await;
        assert!(snapshot[0].dead);
        assert_eq!(snapshot[0].last_error.as_deref(), Some("account disabled"));
        assert!(!snapshot[1].dead);
    }

    #[tokio::test]
    async fn test_report_failure_for_ignores_later_acquisitions() {
        let (probe, _) = probe_failing(vec![]);
        let pool = CredentialPool::new(tokens(&["a", "b"]), probe);

        assert_eq!(pool.acquire().await.unwrap(), "a");
        // A concurrent request moves the cursor before "a" fails
        assert_eq!(pool.acquire().await.unwrap(), "b");

        pool.report_failure_for("a", "account disabled").await;
        let snapshot = pool.snapshot().await;
        assert!(snapshot[0].dead);
        assert_eq!(snapshot[0].last_error.as_deref(), Some("account disabled"));
        assert!(!snapshot[1].dead);
        assert_eq!(snapshot[1].last_error, None);

        pool.report_failure_for("b", sentinel::RATE_LIMITED).await;
        assert!(!pool.snapshot().await[1].dead);

        pool.report_failure_for("missing", "account disabled").await;
        pool.report_failure_for("b", "").await;
        assert_eq!(pool.live_count().await, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_without_generator() {
        let (probe, _) = probe_failing(vec![
            ("a", ProbeError::CompletionError("first".to_string())),
            ("b", ProbeError::CompletionError("second".to_string())),
        ]);
        let pool = CredentialPool::new(tokens(&["a", "b"]), probe);

        assert_eq!(
            pool.acquire().await,
            Err(PoolError::AllDead(
                "Failed to perform completion: second".to_string()
            ))
        );
        // Dead entries still report their stored error
        assert!(matches!(pool.acquire().await, Err(PoolError::AllDead(_))));
    }

    #[tokio::test]
    async fn test_exhaustion_with_generator_appends_and_returns() {
        let (probe, _) = probe_failing(vec![(
            "a",
            ProbeError::HarmContent("harm".to_string()),
        )]);
        let pool = CredentialPool::new(tokens(&["a"]), probe)
            .with_generator(generator_returning("generated"));

        assert_eq!(pool.acquire().await.unwrap(), "generated");
        assert_eq!(pool.len().await, 2);

        // Cursor sits on the generated entry, so the next call wraps to it again
        assert_eq!(pool.acquire().await.unwrap(), "generated");
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let (probe, _) = probe_failing(vec![]);
        let pool = CredentialPool::new(vec![], probe.clone());
        assert_eq!(pool.acquire().await, Err(PoolError::EmptyPool));

        let pool = CredentialPool::new(vec![], probe).with_generator(generator_returning("new"));
        assert!(pool.supports_regeneration());
        assert_eq!(pool.acquire().await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_generator_failure_surfaces_as_all_dead() {
        let (probe, _) = probe_failing(vec![]);
        let mut generator = MockCredentialGenerator::new();
        generator
            .expect_generate()
            .returning(|| Err(PoolError::GenerationFailed("login refused".to_string())));
        let pool = CredentialPool::new(vec![], probe).with_generator(Arc::new(generator));

        assert_eq!(
            pool.acquire().await,
            Err(PoolError::AllDead(
                "Failed to generate credential: login refused".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_sweep_dead_preserves_rotation() {
        let (probe, _) = probe_failing(vec![]);
        let pool = CredentialPool::new(tokens(&["a", "b", "c", "d"]), probe);

        assert_eq!(pool.acquire().await.unwrap(), "a");
        assert_eq!(pool.acquire().await.unwrap(), "b");
        pool.report_failure("dead").await;

        let removed = pool.sweep_dead().await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].token, "b");
        assert_eq!(pool.len().await, 3);

        // Rotation continues after the removed entry
        assert_eq!(pool.acquire().await.unwrap(), "c");
        assert_eq!(pool.acquire().await.unwrap(), "d");
        assert_eq!(pool.acquire().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_revive_and_push() {
        let (probe, _) = probe_failing(vec![]);
        let pool = CredentialPool::new(tokens(&["a"]), probe);
        pool.acquire().await.unwrap();
        pool.report_failure("dead").await;
        assert_eq!(pool.live_count().await, 0);

        assert!(pool.revive("a").await);
        assert!(!pool.revive("missing").await);
        pool.push("b").await;

        assert_eq!(pool.live_count().await, 2);
        assert_eq!(pool.acquire().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_start_pool_static_keys() {
        let (probe, _) = probe_failing(vec![]);
        let config = PoolConfig {
            keys: tokens(&["k1", "k2"]),
            cache_key: Some("ignored".to_string()),
            ..Default::default()
        };
        let login: Arc<dyn LoginFlow> = Arc::new(super::ports::MockLoginFlow::new());

        let handle = start_pool(&config, probe, Some(login), CancellationToken::new());

        assert!(handle.reconciler.is_none());
        assert!(!handle.pool.supports_regeneration());
        assert_eq!(handle.pool.len().await, 2);
        assert_eq!(handle.pool.acquire().await.unwrap(), "k1");
    }

    #[tokio::test]
    async fn test_start_pool_self_healing() {
        let dir = tempfile::tempdir().unwrap();
        let (probe, _) = probe_failing(vec![]);
        let config = PoolConfig {
            cache_key: Some("cached".to_string()),
            warmup_secs: 3600,
            env_file: dir.path().join(".env").to_string_lossy().into_owned(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let login: Arc<dyn LoginFlow> = Arc::new(super::ports::MockLoginFlow::new());

        let handle = start_pool(&config, probe, Some(login), cancel.clone());

        assert!(handle.pool.supports_regeneration());
        assert_eq!(handle.pool.acquire().await.unwrap(), "cached");

        cancel.cancel();
        handle.reconciler.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_pool_without_login_flow() {
        let (probe, _) = probe_failing(vec![]);
        let handle = start_pool(
            &PoolConfig::default(),
            probe,
            None,
            CancellationToken::new(),
        );

        assert!(handle.reconciler.is_none());
        assert_eq!(handle.pool.acquire().await, Err(PoolError::EmptyPool));
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "***");
        assert_eq!(mask_token("sk-ant-sid01-abcdefgh"), "sk-ant***efgh");
        let debug = format!("{:?}", Credential::live("sk-ant-sid01-abcdefgh"));
        assert!(!debug.contains("sid01"));
    }
}
