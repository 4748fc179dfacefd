use std::{collections::HashMap, env, str::FromStr};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub cursor: CursorConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    /// Upper bound for one backend round trip, in seconds
    pub request_timeout_secs: u64,
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            pool: PoolConfig::from_env()?,
            cursor: CursorConfig::from_env()?,
            session: SessionConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 120)?,
        })
    }
}

/// Read `key` and parse it, falling back to `default` when unset or blank.
///
/// A value that is present but unparsable is an error rather than silently
/// replaced by the default.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| format!("{key} has an invalid value: {value}")),
        _ => Ok(default),
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma separated key list, dropping blanks
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| "SERVER_PORT must be a valid port number")?,
        })
    }
}

/// Credential pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of credentials the reconciler keeps alive
    pub minimum_survival: usize,
    /// Statically configured keys. When present the pool never regenerates.
    pub keys: Vec<String>,
    /// Last generated credential, persisted across restarts
    pub cache_key: Option<String>,
    pub warmup_secs: u64,
    pub interval_secs: u64,
    /// File generated credentials are persisted into
    pub env_file: String,
}

impl PoolConfig {
    pub const CACHE_KEY_NAME: &'static str = "CACHE_KEY";

    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            minimum_survival: parse_env("MINIMUM_SURVIVAL", 3)?,
            keys: env::var("KEYS")
                .map(|raw| parse_key_list(&raw))
                .unwrap_or_default(),
            cache_key: optional_env(Self::CACHE_KEY_NAME),
            warmup_secs: parse_env("POOL_WARMUP_SECS", 3)?,
            interval_secs: parse_env("POOL_INTERVAL_SECS", 5)?,
            env_file: env::var("ENV_FILE").unwrap_or_else(|_| ".env".to_string()),
        })
    }

    /// Keys configured statically switch the pool into local mode
    pub fn is_static(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            minimum_survival: 3,
            keys: Vec::new(),
            cache_key: None,
            warmup_secs: 3,
            interval_secs: 5,
            env_file: ".env".to_string(),
        }
    }
}

/// Binary-protocol backend configuration
#[derive(Debug, Clone)]
pub struct CursorConfig {
    pub base_url: String,
    pub client_version: String,
    pub timezone: String,
    /// Static checksum overriding the token-derived one
    pub checksum: Option<String>,
    /// Model used by the credential health probe
    pub probe_model: String,
    pub proxy: Option<String>,
}

impl CursorConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        Ok(Self {
            base_url: env::var("CURSOR_BASE_URL").unwrap_or(defaults.base_url),
            client_version: env::var("CURSOR_CLIENT_VERSION").unwrap_or(defaults.client_version),
            timezone: env::var("CURSOR_TIMEZONE").unwrap_or(defaults.timezone),
            checksum: optional_env("CURSOR_CHECKSUM"),
            probe_model: env::var("CURSOR_PROBE_MODEL").unwrap_or(defaults.probe_model),
            proxy: optional_env("PROXY"),
        })
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api2.cursor.sh".to_string(),
            client_version: "0.42.3".to_string(),
            timezone: "Asia/Shanghai".to_string(),
            checksum: None,
            probe_model: "claude-3.5-sonnet".to_string(),
            proxy: None,
        }
    }
}

/// Session-oriented backend configuration
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub kiev_rps_sec_auth: Option<String>,
    pub rw_bf: Option<String>,
    /// Delete the remote conversation when a session is removed
    pub delete_history: bool,
    pub proxy: Option<String>,
}

impl SessionConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            kiev_rps_sec_auth: optional_env("BING_KievAuth"),
            rw_bf: optional_env("BING_RwBf"),
            delete_history: parse_env("SESSION_DELETE_HISTORY", false)?,
            proxy: optional_env("PROXY"),
        })
    }
}

/// Logging Configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub modules: HashMap<String, String>,
}

impl LoggingConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, String> {
        let mut modules = HashMap::new();

        // Load module-specific log levels
        if let Ok(level) = env::var("LOG_MODULE_API") {
            modules.insert("api".to_string(), level);
        }
        if let Ok(level) = env::var("LOG_MODULE_SERVICES") {
            modules.insert("services".to_string(), level);
        }
        if let Ok(level) = env::var("LOG_MODULE_PROVIDERS") {
            modules.insert("inference_providers".to_string(), level);
        }

        Ok(Self {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            modules,
        })
    }

    /// Filter directive understood by `tracing_subscriber::EnvFilter`
    pub fn filter_directive(&self) -> String {
        let mut filter = self.level.clone();
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        for (module, level) in modules {
            filter.push_str(&format!(",{module}={level}"));
        }
        filter
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut modules = HashMap::new();
        modules.insert("api".to_string(), "debug".to_string());
        modules.insert("services".to_string(), "debug".to_string());

        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            modules,
        }
    }
}
