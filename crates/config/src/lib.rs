// Configuration Management
//
// This crate handles all configuration loading and persistence for the gateway.
// It provides:
// - Configuration structs populated from the environment
// - `.env` loading at startup
// - Durable KEY="VALUE" persistence for generated credentials
//
// This keeps configuration concerns separate from the pool and backend logic.

use thiserror::Error;

pub mod env_file;
pub mod types;

// Re-export all configuration types
pub use env_file::{upsert_env_line, write_env_value};
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to access env file: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("Invalid env key pattern: {source}")]
    PatternError {
        #[from]
        source: regex::Error,
    },
}

/// Main configuration loading interface
impl GatewayConfig {
    /// Load `.env` (if present) into the process environment, then read the configuration
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env is normal in containerised deployments
        let _ = dotenvy::dotenv();
        Self::from_env().map_err(ConfigError::Invalid)
    }
}
