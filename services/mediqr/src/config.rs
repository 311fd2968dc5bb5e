//! services/mediqr/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use mediqr_core::{IdentityConfig, ScanConfig};
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub log_level: Level,
    pub scan_error_ttl: Duration,
    pub hospital_email: String,
    pub hospital_password: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Storage ---
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://mediqr.db?mode=rwc".to_string());
        if database_url.trim().is_empty() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Scanner ---
        let scan_error_ttl = match lookup("SCAN_ERROR_TTL_MS") {
            Some(raw) => raw.parse::<u64>().map(Duration::from_millis).map_err(|e| {
                ConfigError::InvalidValue("SCAN_ERROR_TTL_MS".to_string(), e.to_string())
            })?,
            None => Duration::from_millis(3000),
        };

        // --- Built-in hospital account ---
        let hospital_email =
            lookup("HOSPITAL_DEMO_EMAIL").unwrap_or_else(|| "doctor@hospital.com".to_string());
        let hospital_password =
            lookup("HOSPITAL_DEMO_PASSWORD").unwrap_or_else(|| "password123".to_string());

        Ok(Self {
            database_url,
            log_level,
            scan_error_ttl,
            hospital_email,
            hospital_password,
        })
    }

    pub fn identity(&self) -> IdentityConfig {
        IdentityConfig {
            hospital_email: self.hospital_email.clone(),
            hospital_secret: self.hospital_password.clone(),
        }
    }

    pub fn scan(&self) -> ScanConfig {
        ScanConfig {
            error_ttl: self.scan_error_ttl,
        }
    }
}
