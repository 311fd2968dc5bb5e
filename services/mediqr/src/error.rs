//! services/mediqr/src/error.rs
//!
//! Defines the primary error type for the MediQR service.

use crate::config::ConfigError;

/// The primary error type for the `mediqr` service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., reading stdin).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(var: &str) -> Result<(), AppError> {
        let config: Result<(), ConfigError> = Err(ConfigError::MissingVar(var.to_string()));
        config?;
        Ok(())
    }

    #[test]
    fn startup_failures_keep_their_source() {
        let err = load("DATABASE_URL").unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::MissingVar(ref v)) if v == "DATABASE_URL"
        ));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout closed");
        assert!(matches!(AppError::from(io), AppError::Io(_)));
    }
}
