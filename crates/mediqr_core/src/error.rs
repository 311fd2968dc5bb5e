//! crates/mediqr_core/src/error.rs
//!
//! Failure values returned by the core services.

use crate::domain::PatientId;
use crate::ports::PortError;

/// Every way a core operation can fail.
///
/// Stored bytes that fail to decode are not represented here: the record store
/// absorbs them and reports an empty collection.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("An account with the email {0} already exists")]
    EmailTaken(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("Invalid MediQR code: {0:?}")]
    InvalidToken(String),

    #[error("No patient record with id {0}")]
    RecordNotFound(PatientId),

    #[error("Could not allocate a unique patient id after {0} attempts")]
    IdSpaceExhausted(usize),

    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),
}

impl CoreError {
    /// Failures the UI shows briefly and then clears, as opposed to ones that
    /// need different input before retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidCredentials
                | CoreError::PatientNotFound(_)
                | CoreError::InvalidToken(_)
        )
    }
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;
