//! services/mediqr/src/console/protocol.rs
//!
//! Defines the line protocol between the UI process and the MediQR core.
//! Each message is one JSON object per line, tagged by `type`.

use mediqr_core::{CoreError, Patient, PatientDraft, PatientId, Role, ScanContext, Session};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

//=========================================================================================
// Messages Sent FROM the UI TO the Core
//=========================================================================================
// NOTE: the camera widget lives in the UI; its callbacks arrive here as `decoded`
// and `scan_failed` messages while a scan is running.
//=========================================================================================

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Creates a patient profile and its account. `files` are attached as initial records.
    Register {
        patient: PatientDraft,
        password: String,
        #[serde(default)]
        files: Vec<PathBuf>,
    },

    Login { email: String, password: String, role: Role },

    /// A token typed in by hand instead of scanned.
    LoginWithToken { token: String },

    /// One-click re-login with the last token that worked.
    LoginLastScanned,

    Logout,

    /// Asks for the current session.
    Whoami,

    GetPatient { patient_id: PatientId },

    /// Encodes the file and appends it to the patient's records.
    AddRecord { patient_id: PatientId, path: PathBuf },

    /// Mounts the camera. Any running scan is torn down first.
    StartScan {
        context: ScanContext,
        #[serde(default)]
        surface: Option<String>,
    },

    CancelScan,

    Decoded { text: String },

    ScanFailed { reason: String },
}

//=========================================================================================
// Messages Sent FROM the Core TO the UI
//=========================================================================================

/// Why a scan session ended.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanEndReason {
    Resolved,
    Cancelled,
    SourceEnded,
    Failed,
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration succeeded. The UI shows the patient id and renders its QR code.
    Registered { patient: Patient },

    LoggedIn { session: Session },

    LoggedOut,

    Session {
        session: Option<Session>,
        last_scanned: Option<PatientId>,
    },

    Patient { patient: Patient },

    RecordAdded { patient_id: PatientId, record_count: usize },

    ScanStarted { context: ScanContext },

    /// A scan was rejected. The scan keeps running; the message expires after `ttl_ms`.
    ScanRejected { message: String, ttl_ms: u64 },

    /// A lookup scan matched; the UI opens the read-only profile view.
    PatientFound { patient_id: PatientId },

    ScanEnded { reason: ScanEndReason },

    Error { kind: ErrorKind, message: String },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmailTaken,
    InvalidCredentials,
    PatientNotFound,
    InvalidToken,
    RecordNotFound,
    Unauthenticated,
    Forbidden,
    ScanInactive,
    BadRequest,
    Internal,
}

impl ServerMessage {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            kind,
            message: message.into(),
        }
    }
}

impl From<&CoreError> for ServerMessage {
    fn from(error: &CoreError) -> Self {
        let kind = match error {
            CoreError::EmailTaken(_) => ErrorKind::EmailTaken,
            CoreError::InvalidCredentials => ErrorKind::InvalidCredentials,
            CoreError::PatientNotFound(_) => ErrorKind::PatientNotFound,
            CoreError::InvalidToken(_) => ErrorKind::InvalidToken,
            CoreError::RecordNotFound(_) => ErrorKind::RecordNotFound,
            CoreError::IdSpaceExhausted(_) | CoreError::Port(_) => ErrorKind::Internal,
        };
        ServerMessage::error(kind, error.to_string())
    }
}

impl From<CoreError> for ServerMessage {
    fn from(error: CoreError) -> Self {
        ServerMessage::from(&error)
    }
}
