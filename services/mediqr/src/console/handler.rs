//! services/mediqr/src/console/handler.rs
//!
//! This is the main entry point and control loop for a console connection.
//! It reads one client message per line, delegates to the core services, and
//! runs scan sessions as background tasks.

use crate::console::{
    protocol::{ClientMessage, ErrorKind, ServerMessage},
    scan_task::scan_process,
    state::{AppState, Outbox},
};
use crate::error::AppError;
use chrono::Utc;
use mediqr_core::{
    MedicalRecord, PatientId, Role, ScanContext, ScanEvent, ScanResolution, Session, SurfaceHandle,
};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs the console protocol until `input` reaches end of file.
///
/// Returns the output sink once every queued message has been written.
pub async fn run_console<R, W>(state: AppState, input: R, output: W) -> Result<W, AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("Console session started.");
    let (outbox, rx) = Outbox::channel();
    let writer = tokio::spawn(write_process(output, rx));

    let mut lines = BufReader::new(input).lines();
    let mut scan_task: Option<JoinHandle<()>> = None;

    // --- 1. Main Message Loop ---
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientMessage>(&line) {
            Ok(message) => {
                if let Err(reply) = handle_message(message, &state, &outbox, &mut scan_task).await {
                    warn!("Request failed: {:?}", reply);
                    outbox.send(reply);
                }
            }
            Err(e) => {
                warn!("Failed to deserialize client message: {}", e);
                outbox.send(ServerMessage::error(ErrorKind::BadRequest, e.to_string()));
            }
        }
    }

    // --- 2. Cleanup ---
    info!("Input closed; releasing the camera.");
    state.resolver.cancel();
    if let Some(handle) = scan_task {
        if let Err(e) = handle.await {
            warn!("Scan task ended abnormally: {}", e);
        }
    }
    drop(outbox);

    let output = writer
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    info!("Console session closed.");
    Ok(output)
}

/// Drains the outbox, writing one JSON object per line.
async fn write_process<W>(
    mut output: W,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(output)
}

/// Whether `session` may read or append to the given patient's records.
fn may_access(session: &Session, patient_id: &PatientId) -> bool {
    match session.role {
        Role::Hospital => true,
        Role::Patient => session.patient_id.as_ref() == Some(patient_id),
    }
}

async fn require_session(state: &AppState) -> Result<Session, ServerMessage> {
    state
        .identity
        .current_session()
        .await?
        .ok_or_else(|| ServerMessage::error(ErrorKind::Unauthenticated, "Please log in first."))
}

async fn encode_record(
    state: &AppState,
    path: &Path,
    author: Role,
) -> Result<MedicalRecord, ServerMessage> {
    let encoded = state
        .encoder
        .encode(path)
        .await
        .map_err(|e| ServerMessage::error(ErrorKind::BadRequest, e.to_string()))?;
    Ok(MedicalRecord {
        name: encoded.name,
        mime_type: encoded.mime_type,
        payload: encoded.payload,
        uploaded_at: Utc::now(),
        author,
    })
}

/// Helper function to handle the logic for the different `ClientMessage` variants.
async fn handle_message(
    message: ClientMessage,
    state: &AppState,
    outbox: &Outbox,
    scan_task: &mut Option<JoinHandle<()>>,
) -> Result<(), ServerMessage> {
    match message {
        ClientMessage::Register {
            patient,
            password,
            files,
        } => {
            let mut records = Vec::with_capacity(files.len());
            for path in &files {
                records.push(encode_record(state, path, Role::Patient).await?);
            }
            let patient = state.identity.register(patient, &password, records).await?;
            outbox.send(ServerMessage::Registered { patient });
        }
        ClientMessage::Login {
            email,
            password,
            role,
        } => {
            let session = state
                .identity
                .login_with_credentials(&email, &password, role)
                .await?;
            outbox.send(ServerMessage::LoggedIn { session });
        }
        ClientMessage::LoginWithToken { token } => {
            // Typed-in codes go through the same shape check as scanned ones.
            let resolution = state
                .resolver
                .handle_event(ScanContext::Login, ScanEvent::Decoded(token))
                .await?;
            if let Some(ScanResolution::LoggedIn(session)) = resolution {
                outbox.send(ServerMessage::LoggedIn { session });
            }
        }
        ClientMessage::LoginLastScanned => {
            let session = state.identity.login_with_last_scanned().await?;
            outbox.send(ServerMessage::LoggedIn { session });
        }
        ClientMessage::Logout => {
            state.identity.logout().await?;
            outbox.send(ServerMessage::LoggedOut);
        }
        ClientMessage::Whoami => {
            let session = state.identity.current_session().await?;
            let last_scanned = state.identity.last_scanned().await?;
            outbox.send(ServerMessage::Session {
                session,
                last_scanned,
            });
        }
        ClientMessage::GetPatient { patient_id } => {
            let session = require_session(state).await?;
            if !may_access(&session, &patient_id) {
                return Err(ServerMessage::error(ErrorKind::Forbidden, "Not your patient record."));
            }
            let patient = state.patients.get_by_id(&patient_id).await?.ok_or_else(|| {
                let message = format!("Patient not found: {}", patient_id);
                ServerMessage::error(ErrorKind::PatientNotFound, message)
            })?;
            outbox.send(ServerMessage::Patient { patient });
        }
        ClientMessage::AddRecord { patient_id, path } => {
            let session = require_session(state).await?;
            if !may_access(&session, &patient_id) {
                return Err(ServerMessage::error(ErrorKind::Forbidden, "Not your patient record."));
            }
            let record = encode_record(state, &path, session.role).await?;
            let patient = state.patients.add_record(&patient_id, record).await?;
            outbox.send(ServerMessage::RecordAdded {
                patient_id: patient.id,
                record_count: patient.medical_records.len(),
            });
        }
        ClientMessage::StartScan { context, surface } => {
            if context == ScanContext::Lookup {
                let session = require_session(state).await?;
                if session.role != Role::Hospital {
                    return Err(ServerMessage::error(
                        ErrorKind::Forbidden,
                        "Only hospital staff can look up patients.",
                    ));
                }
            }
            let surface =
                SurfaceHandle(surface.unwrap_or_else(|| default_surface(context).to_string()));
            let session = state.resolver.begin(context, &surface).await?;

            // `begin` already cancelled the previous session; let its task report that first.
            if let Some(previous) = scan_task.take() {
                if let Err(e) = previous.await {
                    warn!("Previous scan task ended abnormally: {}", e);
                }
            }

            outbox.send(ServerMessage::ScanStarted { context });
            let task = {
                let outbox = outbox.clone();
                let error_ttl = state.config.scan_error_ttl;
                tokio::spawn(scan_process(session, outbox, error_ttl))
            };
            *scan_task = Some(task);
        }
        ClientMessage::CancelScan => {
            state.resolver.cancel();
        }
        ClientMessage::Decoded { text } => {
            if !state.scanner.push(ScanEvent::Decoded(text)) {
                return Err(ServerMessage::error(ErrorKind::ScanInactive, "No scan is running."));
            }
        }
        ClientMessage::ScanFailed { reason } => {
            if !state.scanner.push(ScanEvent::Failed(reason)) {
                debug!("Scan failure reported with no scan running; ignored.");
            }
        }
    }
    Ok(())
}

fn default_surface(context: ScanContext) -> &'static str {
    match context {
        ScanContext::Login => "qr-scanner",
        ScanContext::Lookup => "qr-reader",
    }
}
