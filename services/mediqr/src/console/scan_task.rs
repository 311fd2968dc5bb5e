//! services/mediqr/src/console/scan_task.rs
//!
//! This module contains the asynchronous "worker" function that drives one scan
//! session and reports its progress to the UI.

use crate::console::{
    protocol::{ScanEndReason, ServerMessage},
    state::Outbox,
};
use mediqr_core::{rejection_message, ScanOutcome, ScanResolution, ScanSession};
use std::time::Duration;
use tracing::{error, info};

/// Runs a started scan session to completion.
///
/// Rejections are forwarded as they happen and the session keeps going. The
/// session is cancelled from the outside through the resolver.
pub async fn scan_process(session: ScanSession, outbox: Outbox, error_ttl: Duration) {
    let scan_id = session.id();
    let rejections = outbox.clone();
    let ttl_ms = u64::try_from(error_ttl.as_millis()).unwrap_or(u64::MAX);

    let result = session
        .resolve(move |e| {
            rejections.send(ServerMessage::ScanRejected {
                message: rejection_message(e),
                ttl_ms,
            })
        })
        .await;

    let reason = match result {
        Ok(ScanOutcome::Resolved(ScanResolution::LoggedIn(session))) => {
            outbox.send(ServerMessage::LoggedIn { session });
            ScanEndReason::Resolved
        }
        Ok(ScanOutcome::Resolved(ScanResolution::PatientFound(patient_id))) => {
            outbox.send(ServerMessage::PatientFound { patient_id });
            ScanEndReason::Resolved
        }
        Ok(ScanOutcome::Cancelled) => ScanEndReason::Cancelled,
        Ok(ScanOutcome::SourceEnded) => ScanEndReason::SourceEnded,
        Err(e) => {
            error!(%scan_id, "Scan session failed: {:?}", e);
            outbox.send(ServerMessage::from(&e));
            ScanEndReason::Failed
        }
    };

    info!(%scan_id, ?reason, "Scan task finished.");
    outbox.send(ServerMessage::ScanEnded { reason });
}
