//! services/mediqr/src/console/state.rs
//!
//! Defines the application's shared state and the outbound message queue.

use crate::adapters::{ChannelScanSource, FileAttachmentEncoder};
use crate::config::Config;
use crate::console::protocol::ServerMessage;
use mediqr_core::{
    AttachmentEncoder, IdentityService, KeyValueStore, PatientRepository, RecordStore, ScanResolver,
    SessionSlots,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

//=========================================================================================
// AppState (Shared by the console loop and the scan task)
//=========================================================================================

/// The shared application state, created once at startup.
#[derive(Clone)]
pub struct AppState {
    pub identity: IdentityService,
    pub patients: PatientRepository,
    pub resolver: Arc<ScanResolver>,
    pub scanner: Arc<ChannelScanSource>,
    pub encoder: Arc<dyn AttachmentEncoder>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the core services over the given key-value medium.
    pub fn new(kv: Arc<dyn KeyValueStore>, config: Arc<Config>) -> Self {
        let store = RecordStore::new(kv);
        let patients = PatientRepository::new(store.clone());
        let identity = IdentityService::new(
            store.clone(),
            patients.clone(),
            SessionSlots::new(store),
            config.identity(),
        );
        let scanner = Arc::new(ChannelScanSource::new());
        let resolver = Arc::new(ScanResolver::new(
            scanner.clone(),
            identity.clone(),
            patients.clone(),
            config.scan(),
        ));

        Self {
            identity,
            patients,
            resolver,
            scanner,
            encoder: Arc::new(FileAttachmentEncoder::new()),
            config,
        }
    }
}

//=========================================================================================
// Outbox
//=========================================================================================

/// Queues messages for the writer task. Cloned into every task that talks to the UI.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: ServerMessage) {
        if self.tx.send(message).is_err() {
            warn!("Output closed; dropping message.");
        }
    }
}
