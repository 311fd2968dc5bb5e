//! services/mediqr/src/adapters/scanner.rs
//!
//! A `ScanSource` fed by the console: the UI process runs the camera widget and
//! forwards each decode callback as a message, which this adapter turns into
//! the event stream of the active scan session.

use async_trait::async_trait;
use mediqr_core::ports::{
    PortError, PortResult, ScanEvent, ScanEventStream, ScanSource, SurfaceHandle,
};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

type Feed = Option<mpsc::UnboundedSender<ScanEvent>>;

#[derive(Default)]
pub struct ChannelScanSource {
    feed: Mutex<Feed>,
}

impl ChannelScanSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn feed(&self) -> PortResult<MutexGuard<'_, Feed>> {
        self.feed
            .lock()
            .map_err(|_| PortError::ScanSource("scan feed lock poisoned".to_string()))
    }

    /// Hands an event to the running session. Returns false when no camera is active.
    pub fn push(&self, event: ScanEvent) -> bool {
        match self.feed() {
            Ok(feed) => feed.as_ref().is_some_and(|tx| tx.send(event).is_ok()),
            Err(_) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.feed().map(|feed| feed.is_some()).unwrap_or(false)
    }
}

#[async_trait]
impl ScanSource for ChannelScanSource {
    async fn start(&self, surface: &SurfaceHandle) -> PortResult<ScanEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Replacing the sender ends any stream still attached to the old one.
        *self.feed()? = Some(tx);
        info!(surface = %surface.0, "Camera feed attached");

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }

    fn stop(&self) -> PortResult<()> {
        if self.feed()?.take().is_some() {
            debug!("Camera feed detached");
        }
        Ok(())
    }
}
