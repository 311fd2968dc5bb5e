//! crates/mediqr_core/src/ports.rs
//!
//! Defines the service contracts (traits) the core depends on.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of the storage medium, the camera widget and the file encoder.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external collaborators (database, camera, disk).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Storage backend failure: {0}")]
    Storage(String),
    #[error("Scan source failure: {0}")]
    ScanSource(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Key-Value Medium
//=========================================================================================

/// The durable medium under the record store.
///
/// Each call is independent: there is no transactional guarantee across keys.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes) -> PortResult<()>;

    async fn remove(&self, key: &str) -> PortResult<()>;
}

//=========================================================================================
// Scan Source
//=========================================================================================

/// One callback from the camera widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A QR code was decoded to this text.
    Decoded(String),
    /// A frame produced nothing usable. Expected noise while the camera warms up.
    Failed(String),
}

/// The stream of events produced by a started scan source. It ends when the source stops.
pub type ScanEventStream = Pin<Box<dyn Stream<Item = ScanEvent> + Send>>;

/// Names the surface the camera preview is mounted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceHandle(pub String);

#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Acquires the camera and begins decoding onto `surface`.
    async fn start(&self, surface: &SurfaceHandle) -> PortResult<ScanEventStream>;

    /// Releases the camera. Must be safe to call any number of times.
    fn stop(&self) -> PortResult<()>;
}

//=========================================================================================
// Attachment Encoder
//=========================================================================================

/// A file turned into a self-describing text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAttachment {
    pub name: String,
    pub mime_type: String,
    /// A `data:` URL that can be downloaded directly later.
    pub payload: String,
}

#[async_trait]
pub trait AttachmentEncoder: Send + Sync {
    /// Reads and encodes the file at `path`.
    async fn encode(&self, path: &Path) -> PortResult<EncodedAttachment>;
}
