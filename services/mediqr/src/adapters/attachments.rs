//! services/mediqr/src/adapters/attachments.rs
//!
//! This module contains the file attachment encoder.
//! It implements the `AttachmentEncoder` port by reading a file from disk and
//! turning it into a `data:` URL that can be downloaded later as-is.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use mediqr_core::ports::{AttachmentEncoder, EncodedAttachment, PortError, PortResult};
use std::path::Path;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `AttachmentEncoder` port for local files.
#[derive(Clone, Default)]
pub struct FileAttachmentEncoder;

impl FileAttachmentEncoder {
    pub fn new() -> Self {
        Self
    }

    fn data_url(mime_type: &str, contents: &[u8]) -> String {
        format!("data:{};base64,{}", mime_type, STANDARD.encode(contents))
    }
}

//=========================================================================================
// `AttachmentEncoder` Trait Implementation
//=========================================================================================

#[async_trait]
impl AttachmentEncoder for FileAttachmentEncoder {
    async fn encode(&self, path: &Path) -> PortResult<EncodedAttachment> {
        let contents = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PortError::NotFound(path.display().to_string()),
            _ => PortError::Unexpected(format!("Failed to read {}: {}", path.display(), e)),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let payload = Self::data_url(&mime_type, &contents);

        Ok(EncodedAttachment {
            name,
            mime_type,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn encodes_file_as_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xray.png");
        std::fs::File::create(&path).unwrap().write_all(b"hello").unwrap();

        let encoded = FileAttachmentEncoder::new().encode(&path).await.unwrap();
        assert_eq!(encoded.name, "xray.png");
        assert_eq!(encoded.mime_type, "image/png");
        assert_eq!(encoded.payload, "data:image/png;base64,aGVsbG8=");
    }

    #[tokio::test]
    async fn unknown_extension_falls_back_to_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.zzqx");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        let encoded = FileAttachmentEncoder::new().encode(&path).await.unwrap();
        assert_eq!(encoded.mime_type, "application/octet-stream");
        assert!(encoded.payload.starts_with("data:application/octet-stream;base64,"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileAttachmentEncoder::new()
            .encode(&dir.path().join("absent.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }
}
