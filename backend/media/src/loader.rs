//! Filesystem image loader: read, fingerprint, describe, optionally transform.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;

use ultravision_core::{ImageLoader, ImageMeta, ImageRef, LoadError};

use crate::mime_detect::detect_mime_type;
use crate::transform::{self, TransformOptions};

/// Hex SHA-256 of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Loads images from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsImageLoader {
    transform: TransformOptions,
}

impl FsImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(mut self, transform: TransformOptions) -> Self {
        self.transform = transform;
        self
    }
}

#[async_trait]
impl ImageLoader for FsImageLoader {
    async fn load(&self, path: &Path) -> Result<ImageRef, LoadError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| LoadError::new(path, e))?;
        let path_buf = path.to_path_buf();
        let opts = self.transform;

        // Hashing and decoding are CPU-bound.
        tokio::task::spawn_blocking(move || describe(path_buf, raw, opts))
            .await
            .map_err(|e| LoadError::new(path, e))
    }
}

fn describe(path: std::path::PathBuf, raw: Vec<u8>, opts: TransformOptions) -> ImageRef {
    let sha256 = sha256_hex(&raw);
    let mut mime = detect_mime_type(&path).to_string();

    let mut info = None;
    let mut payload = raw;
    if !opts.is_noop() {
        match transform::prepare(&payload, &mime, opts) {
            Ok(prepared) => {
                payload = prepared.bytes;
                mime = prepared.mime.to_string();
                info = Some(prepared.info);
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Transform failed; sending original bytes"),
        }
    }
    if info.is_none() {
        info = transform::probe(&payload).ok();
    }

    let meta = ImageMeta {
        file: path.display().to_string(),
        size_bytes: payload.len() as u64,
        mime,
        sha256,
        width: info.as_ref().map(|i| i.width),
        height: info.as_ref().map(|i| i.height),
        mode: info.map(|i| i.mode),
    };
    ImageRef { path, meta, payload: Bytes::from(payload) }
}
