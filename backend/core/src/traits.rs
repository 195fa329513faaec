use std::path::Path;

use async_trait::async_trait;

use crate::error::{InferenceError, LoadError};
use crate::types::{Batch, ImageRef};

/// Sends one batch to a vision-capable endpoint.
#[async_trait]
pub trait InferenceCaller: Send + Sync {
    /// Endpoint name for logs (e.g., "lmstudio", "mock").
    fn name(&self) -> &str;

    /// Run one inference call for the whole batch.
    async fn send(&self, batch: &Batch) -> Result<InferenceReply, InferenceError>;
}

/// Extracted text plus the opaque response it came from.
#[derive(Debug, Clone)]
pub struct InferenceReply {
    pub text: String,
    pub raw: serde_json::Value,
}

/// Reads an image from disk and fingerprints it.
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<ImageRef, LoadError>;
}
