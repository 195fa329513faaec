//! Core types, traits and error taxonomy shared by the UltraVision crates.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{InferenceError, LoadError, RetryClass, UltraError};
pub use traits::{ImageLoader, InferenceCaller, InferenceReply};
pub use types::{Batch, BatchResult, ImageMeta, ImageRef, OutputFormat};
