//! Image I/O for UltraVision: loading, fingerprinting, MIME detection and
//! pre-upload preparation.

pub mod loader;
pub mod mime_detect;
pub mod transform;

pub use loader::{sha256_hex, FsImageLoader};
pub use mime_detect::{detect_mime_type, to_data_url};
pub use transform::{ImageInfo, TransformOptions};
