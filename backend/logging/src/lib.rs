//! Telemetry and structured logging components for UltraVision.
//!
//! Handles log redaction, console and rolling JSON output, and run progress events.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogger, RunEvent, RunEventEntry};
pub use logger::init_logger;
pub use redact::{mask_secret, redact_sensitive_data};
