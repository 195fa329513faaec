//! MIME type detection for image files.
//!
//! Extension-based only; the bytes are never sniffed.

use std::path::Path;

/// Fallback for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Detect MIME type by file extension.
pub fn detect_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png"          => "image/png",
        "gif"          => "image/gif",
        "webp"         => "image/webp",
        "bmp"          => "image/bmp",
        "tiff" | "tif" => "image/tiff",
        "avif"         => "image/avif",
        "ico"          => "image/x-icon",
        "svg"          => "image/svg+xml",
        _              => OCTET_STREAM,
    }
}

/// Encoded bytes as a `data:` URL for inline upload.
pub fn to_data_url(mime: &str, data: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    format!("data:{};base64,{}", mime, STANDARD.encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::path::PathBuf;

    #[test]
    fn detects_jpeg_case_insensitively() {
        assert_eq!(detect_mime_type(&PathBuf::from("photo.JPG")), "image/jpeg");
        assert_eq!(detect_mime_type(&PathBuf::from("scan.tif")), "image/tiff");
    }

    #[test]
    fn unknown_extension_fallback() {
        assert_eq!(detect_mime_type(&PathBuf::from("sample.unknownext")), OCTET_STREAM);
    }

    #[test]
    fn data_url_decodes_back_to_payload() {
        let payload = b"\x89PNG\r\n\x1a\nrest";
        let url = to_data_url("image/png", payload);
        assert!(url.starts_with("data:image/png;base64,"));
        let encoded = url.split_once(',').map(|(_, b)| b).unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), payload);
    }
}
