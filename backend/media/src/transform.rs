//! Image inspection and preparation: dimensions, EXIF autorotate, downscaling.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageDecoder, ImageFormat, ImageReader};

/// What to do to an image before it is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Apply the EXIF orientation tag.
    pub autorotate: bool,
    /// Downscale so that `max(width, height) <= max_side`.
    pub max_side: Option<u32>,
}

impl TransformOptions {
    pub fn is_noop(&self) -> bool {
        !self.autorotate && self.max_side.is_none()
    }
}

/// Dimensions and color mode of an encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mode: String,
}

/// Re-encoded image bytes plus the MIME type they were encoded as.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub info: ImageInfo,
}

/// Read dimensions and color mode from the header without a full decode.
pub fn probe(bytes: &[u8]) -> Result<ImageInfo> {
    let decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("guess image format")?
        .into_decoder()
        .context("open image decoder")?;
    let (width, height) = decoder.dimensions();
    Ok(ImageInfo { width, height, mode: color_mode(decoder.color_type()) })
}

/// Apply autorotate / downscale and re-encode.
///
/// The output format follows the source MIME: JPEG stays JPEG, WebP stays
/// WebP, anything else becomes PNG.
pub fn prepare(bytes: &[u8], mime: &str, opts: TransformOptions) -> Result<Prepared> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("guess image format")?
        .into_decoder()
        .context("open image decoder")?;
    let orientation = if opts.autorotate {
        Some(decoder.orientation().context("read EXIF orientation")?)
    } else {
        None
    };
    let mut img = DynamicImage::from_decoder(decoder).context("decode image")?;
    if let Some(orientation) = orientation {
        img.apply_orientation(orientation);
    }
    if let Some(max_side) = opts.max_side {
        if max_side > 0 && img.width().max(img.height()) > max_side {
            img = img.resize(max_side, max_side, FilterType::Lanczos3);
        }
    }

    let (format, out_mime) = match mime {
        "image/jpeg" | "image/jpg" => (ImageFormat::Jpeg, "image/jpeg"),
        "image/webp" => (ImageFormat::WebP, "image/webp"),
        _ => (ImageFormat::Png, "image/png"),
    };
    // The JPEG encoder rejects alpha channels.
    if format == ImageFormat::Jpeg && img.color().has_alpha() {
        img = DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let info = ImageInfo {
        width: img.width(),
        height: img.height(),
        mode: color_mode(img.color()),
    };
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format)
        .with_context(|| format!("encode image as {format:?}"))?;
    Ok(Prepared { bytes: out, mime: out_mime, info })
}

/// Short mode names in the usual Pillow vocabulary.
fn color_mode(color: ColorType) -> String {
    match color {
        ColorType::L8 => "L".into(),
        ColorType::La8 => "LA".into(),
        ColorType::Rgb8 => "RGB".into(),
        ColorType::Rgba8 => "RGBA".into(),
        ColorType::L16 => "I;16".into(),
        other => format!("{other:?}"),
    }
}
