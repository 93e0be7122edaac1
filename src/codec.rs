//! Upload validation and image decoding.
//!
//! Uploads are checked twice: once against what the client *declared* (size and
//! content type) and once against what the bytes actually *are*, sniffed from
//! their magic numbers. Only then are they decoded.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::UploadConfig,
    error::{
        ClassifierError, Result, CODE_FILE_TOO_LARGE, CODE_INVALID_IMAGE,
        CODE_UNSUPPORTED_FORMAT,
    },
};

pub const OCTET_STREAM: &str = "application/octet-stream";

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47];

/// Image container formats understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    WebP,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::WebP => "webp",
        }
    }

    fn decoder_format(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::WebP => image::ImageFormat::WebP,
        }
    }
}

/// Detects the MIME type from the leading bytes of `data`.
///
/// Anything that is not a recognised image yields `application/octet-stream`.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.len() < 4 {
        return OCTET_STREAM;
    }
    if data.starts_with(JPEG_MAGIC) {
        return ImageFormat::Jpeg.mime_type();
    }
    if data.starts_with(PNG_MAGIC) {
        return ImageFormat::Png.mime_type();
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return ImageFormat::WebP.mime_type();
    }
    OCTET_STREAM
}

/// Enforces the upload size and type policy.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

impl ImageValidator {
    pub fn new(max_file_size: u64, allowed_types: Vec<String>) -> Self {
        Self {
            max_file_size,
            allowed_types,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_file_size, config.allowed_types.clone())
    }

    pub fn is_allowed_type(&self, content_type: &str) -> bool {
        self.allowed_types.iter().any(|t| t == content_type)
    }

    /// Validates an upload against the declared metadata and its real content.
    pub fn validate(
        &self,
        data: &[u8],
        declared_content_type: &str,
        declared_size: u64,
    ) -> Result<()> {
        if declared_size > self.max_file_size {
            return Err(ClassifierError::validation(
                CODE_FILE_TOO_LARGE,
                format!(
                    "file size {} bytes exceeds maximum allowed size {} bytes",
                    declared_size, self.max_file_size
                ),
            ));
        }
        // The declared size may lie too.
        if data.len() as u64 > self.max_file_size {
            return Err(ClassifierError::validation(
                CODE_FILE_TOO_LARGE,
                format!(
                    "file size {} bytes exceeds maximum allowed size {} bytes",
                    data.len(),
                    self.max_file_size
                ),
            ));
        }
        if !self.is_allowed_type(declared_content_type) {
            return Err(ClassifierError::validation(
                CODE_UNSUPPORTED_FORMAT,
                format!("unsupported file type: {}", declared_content_type),
            ));
        }

        let detected = sniff_mime(data);
        if !self.is_allowed_type(detected) {
            return Err(ClassifierError::validation(
                CODE_UNSUPPORTED_FORMAT,
                format!("detected file type {} is not allowed", detected),
            ));
        }
        Ok(())
    }
}

impl Default for ImageValidator {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// A decoded image together with the container it came from.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decodes `data`, trying PNG, then JPEG, then WebP. The first decoder that
/// succeeds wins.
pub fn decode(data: &[u8]) -> Result<DecodedImage> {
    for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP] {
        match image::load_from_memory_with_format(data, format.decoder_format()) {
            Ok(image) => return Ok(DecodedImage { image, format }),
            Err(e) => debug!(format = format.as_str(), error = %e, "decoder rejected input"),
        }
    }
    Err(ClassifierError::Decode("unsupported image format".to_string()))
}

/// Encodes an image as JPEG with the given quality (1-100).
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

/// Produces a JPEG thumbnail that fits in a `size` x `size` box, keeping the
/// aspect ratio.
pub fn thumbnail(image: &DynamicImage, size: u32) -> Result<Vec<u8>> {
    if size == 0 {
        return Err(ClassifierError::validation(
            CODE_INVALID_IMAGE,
            "thumbnail size must be positive",
        ));
    }
    let thumb = image.resize(size, size, FilterType::Lanczos3);
    encode_jpeg(&thumb, 85)
}

/// Metadata about an uploaded image. Built once by the upload path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub filename: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

impl ImageMetadata {
    pub fn new(
        filename: &str,
        size: u64,
        decoded: &DecodedImage,
        content_type: &str,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            size,
            width: decoded.width(),
            height: decoded.height(),
            format: decoded.format.as_str().to_string(),
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        }
    }
}
