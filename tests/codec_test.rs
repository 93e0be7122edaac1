use image::ImageFormat as Container;
use vista::{
    codec::{self, sniff_mime, ImageFormat, ImageValidator},
    error::{ClassifierError, CODE_FILE_TOO_LARGE, CODE_UNSUPPORTED_FORMAT},
};

mod common;
use common::{gradient_image, jpeg_bytes, png_bytes, webp_bytes};

#[test]
fn test_sniff_magic_bytes() {
    assert_eq!(sniff_mime(&png_bytes()), "image/png");
    assert_eq!(sniff_mime(&jpeg_bytes()), "image/jpeg");
    assert_eq!(sniff_mime(&webp_bytes()), "image/webp");
    assert_eq!(sniff_mime(b"GIF89a........"), codec::OCTET_STREAM);
    assert_eq!(sniff_mime(&[]), codec::OCTET_STREAM);
}

#[test]
fn test_validate_accepts_allowed_formats() {
    let validator = ImageValidator::default();
    for (data, content_type) in [
        (png_bytes(), "image/png"),
        (jpeg_bytes(), "image/jpeg"),
        (webp_bytes(), "image/webp"),
    ] {
        validator
            .validate(&data, content_type, data.len() as u64)
            .unwrap();
    }
}

#[test]
fn test_validate_rejects_lying_content_type() {
    let validator = ImageValidator::default();
    let data = b"GIF89a not really an allowed image".to_vec();
    let err = validator
        .validate(&data, "image/png", data.len() as u64)
        .unwrap_err();
    assert_eq!(err.code(), CODE_UNSUPPORTED_FORMAT);
}

#[test]
fn test_validate_rejects_disallowed_declared_type() {
    let validator = ImageValidator::default();
    let data = png_bytes();
    let err = validator
        .validate(&data, "image/gif", data.len() as u64)
        .unwrap_err();
    assert_eq!(err.code(), CODE_UNSUPPORTED_FORMAT);
}

#[test]
fn test_validate_rejects_large_files() {
    let validator = ImageValidator::new(1024, vec!["image/png".to_string()]);
    let data = png_bytes();

    let err = validator.validate(&data, "image/png", 4096).unwrap_err();
    assert_eq!(err.code(), CODE_FILE_TOO_LARGE);

    // A declared size that understates the real length is caught as well.
    let big = codec::encode_jpeg(&gradient_image(512, 512), 100).unwrap();
    let validator = ImageValidator::new(1024, vec!["image/jpeg".to_string()]);
    let err = validator.validate(&big, "image/jpeg", 10).unwrap_err();
    assert_eq!(err.code(), CODE_FILE_TOO_LARGE);
}

#[test]
fn test_decode_all_formats() {
    for (data, format) in [
        (png_bytes(), ImageFormat::Png),
        (jpeg_bytes(), ImageFormat::Jpeg),
        (webp_bytes(), ImageFormat::WebP),
    ] {
        let decoded = codec::decode(&data).unwrap();
        assert_eq!(decoded.format, format);
        assert_eq!((decoded.width(), decoded.height()), (100, 100));
    }
}

#[test]
fn test_decode_garbage() {
    let err = codec::decode(b"definitely not an image").unwrap_err();
    assert!(matches!(err, ClassifierError::Decode(_)));
    assert_eq!(err.code(), "INVALID_IMAGE");
}

#[test]
fn test_thumbnail_keeps_aspect_ratio() {
    let bytes = codec::thumbnail(&gradient_image(200, 100), 64).unwrap();
    let thumb = image::load_from_memory_with_format(&bytes, Container::Jpeg).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (64, 32));
}
