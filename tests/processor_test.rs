use vista::{
    config::{IMAGENET_MEAN, IMAGENET_STD},
    pipeline::RequestContext,
    processor::{flatten, ImagePreprocessor, ImageProcessor},
};

mod common;
use common::{gradient_image, jpeg_bytes, png_bytes, service_for, solid_image, webp_bytes};

#[test]
fn test_solid_image_first_pixel() {
    let processor = ImagePreprocessor::default();
    let tensor = processor.process(&solid_image()).unwrap();
    let flat = flatten(&tensor);

    assert_eq!(flat.len(), 224 * 224 * 3);
    let expected_r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
    let expected_g = (128.0 / 255.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
    let expected_b = (64.0 / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
    assert!((flat[0] - expected_r).abs() < 1e-2, "red was {}", flat[0]);
    assert!((flat[1] - expected_g).abs() < 1e-2, "green was {}", flat[1]);
    assert!((flat[2] - expected_b).abs() < 1e-2, "blue was {}", flat[2]);
    assert!((flat[0] - 2.249).abs() < 1e-2);
}

#[test]
fn test_without_normalization_values_are_unit_range() {
    let processor = ImagePreprocessor::new(32, 16, false, IMAGENET_MEAN, IMAGENET_STD);
    let tensor = processor.process(&gradient_image(64, 64)).unwrap();
    assert_eq!(tensor.shape(), &[1, 16, 32, 3]);
    assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_process_batch() {
    let processor = ImagePreprocessor::default().with_size(48, 48);
    let a = solid_image();
    let b = gradient_image(30, 90);
    let tensor = processor.process_batch(vec![&a, &b]).unwrap();
    assert_eq!(tensor.shape(), &[2, 48, 48, 3]);

    assert!(processor.process_batch(vec![]).is_err());
}

#[test]
fn test_uploads_produce_full_tensors() {
    let root = tempfile::tempdir().unwrap();
    let service = service_for(root.path());
    let ctx = RequestContext::new();

    for (data, content_type) in [
        (png_bytes(), "image/png"),
        (jpeg_bytes(), "image/jpeg"),
        (webp_bytes(), "image/webp"),
    ] {
        let upload = service
            .process_upload(&data, "fixture", content_type, data.len() as u64, &ctx)
            .unwrap();
        assert!(upload.metadata.width > 0 && upload.metadata.height > 0);
        assert_eq!(upload.metadata.content_type, content_type);

        let decoded = vista::codec::decode(&upload.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (224, 224));

        let model = service.registry().default_model().unwrap();
        let preprocessor = service.preprocessor_for(&model.info);
        let tensor = preprocessor.process(&decoded.image).unwrap();
        assert_eq!(
            flatten(&tensor).len(),
            preprocessor.height as usize * preprocessor.width as usize * 3
        );
    }
}
