use std::{fs, io::Cursor, path::Path, sync::Arc};

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use vista::{
    config::AppConfig,
    engine::SimulatedEngine,
    pipeline::ClassificationService,
    registry::ModelRegistry,
    store::ResultStore,
};

/// A solid 100x100 RGBA image of (255, 128, 64).
#[allow(dead_code)]
pub fn solid_image() -> DynamicImage {
    let img = ImageBuffer::from_pixel(100, 100, Rgba([255u8, 128, 64, 255]));
    DynamicImage::ImageRgba8(img)
}

/// A small image with some structure so resizing has work to do.
#[allow(dead_code)]
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x * 255 / width) as u8, (y * 255 / height) as u8, 128, 255])
    });
    DynamicImage::ImageRgba8(img)
}

#[allow(dead_code)]
pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut buf, format)
            .unwrap(),
        _ => image.write_to(&mut buf, format).unwrap(),
    }
    buf.into_inner()
}

#[allow(dead_code)]
pub fn png_bytes() -> Vec<u8> {
    encode(&solid_image(), ImageFormat::Png)
}

#[allow(dead_code)]
pub fn jpeg_bytes() -> Vec<u8> {
    encode(&solid_image(), ImageFormat::Jpeg)
}

#[allow(dead_code)]
pub fn webp_bytes() -> Vec<u8> {
    encode(&solid_image(), ImageFormat::WebP)
}

/// Writes `metadata.json` for model `id` under `root`.
#[allow(dead_code)]
pub fn write_model(root: &Path, id: &str, metadata: &str) {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("metadata.json"), metadata).unwrap();
}

/// A service over the models in `root`, using the simulated engine.
#[allow(dead_code)]
pub fn service_for(root: &Path) -> ClassificationService {
    service_with_engine(root).0
}

/// Like [`service_for`], also handing back the engine so tests can take
/// models offline.
#[allow(dead_code)]
pub fn service_with_engine(root: &Path) -> (ClassificationService, Arc<SimulatedEngine>) {
    let mut config = AppConfig::default();
    config.model.path = root.to_path_buf();
    let registry = ModelRegistry::open(root, &config.model.version);
    let engine = Arc::new(SimulatedEngine::new());
    let service = ClassificationService::new(
        config,
        Arc::new(registry),
        engine.clone(),
        Arc::new(ResultStore::new()),
    )
    .unwrap();
    (service, engine)
}
