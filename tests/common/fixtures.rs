use std::{
    io::Cursor,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use carwatch::core::db::{CarwatchDb, WritePolicy};
use carwatch::{
    BoundingBox, DbConfig, Detection, GlyphBox, GlyphRecognizer, InferenceParams, ModelError,
    ModelSet, PlateDetector, UploadService, UploadSpool,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, Rgba};

/// Plate detector double that returns the same detections for every frame
/// and counts how often it was asked.
#[derive(Clone, Default)]
pub struct ScriptedDetector {
    pub detections: Vec<Detection>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PlateDetector for ScriptedDetector {
    fn detect(
        &self,
        _frame: &DynamicImage,
        _params: InferenceParams,
    ) -> Result<Vec<Detection>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }
}

/// Glyph recognizer double; remembers the dimensions of every crop it saw.
#[derive(Clone, Default)]
pub struct ScriptedRecognizer {
    pub glyphs: Vec<GlyphBox>,
    pub seen: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl ScriptedRecognizer {
    pub fn new(glyphs: Vec<GlyphBox>) -> Self {
        Self {
            glyphs,
            seen: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<(u32, u32)> {
        self.seen.lock().unwrap().clone()
    }
}

impl GlyphRecognizer for ScriptedRecognizer {
    fn recognize(
        &self,
        crop: &DynamicImage,
        _params: InferenceParams,
    ) -> Result<Vec<GlyphBox>, ModelError> {
        self.seen.lock().unwrap().push((crop.width(), crop.height()));
        Ok(self.glyphs.clone())
    }
}

/// Detector whose inference always fails.
pub struct BrokenDetector;

impl PlateDetector for BrokenDetector {
    fn detect(
        &self,
        _frame: &DynamicImage,
        _params: InferenceParams,
    ) -> Result<Vec<Detection>, ModelError> {
        Err(ModelError::Inference("tensor shape mismatch".to_string()))
    }
}

/// Detector that takes longer than any sane request timeout.
pub struct SlowDetector(pub Duration);

impl PlateDetector for SlowDetector {
    fn detect(
        &self,
        _frame: &DynamicImage,
        _params: InferenceParams,
    ) -> Result<Vec<Detection>, ModelError> {
        std::thread::sleep(self.0);
        Ok(Vec::new())
    }
}

pub fn detection(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
    Detection {
        bbox: BoundingBox::new(x1, y1, x2, y2),
        confidence,
    }
}

/// Glyph box centered at `x_center`, 4px wide.
pub fn glyph(label: char, x_center: f32, confidence: f32) -> GlyphBox {
    GlyphBox {
        label,
        bbox: BoundingBox::new(x_center - 2.0, 0.0, x_center + 2.0, 10.0),
        confidence,
    }
}

/// Detector and recognizer that read "B1234XYZ" off a plate in the middle
/// of a 200x200 frame.
pub fn plate_models() -> (ScriptedDetector, ScriptedRecognizer) {
    let detector = ScriptedDetector::new(vec![detection(40.0, 80.0, 160.0, 120.0, 0.9)]);
    let recognizer = ScriptedRecognizer::new(
        "B1234XYZ"
            .chars()
            .enumerate()
            .map(|(i, label)| glyph(label, 10.0 + 12.0 * i as f32, 0.8))
            .collect(),
    );
    (detector, recognizer)
}

/// Creates a solid RGB frame.
pub fn create_test_frame(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
    }))
}

/// Encodes a 200x200 RGB frame in `format`.
pub fn encoded_frame(format: ImageFormat) -> Vec<u8> {
    encode(&create_test_frame(200, 200), format)
}

/// Encodes a 64x64 half-transparent RGBA PNG.
pub fn rgba_png() -> Vec<u8> {
    let img = ImageBuffer::from_fn(64, 64, |x, _| Rgba([255u8, 0u8, 0u8, (x * 4) as u8]));
    encode(&DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

/// Encodes a 4x4 two-color palette PNG without transparency.
pub fn palette_png() -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut encoder = png::Encoder::new(&mut buffer, 4, 4);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(vec![255u8, 0, 0, 0, 0, 255]);
    let mut writer = encoder
        .write_header()
        .expect("Failed to write palette png header");
    let indices: Vec<u8> = (0..16).map(|i| (i % 2) as u8).collect();
    writer
        .write_image_data(&indices)
        .expect("Failed to write palette png data");
    writer.finish().expect("Failed to finish palette png");
    buffer
}

pub fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, format)
        .expect("Failed to encode test image");
    buffer.into_inner()
}

/// Opens a database in a fresh temp directory.
/// Returns both the database and the temp directory (which must be kept alive).
pub async fn create_test_db(policy: WritePolicy) -> (CarwatchDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let db = open_db(&dir, policy, true).await;
    (db, dir)
}

pub async fn open_db(dir: &tempfile::TempDir, policy: WritePolicy, migrate: bool) -> CarwatchDb {
    let config = DbConfig {
        path: dir.path().join("carwatch.db"),
        policy,
        migrate,
    };
    CarwatchDb::open(&config)
        .await
        .expect("Failed to open test database")
}

/// Upload service over a temp database and spool directory.
pub async fn create_test_service(
    models: ModelSet,
    policy: WritePolicy,
) -> (UploadService, tempfile::TempDir) {
    let (db, dir) = create_test_db(policy).await;
    let spool = UploadSpool::new(dir.path().join("uploads"));
    let service = UploadService::new(db, Arc::new(models), spool, Duration::from_secs(10));
    (service, dir)
}

/// Files currently in the spool directory of a test service.
pub fn spooled_files(dir: &tempfile::TempDir) -> usize {
    match std::fs::read_dir(dir.path().join("uploads")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}
