pub mod glyphs;
pub mod plate;
pub mod preprocessing;
pub mod yolo;

use image::DynamicImage;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::ModelError;
use crate::models::{Detection, GlyphBox, PlateReading};

/// Thresholds handed to a model; both are applied by the model itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
    /// Minimum confidence for a box to be reported.
    pub confidence: f32,
    /// IoU above which overlapping boxes are suppressed.
    pub iou: f32,
}

/// Locates plate regions in a full frame.
pub trait PlateDetector: Send + Sync {
    fn detect(
        &self,
        frame: &DynamicImage,
        params: InferenceParams,
    ) -> Result<Vec<Detection>, ModelError>;
}

/// Locates and labels individual characters on a plate crop.
pub trait GlyphRecognizer: Send + Sync {
    fn recognize(
        &self,
        crop: &DynamicImage,
        params: InferenceParams,
    ) -> Result<Vec<GlyphBox>, ModelError>;
}

/// The two cascade models, loaded once at startup and read-only afterwards.
///
/// Share it as `Arc<ModelSet>`; both stages only take `&self`, so any number of
/// workers can run the cascade at the same time.
pub struct ModelSet {
    detector: Box<dyn PlateDetector>,
    recognizer: Box<dyn GlyphRecognizer>,
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSet").finish_non_exhaustive()
    }
}

impl ModelSet {
    pub fn new(
        detector: impl PlateDetector + 'static,
        recognizer: impl GlyphRecognizer + 'static,
    ) -> Self {
        Self {
            detector: Box::new(detector),
            recognizer: Box::new(recognizer),
        }
    }

    /// Load both models from disk. A failure here must stop the process.
    pub fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        info!(path = %config.plate_model.display(), "loading plate detection model");
        let detector = yolo::YoloPlateDetector::load(&config.plate_model, config.input_size)?;

        info!(path = %config.glyph_model.display(), "loading glyph recognition model");
        let recognizer = yolo::YoloGlyphRecognizer::load(
            &config.glyph_model,
            config.input_size,
            config.glyph_classes.chars().collect(),
        )?;

        info!("models loaded");
        Ok(Self::new(detector, recognizer))
    }

    pub fn detector(&self) -> &dyn PlateDetector {
        self.detector.as_ref()
    }

    pub fn recognizer(&self) -> &dyn GlyphRecognizer {
        self.recognizer.as_ref()
    }

    /// Run detection then recognition on one frame.
    ///
    /// No plate, or no readable characters, yields an empty plate string.
    pub fn read_plate(&self, frame: &DynamicImage) -> Result<PlateReading, ModelError> {
        debug!(width = frame.width(), height = frame.height(), "stage 1: detecting plates");
        let crop = plate::detect_and_crop(self.detector(), frame)?;

        debug!("stage 2: recognizing characters");
        let plate = glyphs::recognize(self.recognizer(), crop.as_ref())?;

        Ok(PlateReading {
            plate,
            region: crop.as_ref().map(|crop| crop.region),
            plate_confidence: crop.as_ref().map(|crop| crop.confidence),
        })
    }
}
