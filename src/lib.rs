pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod models;

pub use config::{DbConfig, ModelConfig, Settings};
pub use crate::core::db::{CarwatchDb, HistoryRepository, ImageRepository, WritePolicy};
pub use crate::core::spool::UploadSpool;
pub use crate::core::sweeper::{SweepReport, Sweeper};
pub use crate::core::upload::{ImageResponse, UploadOutcome, UploadService};
pub use detection::{GlyphRecognizer, InferenceParams, ModelSet, PlateDetector};
pub use error::{Error, ModelError, Result, StorageError};
pub use models::{BoundingBox, CropRegion, Detection, Glyph, GlyphBox, PlateCrop, PlateReading};
