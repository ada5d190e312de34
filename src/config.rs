use std::{path::PathBuf, time::Duration};

use crate::core::db::WritePolicy;

/// Default character classes of the glyph model, in class-index order.
pub const DEFAULT_GLYPH_CLASSES: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub plate_model: PathBuf,
    pub glyph_model: PathBuf,
    pub glyph_classes: String,
    /// Square input edge length both models were exported with.
    pub input_size: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            plate_model: PathBuf::from("models/plate.rten"),
            glyph_model: PathBuf::from("models/glyphs.rten"),
            glyph_classes: DEFAULT_GLYPH_CLASSES.to_string(),
            input_size: 640,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    pub policy: WritePolicy,
    /// Apply the embedded migrations before probing the schema.
    pub migrate: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("carwatch.db"),
            policy: WritePolicy::SingleLatest,
            migrate: true,
        }
    }
}

/// Everything the service needs at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db: DbConfig,
    pub models: ModelConfig,
    /// Directory holding transient copies of uploads.
    pub spool_dir: PathBuf,
    /// Upper bound for model inference and for each store write.
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            models: ModelConfig::default(),
            spool_dir: PathBuf::from("uploads"),
            request_timeout: Duration::from_secs(30),
        }
    }
}
