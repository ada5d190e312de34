mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from carwatch for tests
pub use carwatch::core::db::{
    CarwatchDb, HistoryEvent, HistoryRepository, ImageRepository, NewEvent, NormalizedImage,
    VehicleStatus, WritePolicy,
};
pub use carwatch::{
    BoundingBox, Detection, Error, GlyphBox, ModelError, ModelSet, StorageError, UploadService,
    UploadSpool,
};
