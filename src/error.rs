use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure taxonomy shared by the cascade, the stores and the upload workflow.
///
/// A missing plate or an unreadable one is never represented here: both are
/// valid outcomes carried as an empty plate string.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Short machine-readable tag, used in upload outcomes and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Input(_) => "input",
            Error::Decode(_) => "decode",
            Error::Model(_) => "model",
            Error::Storage(_) => "storage",
            Error::NotFound(_) => "not_found",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(StorageError::Database(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(StorageError::Io(err))
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to load model {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("image is {size} bytes after normalization, the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("table `{0}` is still missing after schema repair")]
    MissingTable(&'static str),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
}
