use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use time::{OffsetDateTime, macros::format_description};
use tokio::fs as async_fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageError;

/// Directory holding short-lived copies of uploads while they are processed.
///
/// Copies are removed when their [`SpooledUpload`] is dropped; anything left
/// behind by a crash is collected by the sweeper.
#[derive(Debug, Clone)]
pub struct UploadSpool {
    dir: PathBuf,
}

impl UploadSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write(
        &self,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<SpooledUpload, StorageError> {
        async_fs::create_dir_all(&self.dir).await?;

        let filename = spool_filename(original_name);
        let spooled = SpooledUpload {
            path: self.dir.join(&filename),
            filename,
        };
        // A failed write drops `spooled`, which removes the partial file.
        async_fs::write(&spooled.path, bytes).await?;
        debug!(path = %spooled.path.display(), size = bytes.len(), "upload spooled");
        Ok(spooled)
    }
}

/// A spooled upload; the file is deleted on drop.
#[derive(Debug)]
pub struct SpooledUpload {
    path: PathBuf,
    filename: String,
}

impl SpooledUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl Drop for SpooledUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "spooled upload removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), %err, "failed to remove spooled upload"),
        }
    }
}

/// `image_<utc timestamp>_<random><.ext>`, keeping a sane extension of the
/// client's filename.
fn spool_filename(original_name: &str) -> String {
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!("[year][month][day][hour][minute][second]"))
        .unwrap_or_default();
    let unique = Uuid::new_v4().simple().to_string();
    format!("image_{stamp}_{}{}", &unique[..8], extension(original_name))
}

fn extension(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}
