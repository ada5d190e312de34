use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use serde::Serialize;
use tokio::{fs as async_fs, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::error::StorageError;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed_count: usize,
}

/// Removes spooled upload copies that outlived `max_age`.
///
/// Only files strictly older than the threshold are touched, so uploads still
/// in flight are never raced.
#[derive(Debug, Clone)]
pub struct Sweeper {
    dir: PathBuf,
}

impl Sweeper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn sweep(&self, max_age: Duration) -> Result<SweepReport, StorageError> {
        self.sweep_at(max_age, SystemTime::now()).await
    }

    pub async fn sweep_hours(&self, max_age_hours: u64) -> Result<SweepReport, StorageError> {
        self.sweep(Duration::from_secs(max_age_hours.saturating_mul(60 * 60)))
            .await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_at(
        &self,
        max_age: Duration,
        now: SystemTime,
    ) -> Result<SweepReport, StorageError> {
        let mut entries = match async_fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "spool directory does not exist, nothing to sweep");
                return Ok(SweepReport::default());
            }
            Err(err) => return Err(err.into()),
        };

        let mut report = SweepReport::default();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %path.display(), %err, "cannot stat file, skipped");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let age = match metadata.modified() {
                Ok(modified) => now.duration_since(modified).unwrap_or_default(),
                Err(err) => {
                    warn!(path = %path.display(), %err, "no modification time, skipped");
                    continue;
                }
            };
            if age <= max_age {
                continue;
            }

            match async_fs::remove_file(&path).await {
                Ok(()) => {
                    info!(path = %path.display(), age_secs = age.as_secs(), "removed stale upload");
                    report.removed_count += 1;
                }
                Err(err) => warn!(path = %path.display(), %err, "failed to remove stale upload"),
            }
        }

        info!(dir = %self.dir.display(), removed = report.removed_count, "sweep finished");
        Ok(report)
    }

    /// Sweep every `every` on the current tokio runtime until the task is aborted.
    pub fn spawn_periodic(self, max_age: Duration, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep(max_age).await {
                    warn!(dir = %self.dir.display(), %err, "periodic sweep failed");
                }
            }
        })
    }
}
