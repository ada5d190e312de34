//! Cleanup of stale spooled uploads.
//!
//! Tests cover:
//! - Age threshold (strictly older only)
//! - Idempotence
//! - Missing directory and non-file entries
//! - Files that cannot be removed

use std::{
    fs::File,
    path::Path,
    time::{Duration, SystemTime},
};

use carwatch::{Sweeper, UploadSpool};

const HOUR: Duration = Duration::from_secs(60 * 60);

fn touch(path: &Path, age: Duration, now: SystemTime) -> anyhow::Result<()> {
    let file = File::create(path)?;
    file.set_modified(now - age)?;
    Ok(())
}

#[tokio::test]
async fn test_only_stale_files_are_removed() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let now = SystemTime::now();
    touch(&dir.path().join("fresh.jpg"), 23 * HOUR, now)?;
    touch(&dir.path().join("stale.jpg"), 25 * HOUR, now)?;

    let sweeper = Sweeper::new(dir.path());
    let report = sweeper.sweep_at(24 * HOUR, now).await?;

    assert_eq!(report.removed_count, 1);
    assert!(dir.path().join("fresh.jpg").exists());
    assert!(!dir.path().join("stale.jpg").exists());

    // A second pass finds nothing left to do
    let report = sweeper.sweep_at(24 * HOUR, now).await?;
    assert_eq!(report.removed_count, 0);
    assert!(dir.path().join("fresh.jpg").exists());

    Ok(())
}

#[tokio::test]
async fn test_file_exactly_at_threshold_is_kept() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let now = SystemTime::now();
    touch(&dir.path().join("edge.png"), 24 * HOUR, now)?;

    let report = Sweeper::new(dir.path()).sweep_at(24 * HOUR, now).await?;

    assert_eq!(report.removed_count, 0);
    assert!(dir.path().join("edge.png").exists());

    Ok(())
}

#[tokio::test]
async fn test_directories_are_left_alone() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::create_dir(dir.path().join("nested"))?;

    let later = SystemTime::now() + 48 * HOUR;
    let report = Sweeper::new(dir.path()).sweep_at(24 * HOUR, later).await?;

    assert_eq!(report.removed_count, 0);
    assert!(dir.path().join("nested").is_dir());

    Ok(())
}

#[tokio::test]
async fn test_missing_directory_is_not_an_error() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let report = Sweeper::new(dir.path().join("never_created"))
        .sweep_hours(24)
        .await?;
    assert_eq!(report.removed_count, 0);

    Ok(())
}

#[tokio::test]
async fn test_spooled_upload_is_removed_on_drop() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let spool = UploadSpool::new(dir.path().join("uploads"));

    let spooled = spool.write(b"bytes", "Car Photo.JPG").await?;
    let path = spooled.path().to_path_buf();
    assert!(path.exists());
    assert!(spooled.filename().starts_with("image_"));
    assert!(spooled.filename().ends_with(".jpg"));

    drop(spooled);
    assert!(!path.exists());

    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_removal_failure_does_not_abort_sweep() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::TempDir::new()?;
    let now = SystemTime::now();
    touch(&dir.path().join("stale_a.jpg"), 30 * HOUR, now)?;
    touch(&dir.path().join("stale_b.jpg"), 30 * HOUR, now)?;

    // Without write permission on the directory no entry can be unlinked
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555))?;
    if File::create(dir.path().join("writable_check")).is_ok() {
        // Running with CAP_DAC_OVERRIDE (root): permissions are not enforced
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755))?;
        return Ok(());
    }

    let result = Sweeper::new(dir.path()).sweep_at(24 * HOUR, now).await;
    std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755))?;

    let report = result?;
    assert_eq!(report.removed_count, 0);
    assert!(dir.path().join("stale_a.jpg").exists());
    assert!(dir.path().join("stale_b.jpg").exists());

    Ok(())
}
