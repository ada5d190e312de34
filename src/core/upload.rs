use std::{sync::Arc, time::Duration};

use image::DynamicImage;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::core::db::{
    CarwatchDb, HistoryEvent, HistoryRepository, ImageHandle, ImageRepository, NewEvent,
    NormalizedImage, SourceKind, VehicleStatus, WritePolicy,
};
use crate::core::spool::UploadSpool;
use crate::detection::ModelSet;
use crate::error::{Error, ModelError, Result, StorageError};
use crate::models::PlateReading;

/// Reply to an upload, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
    pub plate_number: String,
    pub status: String,
    pub image_uploaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl UploadOutcome {
    fn failed(status: &str, err: &Error) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            plate_number: String::new(),
            status: status.to_string(),
            image_uploaded: false,
            image_id: None,
            image_filename: None,
            upload_error: None,
            event_id: None,
            error_kind: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResponse {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// One upload end to end: spool, decode, read the plate, store the image,
/// record the event.
#[derive(Debug, Clone)]
pub struct UploadService {
    db: CarwatchDb,
    models: Arc<ModelSet>,
    spool: UploadSpool,
    timeout: Duration,
}

impl UploadService {
    pub fn new(db: CarwatchDb, models: Arc<ModelSet>, spool: UploadSpool, timeout: Duration) -> Self {
        Self {
            db,
            models,
            spool,
            timeout,
        }
    }

    pub fn db(&self) -> &CarwatchDb {
        &self.db
    }

    /// Like [`UploadService::process`], with every failure folded into the outcome.
    pub async fn upload(&self, bytes: &[u8], original_name: &str, status: &str) -> UploadOutcome {
        match self.process(bytes, original_name, status).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(kind = err.kind(), %err, "upload rejected");
                UploadOutcome::failed(status, &err)
            }
        }
    }

    /// Run the whole workflow for one upload.
    ///
    /// Input, decode and model failures abort before anything is persisted.
    /// A failed image write is reported in the outcome and the event is still
    /// recorded, without an image reference.
    pub async fn process(
        &self,
        bytes: &[u8],
        original_name: &str,
        status: &str,
    ) -> Result<UploadOutcome> {
        if bytes.is_empty() {
            return Err(Error::Input("no image payload in the request".to_string()));
        }

        let spooled = self.spool.write(bytes, original_name).await?;
        info!(file = spooled.filename(), status, "image saved temporarily");

        let source = SourceKind::detect(bytes);
        let frame = Arc::new(image::load_from_memory(bytes).map_err(Error::Decode)?);

        let reading = self.read_plate(Arc::clone(&frame)).await?;
        if reading.plate.is_empty() {
            info!("no readable plate, recording the event anyway");
        }

        let stored = self.store_frame(frame, source, spooled.filename()).await;

        let image_ref = stored.as_ref().ok().map(|handle| handle.id);
        let event = NewEvent::recognized(
            reading.plate.clone(),
            VehicleStatus::from_tag(status),
            image_ref,
        );
        let recorded = self.bounded(self.db.record_event(&event)).await;
        drop(spooled);

        let mut outcome = UploadOutcome {
            success: true,
            message: String::new(),
            plate_number: reading.plate,
            status: status.to_string(),
            image_uploaded: false,
            image_id: None,
            image_filename: None,
            upload_error: None,
            event_id: None,
            error_kind: None,
        };
        match &stored {
            Ok(handle) => {
                outcome.image_uploaded = true;
                outcome.image_id = Some(handle.id);
                outcome.image_filename = Some(handle.filename.clone());
            }
            Err(err) => {
                warn!(%err, "failed to upload image to database");
                outcome.upload_error = Some(err.to_string());
            }
        }

        match recorded {
            Ok(event_id) => {
                outcome.event_id = Some(event_id);
                outcome.message = if outcome.image_uploaded {
                    "Image received, stored, plate read and event recorded.".to_string()
                } else {
                    "Plate read and event recorded; the image was not stored.".to_string()
                };
            }
            Err(err) => {
                error!(%err, "failed to record history event");
                if let (Ok(handle), WritePolicy::AppendOnly) = (&stored, self.db.policy()) {
                    self.discard_image(handle).await;
                    outcome.image_uploaded = false;
                    outcome.image_id = None;
                    outcome.image_filename = None;
                }
                outcome.success = false;
                outcome.error_kind = Some(err.kind());
                outcome.message = format!("Failed to record data to database: {err}");
            }
        }
        Ok(outcome)
    }

    /// Run the cascade off the async workers, bounded by the request timeout.
    pub async fn read_plate(&self, frame: Arc<DynamicImage>) -> Result<PlateReading> {
        let models = Arc::clone(&self.models);
        let task = tokio::task::spawn_blocking(move || models.read_plate(&frame));
        match timeout(self.timeout, task).await {
            Ok(Ok(reading)) => Ok(reading?),
            Ok(Err(join_err)) => {
                Err(ModelError::Inference(format!("inference task failed: {join_err}")).into())
            }
            Err(_) => Err(ModelError::Timeout(self.timeout).into()),
        }
    }

    /// Re-encode off the async workers and write; both steps share one timeout.
    async fn store_frame(
        &self,
        frame: Arc<DynamicImage>,
        source: SourceKind,
        filename: &str,
    ) -> Result<ImageHandle> {
        let db = &self.db;
        self.bounded(async move {
            let normalized =
                tokio::task::spawn_blocking(move || NormalizedImage::encode(&frame, source))
                    .await
                    .map_err(std::io::Error::other)??;
            db.store_image(filename, &normalized).await
        })
        .await
    }

    async fn discard_image(&self, handle: &ImageHandle) {
        match self.db.delete_image(handle.id).await {
            Ok(()) => info!(id = handle.id, "removed image row of the failed upload"),
            Err(err) => warn!(id = handle.id, %err, "failed to remove image row of the failed upload"),
        }
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.timeout).into()),
        }
    }

    pub async fn read_image(&self, id: i64) -> Result<ImageResponse> {
        let image = self.db.get_image(id).await?;
        let content_type = image.content_type();
        Ok(ImageResponse {
            bytes: image.data,
            content_type,
        })
    }

    pub async fn list_history(&self) -> Result<Vec<HistoryEvent>> {
        self.db.list_events().await
    }

    pub async fn record_manual(
        &self,
        plate: &str,
        subject: &str,
        description: &str,
        user_id: Option<i64>,
    ) -> Result<i64> {
        let event = NewEvent::manual(plate, subject, description, user_id)?;
        self.bounded(self.db.record_event(&event)).await
    }
}
