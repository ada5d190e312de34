mod history;
mod image;
mod schema;
mod state;

use std::sync::Arc;

use sqlx::{Row, Sqlite, SqlitePool, sqlite::{SqliteArguments, SqliteRow}};
use state::DbState;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::DbConfig;
use crate::error::{Error, Result, StorageError};

pub use history::{HistoryEvent, HistoryRepository, NewEvent, VehicleStatus};
pub use image::{
    ExportedImage, ImageHandle, ImageRepository, MAX_IMAGE_BYTES, NormalizedImage, SourceKind,
    StoredImage, WritePolicy, check_size, remove_old_exports,
};
pub use schema::SchemaProfile;

const INSERT_IMAGE_SQL: &str = r#"INSERT INTO images (filename, data, size, format, upload_time)
    VALUES ($1, $2, $3, $4, $5) RETURNING id"#;

const SELECT_IMAGE_COLUMNS: &str = "id, filename, data, size, format, upload_time";

/// Handle to the carwatch database: the `images` blob store and the
/// `history` ledger. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CarwatchDb {
    state: Arc<DbState>,
}

impl CarwatchDb {
    pub async fn open(config: &DbConfig) -> Result<Self> {
        Ok(Self {
            state: Arc::new(DbState::open(config).await?),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.state.pool()
    }

    pub fn schema(&self) -> &SchemaProfile {
        self.state.profile()
    }

    pub fn policy(&self) -> WritePolicy {
        self.state.policy()
    }

    async fn insert_image(
        &self,
        filename: &str,
        image: &NormalizedImage,
        upload_time: i64,
    ) -> Result<i64, sqlx::Error> {
        let pool = self.state.pool();
        match self.state.policy() {
            WritePolicy::SingleLatest => {
                let mut tx = pool.begin().await?;
                sqlx::query("DELETE FROM images").execute(&mut *tx).await?;
                let id = insert_image_query(filename, image, upload_time)
                    .fetch_one(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(id)
            }
            WritePolicy::AppendOnly => {
                insert_image_query(filename, image, upload_time)
                    .fetch_one(pool)
                    .await
            }
        }
    }
}

fn insert_image_query<'q>(
    filename: &'q str,
    image: &'q NormalizedImage,
    upload_time: i64,
) -> sqlx::query::QueryScalar<'q, Sqlite, i64, SqliteArguments<'q>> {
    sqlx::query_scalar(INSERT_IMAGE_SQL)
        .bind(filename)
        .bind(image.data.as_slice())
        .bind(image.size() as i64)
        .bind(image.format_name())
        .bind(upload_time)
}

impl ImageRepository for CarwatchDb {
    async fn store_image(&self, filename: &str, image: &NormalizedImage) -> Result<ImageHandle> {
        image.check_size()?;
        let upload_time = now_micros();

        let id = match self.insert_image(filename, image, upload_time).await {
            Ok(id) => id,
            Err(err) if schema::is_missing_table(&err, "images") => {
                warn!(%err, "images table is missing, creating it and retrying once");
                schema::create_images_table(self.state.pool()).await?;
                self.insert_image(filename, image, upload_time)
                    .await
                    .map_err(|err| {
                        if schema::is_missing_table(&err, "images") {
                            StorageError::MissingTable("images")
                        } else {
                            StorageError::Database(err)
                        }
                    })?
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            id,
            filename,
            size = image.size(),
            format = image.format_name(),
            policy = ?self.state.policy(),
            "image stored"
        );
        Ok(ImageHandle {
            id,
            filename: filename.to_string(),
            size: image.size(),
            format: image.format_name().to_string(),
        })
    }

    async fn get_image(&self, id: i64) -> Result<StoredImage> {
        let sql = format!("SELECT {SELECT_IMAGE_COLUMNS} FROM images WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.state.pool())
            .await;
        match row {
            Ok(Some(row)) => Ok(stored_image_from_row(&row)?),
            Ok(None) => Err(Error::NotFound(format!("image {id}"))),
            Err(err) if schema::is_missing_table(&err, "images") => {
                Err(Error::NotFound(format!("image {id}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn latest_image(&self) -> Result<Option<StoredImage>> {
        let sql = format!(
            "SELECT {SELECT_IMAGE_COLUMNS} FROM images ORDER BY upload_time DESC, id DESC LIMIT 1"
        );
        match sqlx::query(&sql).fetch_optional(self.state.pool()).await {
            Ok(row) => Ok(row.as_ref().map(stored_image_from_row).transpose()?),
            Err(err) if schema::is_missing_table(&err, "images") => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn count_images(&self) -> Result<i64> {
        match sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(self.state.pool())
            .await
        {
            Ok(count) => Ok(count),
            Err(err) if schema::is_missing_table(&err, "images") => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_image(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(self.state.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("image {id}")));
        }
        Ok(())
    }
}

impl HistoryRepository for CarwatchDb {
    async fn record_event(&self, event: &NewEvent) -> Result<i64> {
        let profile = self.state.profile();

        let mut query = sqlx::query(profile.insert_event_sql())
            .bind(event.plate.as_str())
            .bind(event.subject.as_str())
            .bind(event.description.as_str())
            .bind(now_micros());
        if profile.history_image_ref {
            query = query.bind(event.image_ref);
        } else if event.image_ref.is_some() {
            debug!("history has no image_id column, image reference not recorded");
        }
        if profile.history_user_id {
            query = query.bind(event.user_id);
        }

        let id = query.execute(self.state.pool()).await?.last_insert_rowid();
        info!(
            id,
            plate = %event.plate,
            subject = %event.subject,
            image_ref = ?event.image_ref,
            "history event recorded"
        );
        Ok(id)
    }

    async fn list_events(&self) -> Result<Vec<HistoryEvent>> {
        sqlx::query(self.state.profile().select_events_sql())
            .fetch_all(self.state.pool())
            .await?
            .iter()
            .map(|row| -> Result<HistoryEvent> {
                Ok(HistoryEvent {
                    id: row.try_get("id")?,
                    subject: row.try_get("subject")?,
                    plate: row.try_get("plate")?,
                    description: row.try_get("description")?,
                    timestamp: from_micros(row.try_get("timestamp")?)?,
                    image_ref: row.try_get("image_id")?,
                    user_id: row.try_get("user_id")?,
                })
            })
            .collect()
    }
}

fn stored_image_from_row(row: &SqliteRow) -> Result<StoredImage, sqlx::Error> {
    Ok(StoredImage {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        data: row.try_get("data")?,
        size: row.try_get("size")?,
        format: row.try_get("format")?,
        upload_time: from_micros(row.try_get("upload_time")?)?,
    })
}

fn now_micros() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64
}

fn from_micros(micros: i64) -> Result<OffsetDateTime, sqlx::Error> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}
