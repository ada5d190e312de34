use serde::Serialize;
use sqlx::SqlitePool;

/// Same definition as the initial migration; used to repair a missing table.
pub(crate) const CREATE_IMAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    data BLOB NOT NULL,
    size INTEGER NOT NULL,
    format TEXT NOT NULL,
    upload_time INTEGER NOT NULL
)"#;

/// Which optional `history` columns this database has.
///
/// Probed once when the database is opened; the statements used by the event
/// recorder are fixed from then on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaProfile {
    pub history_table: bool,
    pub history_image_ref: bool,
    pub history_user_id: bool,
    #[serde(skip)]
    insert_event_sql: String,
    #[serde(skip)]
    select_events_sql: String,
}

impl SchemaProfile {
    pub async fn probe(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('history')")
                .fetch_all(pool)
                .await?;
        Ok(Self::from_columns(&columns))
    }

    pub fn from_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        let has = |name: &str| columns.iter().any(|column| column.as_ref() == name);
        let history_image_ref = has("image_id");
        let history_user_id = has("user_id");

        let mut insert_columns = vec!["plate", "subject", "description", "timestamp"];
        if history_image_ref {
            insert_columns.push("image_id");
        }
        if history_user_id {
            insert_columns.push("user_id");
        }
        let placeholders = vec!["?"; insert_columns.len()].join(", ");
        let insert_event_sql = format!(
            "INSERT INTO history ({}) VALUES ({placeholders})",
            insert_columns.join(", ")
        );

        let select_events_sql = format!(
            "SELECT rowid AS id, plate, subject, description, timestamp, {}, {} \
             FROM history ORDER BY timestamp DESC, rowid DESC",
            if history_image_ref { "image_id" } else { "NULL AS image_id" },
            if history_user_id { "user_id" } else { "NULL AS user_id" },
        );

        Self {
            history_table: !columns.is_empty(),
            history_image_ref,
            history_user_id,
            insert_event_sql,
            select_events_sql,
        }
    }

    pub(crate) fn insert_event_sql(&self) -> &str {
        &self.insert_event_sql
    }

    pub(crate) fn select_events_sql(&self) -> &str {
        &self.select_events_sql
    }
}

pub(crate) async fn create_images_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_IMAGES_TABLE).execute(pool).await?;
    Ok(())
}

pub(crate) fn is_missing_table(err: &sqlx::Error, table: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .message()
            .contains(&format!("no such table: {table}")),
        _ => false,
    }
}
