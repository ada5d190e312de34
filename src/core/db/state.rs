use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tokio::fs as async_fs;
use tracing::{info, warn};

use crate::config::DbConfig;
use crate::core::db::{WritePolicy, schema::SchemaProfile};
use crate::error::StorageError;

pub(super) struct DbState {
    pool: SqlitePool,
    profile: SchemaProfile,
    policy: WritePolicy,
}

impl std::fmt::Debug for DbState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbState")
            .field("profile", &self.profile)
            .field("policy", &self.policy)
            .finish()
    }
}

impl DbState {
    pub(super) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(super) fn profile(&self) -> &SchemaProfile {
        &self.profile
    }

    pub(super) fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Open the database, optionally migrate it, then probe the schema once.
    pub(super) async fn open(config: &DbConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                async_fs::create_dir_all(parent).await?;
            }
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: every unit of work, including the single-latest
        // delete+insert, is serialized at the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await?;

        if config.migrate {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        let profile = SchemaProfile::probe(&pool).await?;
        if !profile.history_table {
            warn!("history table is missing; events cannot be recorded until it exists");
        }
        info!(
            path = %config.path.display(),
            policy = ?config.policy,
            image_ref = profile.history_image_ref,
            user_id = profile.history_user_id,
            "database ready"
        );

        Ok(Self {
            pool,
            profile,
            policy: config.policy,
        })
    }
}
