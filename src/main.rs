use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use carwatch::config::DEFAULT_GLYPH_CLASSES;
use carwatch::core::db::{StoredImage, remove_old_exports};
use carwatch::{
    CarwatchDb, DbConfig, HistoryRepository, ImageRepository, ModelConfig, ModelSet, Settings,
    Sweeper, UploadService, UploadSpool, WritePolicy,
};

#[derive(Parser)]
#[command(name = "carwatch")]
#[command(about = "Read license plates from vehicle photos and keep an entry/exit log")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// SQLite database file
    #[arg(long, env = "CARWATCH_DATABASE", default_value = "carwatch.db", global = true)]
    database: PathBuf,

    /// Directory for transient upload copies
    #[arg(long, env = "CARWATCH_SPOOL_DIR", default_value = "uploads", global = true)]
    spool_dir: PathBuf,

    /// Image write policy: single-latest or append-only
    #[arg(long, env = "CARWATCH_WRITE_POLICY", default_value = "single-latest", global = true)]
    write_policy: WritePolicy,

    /// Skip applying the embedded migrations on startup
    #[arg(long, env = "CARWATCH_NO_MIGRATE", global = true)]
    no_migrate: bool,

    /// Upper bound for inference and for each database write, in seconds
    #[arg(long, env = "CARWATCH_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct ModelArgs {
    /// Plate detection model (.rten)
    #[arg(long, env = "CARWATCH_PLATE_MODEL", default_value = "models/plate.rten")]
    plate_model: PathBuf,

    /// Character recognition model (.rten)
    #[arg(long, env = "CARWATCH_GLYPH_MODEL", default_value = "models/glyphs.rten")]
    glyph_model: PathBuf,

    /// Characters of the recognition model, in class-index order
    #[arg(long, env = "CARWATCH_GLYPH_CLASSES", default_value = DEFAULT_GLYPH_CLASSES)]
    glyph_classes: String,

    /// Square input size both models were exported with
    #[arg(long, default_value_t = 640)]
    input_size: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the database schema
    Migrate,

    /// Read the plate on an image and record the event
    Upload {
        /// Path to the vehicle photo
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Status tag: entering, leaving, or anything else
        #[arg(long, default_value = "unknown")]
        status: String,

        #[command(flatten)]
        models: ModelArgs,
    },

    /// Record an event by hand
    Record {
        #[arg(long)]
        plate: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        user_id: Option<i64>,
    },

    /// List recorded events, newest first
    History,

    /// Show a stored image, or export it as JPEG with --out
    Image {
        id: i64,
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Show the most recently stored image, or export it as JPEG with --out
    Latest {
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Delete earlier image_*.jpg exports in the output directory first
        #[arg(long, requires = "out")]
        replace_old: bool,
    },

    /// Remove stale transient upload copies
    Cleanup {
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,

        /// Keep running and sweep at this interval
        #[arg(long, value_name = "MINUTES")]
        every_minutes: Option<u64>,
    },
}

impl GlobalArgs {
    fn settings(&self, models: Option<&ModelArgs>) -> Settings {
        let mut settings = Settings {
            db: DbConfig {
                path: self.database.clone(),
                policy: self.write_policy,
                migrate: !self.no_migrate,
            },
            spool_dir: self.spool_dir.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
            ..Settings::default()
        };
        if let Some(models) = models {
            settings.models = ModelConfig {
                plate_model: models.plate_model.clone(),
                glyph_model: models.glyph_model.clone(),
                glyph_classes: models.glyph_classes.clone(),
                input_size: models.input_size,
            };
        }
        settings
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "carwatch=debug" } else { "carwatch=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_image(image: &StoredImage, out: Option<PathBuf>, replace_old: bool) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            let removed_old = if replace_old { remove_old_exports(&path) } else { 0 };
            let exported = image
                .export_jpeg(&path)
                .with_context(|| format!("Failed to export image {} to {:?}", image.id, path))?;
            print_json(&serde_json::json!({
                "success": true,
                "output_path": path,
                "file_size": exported.file_size,
                "image_size": [exported.width, exported.height],
                "removed_old": removed_old,
            }))
        }
        None => print_json(&serde_json::json!({
            "image": image,
            "content_type": image.content_type(),
        })),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match cli.command {
        Command::Migrate => {
            let mut settings = cli.global.settings(None);
            settings.db.migrate = true;
            let db = CarwatchDb::open(&settings.db).await?;
            print_json(db.schema())?;
        }
        Command::Upload {
            image,
            status,
            models,
        } => {
            let settings = cli.global.settings(Some(&models));
            // Models are loaded before anything else; failing here is fatal.
            let models = Arc::new(
                ModelSet::load(&settings.models).context("Failed to load recognition models")?,
            );
            let db = CarwatchDb::open(&settings.db).await?;
            let service = UploadService::new(
                db,
                models,
                UploadSpool::new(&settings.spool_dir),
                settings.request_timeout,
            );

            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read {:?}", image))?;
            let name = image
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let outcome = service.upload(&bytes, &name, &status).await;
            print_json(&outcome)?;
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Command::Record {
            plate,
            subject,
            description,
            user_id,
        } => {
            let settings = cli.global.settings(None);
            let db = CarwatchDb::open(&settings.db).await?;
            let event = carwatch::core::db::NewEvent::manual(&plate, &subject, &description, user_id)?;
            let id = db.record_event(&event).await?;
            print_json(&serde_json::json!({ "success": true, "event_id": id }))?;
        }
        Command::History => {
            let settings = cli.global.settings(None);
            let db = CarwatchDb::open(&settings.db).await?;
            let events = db.list_events().await?;
            print_json(&serde_json::json!({ "success": true, "data": events }))?;
        }
        Command::Image { id, out } => {
            let settings = cli.global.settings(None);
            let db = CarwatchDb::open(&settings.db).await?;
            let image = db.get_image(id).await?;
            show_image(&image, out, false)?;
        }
        Command::Latest { out, replace_old } => {
            let settings = cli.global.settings(None);
            let db = CarwatchDb::open(&settings.db).await?;
            match db.latest_image().await? {
                Some(image) => show_image(&image, out, replace_old)?,
                None => anyhow::bail!("No images stored yet"),
            }
        }
        Command::Cleanup {
            max_age_hours,
            every_minutes,
        } => {
            let settings = cli.global.settings(None);
            let sweeper = Sweeper::new(&settings.spool_dir);
            match every_minutes {
                None => print_json(&sweeper.sweep_hours(max_age_hours).await?)?,
                Some(0) => anyhow::bail!("--every-minutes must be at least 1"),
                Some(minutes) => {
                    info!(minutes, max_age_hours, "starting periodic sweeps");
                    let max_age = Duration::from_secs(max_age_hours.saturating_mul(3600));
                    sweeper
                        .spawn_periodic(max_age, Duration::from_secs(minutes.saturating_mul(60)))
                        .await?;
                }
            }
        }
    }

    Ok(())
}
