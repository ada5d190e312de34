use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// What an upload's free-text status tag means for the history ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Entering,
    Leaving,
    Unknown,
}

impl VehicleStatus {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "entering" => VehicleStatus::Entering,
            "leaving" => VehicleStatus::Leaving,
            _ => VehicleStatus::Unknown,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            VehicleStatus::Entering => "Vehicle Entry",
            VehicleStatus::Leaving => "Vehicle Exit",
            VehicleStatus::Unknown => "Unknown Status",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            VehicleStatus::Entering => "car is available",
            VehicleStatus::Leaving | VehicleStatus::Unknown => "car is being use",
        }
    }
}

/// One ledger entry to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub plate: String,
    pub subject: String,
    pub description: String,
    /// Weak reference into `images`; dropped if the schema has no column for it.
    pub image_ref: Option<i64>,
    pub user_id: Option<i64>,
}

impl NewEvent {
    /// Event for a recognition attempt. `plate` may be empty.
    pub fn recognized(plate: impl Into<String>, status: VehicleStatus, image_ref: Option<i64>) -> Self {
        Self {
            plate: plate.into(),
            subject: status.subject().to_string(),
            description: status.description().to_string(),
            image_ref,
            user_id: None,
        }
    }

    /// Manually entered event; all text fields are required.
    pub fn manual(
        plate: &str,
        subject: &str,
        description: &str,
        user_id: Option<i64>,
    ) -> Result<Self> {
        let required = |name: &str, value: &str| -> Result<String> {
            let value = value.trim();
            if value.is_empty() {
                return Err(Error::Input(format!("missing required field `{name}`")));
            }
            Ok(value.to_string())
        };

        Ok(Self {
            plate: required("plate", plate)?,
            subject: required("subject", subject)?,
            description: required("description", description)?,
            image_ref: None,
            user_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEvent {
    pub id: i64,
    pub subject: String,
    pub plate: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub image_ref: Option<i64>,
    pub user_id: Option<i64>,
}

pub trait HistoryRepository {
    /// Append one event and return its row id.
    fn record_event(&self, event: &NewEvent) -> impl Future<Output = Result<i64>> + Send;

    /// All events, newest first.
    fn list_events(&self) -> impl Future<Output = Result<Vec<HistoryEvent>>> + Send;
}
