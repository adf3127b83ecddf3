use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Processing,
    Finished,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// Whether no further updates are expected for a task in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Unknown)
    }
}

/// Current status of a task as held by the status store.
///
/// An unknown task is represented by the default record, which has no `id`
/// and serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStatusRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    /// Result image location, set once the task finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,

    /// Time of the last write. Only consulted for expiry.
    #[serde(
        rename = "timestamp",
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobStatusRecord {
    /// Returns true when this record refers to a stored task.
    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    /// Overlay the supplied fields of `update`, leaving the rest untouched.
    pub fn apply(&mut self, update: StatusUpdate) {
        if let Some(status) = update.status {
            self.status = Some(status);
        }
        if let Some(progress) = update.progress {
            self.progress = Some(progress);
        }
        if let Some(image_url) = update.image_url {
            self.image_url = Some(image_url);
        }
        if let Some(thumb_url) = update.thumb_url {
            self.thumb_url = Some(thumb_url);
        }
    }

    /// Whether the record was last written more than `ttl` before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match self.updated_at {
            Some(updated_at) => now - updated_at > ttl,
            None => true,
        }
    }
}

/// Partial write applied to a [`JobStatusRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub image_url: Option<String>,
    pub thumb_url: Option<String>,
}

impl StatusUpdate {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// POST /api/task request body.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    /// Client-chosen task id. Generated when omitted.
    #[garde(length(min = 1, max = 64), custom(task_id_chars))]
    pub id: Option<String>,

    #[garde(length(min = 1, max = 2000))]
    pub prompt: String,

    #[garde(length(min = 1, max = 200))]
    pub lora_name: String,

    #[garde(length(min = 1, max = 50))]
    pub cover_size: String,
}

/// PATCH /api/task/{id} webhook body sent by the processing backend.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[garde(custom(webhook_status))]
    pub status: TaskStatus,

    #[garde(range(min = 0, max = 100))]
    pub progress: Option<u8>,

    #[garde(url)]
    pub image_url: Option<String>,
}

/// Task ids use the URL-safe alphabet: ASCII letters, digits, `_` and `-`.
fn task_id_chars(value: &Option<String>, _context: &()) -> garde::Result {
    match value {
        Some(id) if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') => {
            Err(garde::Error::new("task id contains invalid characters"))
        }
        _ => Ok(()),
    }
}

/// The webhook may only move a task into a processing or terminal state.
fn webhook_status(value: &TaskStatus, _context: &()) -> garde::Result {
    match value {
        TaskStatus::Processing | TaskStatus::Finished | TaskStatus::Failed => Ok(()),
        other => Err(garde::Error::new(format!(
            "status {other} cannot be set by webhook"
        ))),
    }
}

/// GET /api/user response body.
#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    #[serde(rename = "userId")]
    pub user_id: String,
}
