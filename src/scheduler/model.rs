//! Schedule data model.
//!
//! Persisted schedules are plain JSON with camelCase keys and ISO-8601
//! dates; the same shapes ride over the HTTP schedule API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Whether a schedule repeats or fires once.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleKind {
    /// Fires on a cron expression.
    Recurring,
    /// Fires once at `run_at`, then removes itself.
    OneTime,
}

/// How a firing is executed.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Ordinary scheduled prompt; result goes to the bound chat.
    #[default]
    Standard,
    /// Background continuation of a live conversation; result goes to the
    /// originating chat and is re-injected into the session context.
    AsyncConversation,
}

/// Free-form schedule metadata consumed by job handlers.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMetadata {
    /// Chat that should receive the result, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// One persisted schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Globally unique identifier (`schedule_<ms>_<suffix>`).
    pub id: String,
    /// Prompt text executed at each firing.
    pub message: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Recurring or one-time.
    pub kind: ScheduleKind,
    /// Cron expression; required for recurring schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// Firing instant; required for one-time schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    /// Execution flavour.
    #[serde(rename = "type", default)]
    pub schedule_type: ScheduleType,
    /// Handler metadata.
    #[serde(default)]
    pub metadata: ScheduleMetadata,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Most recent firing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Inactive schedules are kept but never fire.
    pub active: bool,
}

/// Parameters for creating a schedule.
#[derive(Debug, Clone, Default)]
pub struct NewSchedule {
    /// Prompt text executed at each firing.
    pub message: String,
    /// Optional description.
    pub description: Option<String>,
    /// Cron expression for recurring schedules.
    pub cron_expression: Option<String>,
    /// Whether this is a one-time schedule.
    pub one_time: bool,
    /// Firing instant for one-time schedules.
    pub run_at: Option<DateTime<Utc>>,
    /// Execution flavour.
    pub schedule_type: ScheduleType,
    /// Handler metadata.
    pub metadata: ScheduleMetadata,
}

/// Partial update applied by `PATCH /api/schedule/:id`.
#[derive(Debug, Clone, Default)]
pub struct SchedulePatch {
    /// New prompt text.
    pub message: Option<String>,
    /// New description (`Some(None)` clears it).
    pub description: Option<Option<String>>,
    /// New cron expression.
    pub cron_expression: Option<String>,
    /// New firing instant.
    pub run_at: Option<DateTime<Utc>>,
    /// Toggle active state.
    pub active: Option<bool>,
}

impl SchedulePatch {
    /// Whether the patch changes anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message.is_none()
            && self.description.is_none()
            && self.cron_expression.is_none()
            && self.run_at.is_none()
            && self.active.is_none()
    }
}

/// Mint a fresh schedule identifier: `schedule_<ms>_<suffix>`.
#[must_use]
pub fn new_schedule_id() -> String {
    let ms = Utc::now().timestamp_millis();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("schedule_{ms}_{suffix}")
}

/// Mint a short job reference handed back to the user: `job_<suffix>`.
#[must_use]
pub fn new_job_ref() -> String {
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!("job_{suffix}")
}

/// Parse and validate a cron expression.
///
/// Standard 5-field expressions are accepted by prepending a zero seconds
/// field; 6/7-field expressions pass through unchanged.
///
/// # Errors
///
/// Returns `AppError::Schedule` for an unparsable expression.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule> {
    use std::str::FromStr;

    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_owned()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|err| AppError::Schedule(format!("invalid cron expression '{expression}': {err}")))
}
