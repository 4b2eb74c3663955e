//! Schedule persistence.
//!
//! A single JSON document `{"schedules": [...]}` at the configured path.
//! Writes are whole-file rewrites preceded by directory creation; the
//! in-memory schedule map stays authoritative for the running process when
//! a write fails.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scheduler::model::ScheduleConfig;
use crate::{AppError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScheduleDocument {
    schedules: Vec<ScheduleConfig>,
}

/// Whole-file JSON store for the schedule set.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load the persisted schedule set; a missing file is an empty set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Schedule` when the file exists but cannot be read
    /// or parsed.
    pub fn load(&self) -> Result<Vec<ScheduleConfig>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no schedule file yet; starting empty");
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|err| {
            AppError::Schedule(format!(
                "cannot read schedules from '{}': {err}",
                self.path.display()
            ))
        })?;
        let doc: ScheduleDocument = serde_json::from_str(&raw).map_err(|err| {
            AppError::Schedule(format!(
                "cannot parse schedules from '{}': {err}",
                self.path.display()
            ))
        })?;
        Ok(doc.schedules)
    }

    /// Rewrite the whole schedule document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Schedule` when the directory cannot be created or
    /// the write fails.
    pub fn persist(&self, schedules: &[ScheduleConfig]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                AppError::Schedule(format!(
                    "cannot create schedule directory '{}': {err}",
                    parent.display()
                ))
            })?;
        }
        let doc = ScheduleDocument {
            schedules: schedules.to_vec(),
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|err| AppError::Schedule(format!("cannot serialise schedules: {err}")))?;
        std::fs::write(&self.path, json).map_err(|err| {
            AppError::Schedule(format!(
                "cannot write schedules to '{}': {err}",
                self.path.display()
            ))
        })
    }
}
