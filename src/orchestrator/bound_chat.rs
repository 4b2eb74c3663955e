//! Bound-chat persistence.
//!
//! The most recently received inbound chat id is the default target for
//! proactive messages (callbacks, scheduled jobs). It is kept in memory
//! and mirrored to disk best-effort as a single JSON object.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundChatRecord {
    chat_id: String,
    updated_at: DateTime<Utc>,
}

/// In-memory bound chat with a disk mirror.
pub struct BoundChatStore {
    path: PathBuf,
    current: Mutex<Option<String>>,
}

impl BoundChatStore {
    /// Store backed by `path`; nothing is read until [`load`](Self::load).
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            current: Mutex::new(None),
        }
    }

    /// Load the persisted binding, if any, into memory.
    pub fn load(&self) -> Option<String> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<BoundChatRecord>(&raw) {
            Ok(record) => {
                debug!(chat_id = record.chat_id, "bound chat restored");
                if let Ok(mut current) = self.current.lock() {
                    *current = Some(record.chat_id.clone());
                }
                Some(record.chat_id)
            }
            Err(err) => {
                warn!(%err, path = %self.path.display(), "cannot parse bound-chat state");
                None
            }
        }
    }

    /// The currently bound chat id.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    /// Bind `chat_id`, overwriting memory and (best-effort) disk.
    pub fn bind(&self, chat_id: &str) {
        let changed = match self.current.lock() {
            Ok(mut current) => {
                let changed = current.as_deref() != Some(chat_id);
                *current = Some(chat_id.to_owned());
                changed
            }
            Err(_) => return,
        };
        if !changed {
            return;
        }

        let record = BoundChatRecord {
            chat_id: chat_id.to_owned(),
            updated_at: Utc::now(),
        };
        let result = self
            .path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| {
                let json = serde_json::to_string_pretty(&record)
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
                std::fs::write(&self.path, json)
            });
        if let Err(err) = result {
            warn!(%err, "cannot persist bound-chat state");
        }
    }
}
