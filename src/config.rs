//! Global configuration parsing and validation.
//!
//! Settings come from three layers, later layers winning: built-in
//! defaults, an optional JSON config file (`--config <path>`), and
//! environment variables (`CLAWLESS_*` plus `ACP_STREAM_STDOUT`).

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::Deserialize;

use crate::agent::McpServer;
use crate::{AppError, Result};

/// Which chat platform the bridge binds to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// Telegram long-polling bot.
    Telegram,
    /// Slack Socket Mode app.
    Slack,
}

/// Policy applied when the agent asks for permission mid-prompt.
///
/// The value is matched against the `kind` field of the options the agent
/// offers; `cancelled` short-circuits every request.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStrategy {
    /// Pick the first option whose kind is `allow_once`.
    AllowOnce,
    /// Pick the first option whose kind is `allow_always`.
    AllowAlways,
    /// Pick the first option whose kind is `reject_once`.
    RejectOnce,
    /// Decline every permission request.
    Cancelled,
}

impl PermissionStrategy {
    /// The option `kind` string this strategy selects.
    #[must_use]
    pub fn option_kind(&self) -> &'static str {
        match self {
            Self::AllowOnce => "allow_once",
            Self::AllowAlways => "allow_always",
            Self::RejectOnce => "reject_once",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Global settings for the bridge process.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Settings {
    /// Chat platform to bind (exactly one per process).
    pub platform: PlatformKind,
    /// Telegram bot token (required when `platform = telegram`).
    pub telegram_bot_token: String,
    /// Slack bot user token (required when `platform = slack`).
    pub slack_bot_token: String,
    /// Slack app-level token for Socket Mode (required when `platform = slack`).
    pub slack_app_token: String,
    /// Chat ids allowed to talk to the bridge; empty means allow all.
    pub allowed_chat_ids: Vec<String>,

    /// Working directory handed to the agent session.
    pub workspace_dir: PathBuf,
    /// Extra directories the agent may read (`--include-directories` /
    /// `--add-dir` per profile).
    pub include_directories: Vec<String>,
    /// Model override forwarded to the agent, if any.
    pub agent_model: Option<String>,
    /// Approval / permission mode forwarded to the agent, if any.
    pub approval_mode: Option<String>,
    /// Policy for inbound `session/request_permission` calls.
    pub permission_strategy: PermissionStrategy,
    /// MCP servers forwarded verbatim to the agent at session creation.
    pub mcp_servers: Vec<McpServer>,

    /// Hard deadline for one prompt, milliseconds.
    pub acp_timeout_ms: u64,
    /// No-output watchdog for one prompt, milliseconds; refreshed by every
    /// stdout chunk and every stderr byte.
    pub acp_no_output_timeout_ms: u64,
    /// Grace period between SIGTERM and SIGKILL, milliseconds.
    pub kill_grace_ms: u64,
    /// Delay between prewarm retries, milliseconds; 0 disables retries.
    pub prewarm_retry_ms: u64,
    /// Maximum automatic prewarm attempts before giving up.
    pub prewarm_max_retries: u32,
    /// Mirror agent chunks to the bridge's stdout (`ACP_STREAM_STDOUT`).
    pub stream_stdout: bool,
    /// Upper bound on the stderr tail ring, characters.
    pub stderr_tail_max_chars: usize,
    /// Deadline for one-shot background workers, milliseconds.
    pub oneshot_timeout_ms: u64,

    /// Debounce window between live-message edits, milliseconds.
    pub stream_update_interval_ms: u64,
    /// Inter-chunk gap that finalizes the current live message and starts a
    /// new one, milliseconds.
    pub message_gap_threshold_ms: u64,
    /// Maximum characters shown in a streaming preview before ellipsis
    /// truncation.
    pub max_response_length: usize,

    /// Host for the callback HTTP listener.
    pub http_host: String,
    /// Port for the callback HTTP listener.
    pub http_port: u16,
    /// Shared token for the callback API; empty disables auth.
    pub callback_auth_token: String,
    /// Upper bound on inbound HTTP bodies, bytes.
    pub callback_max_body_bytes: usize,

    /// State directory; defaults to `~/.clawless`.
    pub home_dir: PathBuf,
    /// Schedule persistence path; defaults to `<home_dir>/schedules.json`.
    pub schedules_path: Option<PathBuf>,
    /// IANA timezone name used for cron firing.
    pub timezone: String,
    /// Interval between heartbeat log lines, milliseconds.
    pub heartbeat_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            platform: PlatformKind::Telegram,
            telegram_bot_token: String::new(),
            slack_bot_token: String::new(),
            slack_app_token: String::new(),
            allowed_chat_ids: Vec::new(),
            workspace_dir: PathBuf::from("."),
            include_directories: Vec::new(),
            agent_model: None,
            approval_mode: None,
            permission_strategy: PermissionStrategy::AllowOnce,
            mcp_servers: Vec::new(),
            acp_timeout_ms: 1_200_000,
            acp_no_output_timeout_ms: 300_000,
            kill_grace_ms: 10_000,
            prewarm_retry_ms: 10_000,
            prewarm_max_retries: 10,
            stream_stdout: false,
            stderr_tail_max_chars: 4_000,
            oneshot_timeout_ms: 1_200_000,
            stream_update_interval_ms: 5_000,
            message_gap_threshold_ms: 10_000,
            max_response_length: 4_000,
            http_host: "127.0.0.1".to_owned(),
            http_port: 8788,
            callback_auth_token: String::new(),
            callback_max_body_bytes: 65_536,
            home_dir: default_home_dir(),
            schedules_path: None,
            timezone: "UTC".to_owned(),
            heartbeat_interval_ms: 60_000,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the optional JSON config file, then
    /// environment overrides, then validation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid JSON, or validation fails.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut settings = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|err| {
                    AppError::Config(format!(
                        "cannot read config file '{}': {err}",
                        path.display()
                    ))
                })?;
                Self::from_json_str(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a JSON string (defaults fill absent fields).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on invalid JSON.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| AppError::Config(format!("invalid config: {err}")))
    }

    /// Apply environment-variable overrides on top of the current values.
    pub fn apply_env(&mut self) {
        env_string("CLAWLESS_TELEGRAM_BOT_TOKEN", &mut self.telegram_bot_token);
        env_string("CLAWLESS_SLACK_BOT_TOKEN", &mut self.slack_bot_token);
        env_string("CLAWLESS_SLACK_APP_TOKEN", &mut self.slack_app_token);
        env_string("CLAWLESS_CALLBACK_AUTH_TOKEN", &mut self.callback_auth_token);
        env_string("CLAWLESS_HTTP_HOST", &mut self.http_host);
        env_string("CLAWLESS_TIMEZONE", &mut self.timezone);
        env_parse("CLAWLESS_HTTP_PORT", &mut self.http_port);
        env_parse("CLAWLESS_ACP_TIMEOUT_MS", &mut self.acp_timeout_ms);
        env_parse(
            "CLAWLESS_ACP_NO_OUTPUT_TIMEOUT_MS",
            &mut self.acp_no_output_timeout_ms,
        );
        env_parse("CLAWLESS_KILL_GRACE_MS", &mut self.kill_grace_ms);
        env_parse("CLAWLESS_PREWARM_RETRY_MS", &mut self.prewarm_retry_ms);
        env_parse("CLAWLESS_PREWARM_MAX_RETRIES", &mut self.prewarm_max_retries);
        env_parse(
            "CLAWLESS_STREAM_UPDATE_INTERVAL_MS",
            &mut self.stream_update_interval_ms,
        );
        env_parse(
            "CLAWLESS_MESSAGE_GAP_THRESHOLD_MS",
            &mut self.message_gap_threshold_ms,
        );
        env_parse("CLAWLESS_MAX_RESPONSE_LENGTH", &mut self.max_response_length);
        env_parse(
            "CLAWLESS_CALLBACK_MAX_BODY_BYTES",
            &mut self.callback_max_body_bytes,
        );
        env_parse(
            "CLAWLESS_STDERR_TAIL_MAX_CHARS",
            &mut self.stderr_tail_max_chars,
        );
        if let Ok(val) = std::env::var("CLAWLESS_PERMISSION_STRATEGY") {
            match val.as_str() {
                "allow_once" => self.permission_strategy = PermissionStrategy::AllowOnce,
                "allow_always" => self.permission_strategy = PermissionStrategy::AllowAlways,
                "reject_once" => self.permission_strategy = PermissionStrategy::RejectOnce,
                "cancelled" => self.permission_strategy = PermissionStrategy::Cancelled,
                other => {
                    if !other.is_empty() {
                        tracing::warn!(
                            value = other,
                            "ignoring unknown CLAWLESS_PERMISSION_STRATEGY"
                        );
                    }
                }
            }
        }
        if let Ok(val) = std::env::var("CLAWLESS_SCHEDULES_PATH") {
            if !val.is_empty() {
                self.schedules_path = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = std::env::var("CLAWLESS_HOME") {
            if !val.is_empty() {
                self.home_dir = PathBuf::from(val);
            }
        }
        if let Ok(val) = std::env::var("ACP_STREAM_STDOUT") {
            self.stream_stdout = matches!(val.as_str(), "1" | "true" | "yes");
        }
    }

    /// Resolved schedule persistence path.
    #[must_use]
    pub fn schedules_path(&self) -> PathBuf {
        self.schedules_path
            .clone()
            .unwrap_or_else(|| self.home_dir.join("schedules.json"))
    }

    /// Path of the persisted bound-chat state.
    #[must_use]
    pub fn bound_chat_path(&self) -> PathBuf {
        self.home_dir.join("callback-chat-state.json")
    }

    /// Path of the memory notes file (opaque to the core).
    #[must_use]
    pub fn memory_notes_path(&self) -> PathBuf {
        self.home_dir.join("MEMORY.md")
    }

    /// Parsed timezone for cron firing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unknown IANA name.
    pub fn parsed_timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| AppError::Config(format!("unknown timezone '{}'", self.timezone)))
    }

    fn validate(&self) -> Result<()> {
        match self.platform {
            PlatformKind::Telegram => {
                if self.telegram_bot_token.is_empty() {
                    return Err(AppError::Config(
                        "telegram_bot_token is required for platform = telegram".into(),
                    ));
                }
            }
            PlatformKind::Slack => {
                if self.slack_bot_token.is_empty() || self.slack_app_token.is_empty() {
                    return Err(AppError::Config(
                        "slack_bot_token and slack_app_token are required for platform = slack"
                            .into(),
                    ));
                }
            }
        }
        if self.max_response_length < 2 {
            return Err(AppError::Config(
                "max_response_length must be at least 2".into(),
            ));
        }
        self.parsed_timezone()?;
        Ok(())
    }
}

fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".clawless")
}

fn env_string(key: &str, target: &mut String) {
    if let Ok(val) = std::env::var(key) {
        if !val.is_empty() {
            *target = val;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(parsed) = val.parse::<T>() {
            *target = parsed;
        }
    }
}
