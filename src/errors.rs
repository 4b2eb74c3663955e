//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Configuration parsing or validation failure. Fatal at startup.
    Config(String),
    /// Agent executable missing or failed the version probe. Fatal at startup.
    Agent(String),
    /// ACP protocol failure: initialize/session rejection, malformed frame,
    /// unexpected stop reason.
    Acp(String),
    /// NDJSON stream or request/response correlation failure (broken pipe,
    /// connection closed before a response arrived).
    Transport(String),
    /// Overall-deadline or no-output timeout fired for an in-flight prompt.
    Timeout(String),
    /// Prompt was cancelled by the agent (or during shutdown) with no output.
    Cancelled(String),
    /// Prompt was aborted by an explicit user command.
    Aborted(String),
    /// Agent child process failure: spawn error or unexpected exit.
    Process(String),
    /// Chat platform send/edit/delete failure.
    Platform(String),
    /// HTTP callback API failure.
    Http(String),
    /// Scheduler validation or persistence failure.
    Schedule(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Aborted(msg) => write!(f, "aborted: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Platform(msg) => write!(f, "platform: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Schedule(msg) => write!(f, "schedule: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Acp(format!("invalid json: {err}"))
    }
}
