//! Agent capability profiles.
//!
//! An [`AgentProfile`] describes how to launch one of the supported CLI
//! coding agents: the executable, the argv shape for the long-lived ACP
//! session, and the argv shape for one-shot background prompts. Profiles
//! are immutable once constructed.

pub mod validate;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable passed to a stdio MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpEnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// HTTP header passed to an http/sse MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpHeader {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// MCP server configuration, opaque to the core.
///
/// Parsed once at the configuration boundary and forwarded verbatim to the
/// agent at session creation. The two wire shapes are distinguished by the
/// presence of `command` vs `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum McpServer {
    /// Local stdio server: `{name, command, args, env}`.
    Stdio {
        /// Display name.
        name: String,
        /// Executable to spawn.
        command: String,
        /// Arguments for the executable.
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables for the child.
        #[serde(default)]
        env: Vec<McpEnvVar>,
    },
    /// Remote server: `{name, type, url, headers}` with `type ∈ {http, sse}`.
    Remote {
        /// Display name.
        name: String,
        /// Transport kind: `http` or `sse`.
        #[serde(rename = "type")]
        transport: String,
        /// Endpoint URL.
        url: String,
        /// Extra request headers.
        #[serde(default)]
        headers: Vec<McpHeader>,
    },
}

/// Which of the supported CLI agents to drive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, clap::ValueEnum)]
pub enum AgentKind {
    /// Gemini CLI (`gemini --experimental-acp`).
    Gemini,
    /// OpenCode (`opencode acp`).
    Opencode,
    /// Claude Code (`claude-code-acp` wrapper).
    Claude,
}

/// Launch options shared by all profiles, derived from configuration.
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Extra directories the agent may read.
    pub include_directories: Vec<String>,
    /// Approval / permission mode, agent-specific vocabulary.
    pub approval_mode: Option<String>,
    /// Model override.
    pub model: Option<String>,
    /// MCP servers forwarded at session creation.
    pub mcp_servers: Vec<McpServer>,
    /// Grace period between SIGTERM and SIGKILL.
    pub kill_grace: Option<Duration>,
}

/// Argv shape of a profile: one of the known agents, or explicit argv
/// lists for anything else (wrappers, test stubs).
#[derive(Debug, Clone)]
enum ArgvShape {
    Gemini,
    Opencode,
    Claude,
    Custom {
        acp: Vec<String>,
        oneshot: Vec<String>,
    },
}

/// Capability record for the chosen CLI agent.
#[derive(Debug, Clone)]
pub struct AgentProfile {
    shape: ArgvShape,
    command: String,
    display_name: String,
    kill_grace: Duration,
    include_directories: Vec<String>,
    approval_mode: Option<String>,
    model: Option<String>,
    mcp_servers: Vec<McpServer>,
}

impl AgentProfile {
    /// Default grace period between SIGTERM and SIGKILL.
    pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(10_000);

    /// Build the profile for `kind` with the given launch options.
    #[must_use]
    pub fn for_kind(kind: AgentKind, opts: ProfileOptions) -> Self {
        let (shape, command, display_name) = match kind {
            AgentKind::Gemini => (ArgvShape::Gemini, "gemini", "Gemini CLI"),
            AgentKind::Opencode => (ArgvShape::Opencode, "opencode", "OpenCode"),
            AgentKind::Claude => (ArgvShape::Claude, "claude-code-acp", "Claude Code"),
        };
        Self {
            shape,
            command: command.to_owned(),
            display_name: display_name.to_owned(),
            kill_grace: opts.kill_grace.unwrap_or(Self::DEFAULT_KILL_GRACE),
            include_directories: opts.include_directories,
            approval_mode: opts.approval_mode,
            model: opts.model,
            mcp_servers: opts.mcp_servers,
        }
    }

    /// Build a profile with explicit argv lists.
    ///
    /// `acp_args` launches the long-lived session; `oneshot_args` is the
    /// one-shot prefix — the prompt text is appended as the final argument.
    #[must_use]
    pub fn custom(
        command: impl Into<String>,
        display_name: impl Into<String>,
        acp_args: Vec<String>,
        oneshot_args: Vec<String>,
        opts: ProfileOptions,
    ) -> Self {
        Self {
            shape: ArgvShape::Custom {
                acp: acp_args,
                oneshot: oneshot_args,
            },
            command: command.into(),
            display_name: display_name.into(),
            kill_grace: opts.kill_grace.unwrap_or(Self::DEFAULT_KILL_GRACE),
            include_directories: opts.include_directories,
            approval_mode: opts.approval_mode,
            model: opts.model,
            mcp_servers: opts.mcp_servers,
        }
    }

    /// Executable name or path.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Human-readable agent name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    /// MCP servers forwarded verbatim at `session/new`.
    #[must_use]
    pub fn mcp_servers(&self) -> &[McpServer] {
        &self.mcp_servers
    }

    /// Short lower-cased token used to prefix mirrored stderr lines.
    ///
    /// Derived from the executable's basename with whitespace collapsed to
    /// dashes: `claude-code-acp` → `claude-code-acp`, `My Agent` → `my-agent`.
    #[must_use]
    pub fn log_token(&self) -> String {
        let base = std::path::Path::new(&self.command)
            .file_name()
            .map_or_else(|| self.command.clone(), |n| n.to_string_lossy().into_owned());
        base.to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Argv for the long-lived ACP session (excluding the executable).
    #[must_use]
    pub fn acp_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match &self.shape {
            ArgvShape::Custom { acp, .. } => {
                args.extend(acp.iter().cloned());
            }
            ArgvShape::Gemini => {
                args.push("--experimental-acp".to_owned());
                for dir in &self.include_directories {
                    args.push("--include-directories".to_owned());
                    args.push(dir.clone());
                }
                if let Some(mode) = &self.approval_mode {
                    args.push("--approval-mode".to_owned());
                    args.push(mode.clone());
                }
                if let Some(model) = &self.model {
                    args.push("--model".to_owned());
                    args.push(model.clone());
                }
            }
            ArgvShape::Opencode => {
                args.push("acp".to_owned());
                if !self.mcp_servers.is_empty() {
                    if let Ok(json) = serde_json::to_string(&self.mcp_servers) {
                        args.push("--mcp-servers".to_owned());
                        args.push(json);
                    }
                }
            }
            ArgvShape::Claude => {
                for dir in &self.include_directories {
                    args.push("--add-dir".to_owned());
                    args.push(dir.clone());
                }
                if let Some(mode) = &self.approval_mode {
                    args.push("--permission-mode".to_owned());
                    args.push(mode.clone());
                }
                if let Some(model) = &self.model {
                    args.push("--model".to_owned());
                    args.push(model.clone());
                }
            }
        }
        args
    }

    /// Argv for a one-shot background prompt (excluding the executable).
    ///
    /// The prompt text rides on `-p`; stdout is the response.
    #[must_use]
    pub fn prompt_args(&self, text: &str) -> Vec<String> {
        let mut args = Vec::new();
        // One-shot invocations share a single generic shape; only ACP mode
        // uses agent-specific flag vocabulary.
        if let ArgvShape::Custom { oneshot, .. } = &self.shape {
            args.extend(oneshot.iter().cloned());
            args.push(text.to_owned());
            return args;
        }
        for dir in &self.include_directories {
            args.push("--include-directories".to_owned());
            args.push(dir.clone());
        }
        if let Some(mode) = &self.approval_mode {
            args.push("--approval-mode".to_owned());
            args.push(mode.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_owned());
            args.push(model.clone());
        }
        args.push("-p".to_owned());
        args.push(text.to_owned());
        args
    }
}
