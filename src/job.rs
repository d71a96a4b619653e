//! Job parameters: one immutable launch request.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Python module `scirun init` writes the agent adapters into.
pub const ADAPTER_MODULE: &str = "scirun_agents";

/// Execution agent that runs inside the sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    #[default]
    ClaudeCode,
    GeminiCli,
}

impl AgentKind {
    pub const ALL: [AgentKind; 2] = [AgentKind::ClaudeCode, AgentKind::GeminiCli];

    pub const fn as_str(self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "claude-code",
            AgentKind::GeminiCli => "gemini-cli",
        }
    }

    /// The runtime's built-in agent name, used when the sync daemon is bypassed.
    pub const fn runtime_name(self) -> &'static str {
        self.as_str()
    }

    /// Class in [`ADAPTER_MODULE`] that wraps this agent's command with
    /// `scirun sandbox`.
    pub const fn adapter_class(self) -> &'static str {
        match self {
            AgentKind::ClaudeCode => "SyncedClaudeCode",
            AgentKind::GeminiCli => "SyncedGeminiCli",
        }
    }

    /// Python module and class of the runtime's stock agent.
    pub const fn runtime_class(self) -> (&'static str, &'static str) {
        match self {
            AgentKind::ClaudeCode => ("harbor.agents.installed.claude_code", "ClaudeCode"),
            AgentKind::GeminiCli => ("harbor.agents.installed.gemini_cli", "GeminiCli"),
        }
    }

    pub fn default_import_path(self) -> String {
        format!("{ADAPTER_MODULE}:{}", self.adapter_class())
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" | "claude" => Ok(AgentKind::ClaudeCode),
            "gemini-cli" | "gemini" => Ok(AgentKind::GeminiCli),
            other => Err(ExitError::Validation(format!(
                "Unsupported agent type: {other}. Supported: {}",
                AgentKind::ALL.map(AgentKind::as_str).join(", ")
            ))),
        }
    }
}

/// Where the sandbox runs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// Local Docker daemon
    #[default]
    Docker,
    /// Modal cloud sandboxes
    Modal,
}

impl EnvironmentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EnvironmentKind::Docker => "docker",
            EnvironmentKind::Modal => "modal",
        }
    }

    /// Whether GPU requests need the host to expose a GPU container runtime.
    pub const fn needs_host_gpu_runtime(self) -> bool {
        matches!(self, EnvironmentKind::Docker)
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-derived job identifier: `<idea-stem>__YYYY-MM-DD__HH-MM-SS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(idea_stem: &str, at: DateTime<Local>) -> Self {
        JobId(format!("{idea_stem}__{}", at.format("%Y-%m-%d__%H-%M-%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the idea stem from a job name. Returns None for names without
    /// the timestamp suffix, or where the stem itself is just a date.
    pub fn idea_stem(job_name: &str) -> Option<&str> {
        let re = crate::viewer::job_name_regex();
        let caps = re.captures(job_name)?;
        let stem = caps.get(1)?.as_str().trim_matches('_');
        if stem.is_empty() || crate::viewer::is_bare_date(stem) {
            return None;
        }
        Some(stem)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully validated launch request.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub idea_path: PathBuf,
    pub model: String,
    pub timeout_sec: u64,
    pub agent: AgentKind,
    pub gpus: u32,
    pub environment: EnvironmentKind,
    pub resume_from: Option<PathBuf>,
    pub feedback: Option<String>,
    pub sync_interval_sec: u64,
    /// Use the runtime's stock agent instead of the sync-wrapped adapter.
    pub bypass_sync_daemon: bool,
}

/// Shortest artifact sync interval. Shared by the launcher and the in-sandbox
/// daemon so a launched job can never carry an interval the sandbox refuses.
pub const MIN_SYNC_INTERVAL_SEC: u64 = 30;

/// Reject sync intervals under [`MIN_SYNC_INTERVAL_SEC`].
pub fn validate_sync_interval(interval_sec: u64) -> Result<u64, ExitError> {
    if interval_sec < MIN_SYNC_INTERVAL_SEC {
        return Err(ExitError::Validation(format!(
            "artifact sync interval {interval_sec}s is below the minimum of {MIN_SYNC_INTERVAL_SEC}s"
        )));
    }
    Ok(interval_sec)
}
