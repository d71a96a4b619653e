use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::artifacts::Category;
use crate::error::ExitError;
use crate::job::{AgentKind, EnvironmentKind, MIN_SYNC_INTERVAL_SEC};

/// Config file name constants.
pub const CONFIG_TOML: &str = ".scirun.toml";
pub const CONFIG_ENV: &str = "SCIRUN_CONFIG";

/// Find the config file for a project.
///
/// Priority order (highest first):
/// 1. `$SCIRUN_CONFIG` when set and the file exists
/// 2. `<root>/.scirun.toml`
/// 3. `<user config dir>/scirun/config.toml`
///
/// Returns None if nothing is found; callers fall back to defaults.
pub fn find_config_in_project(root: &Path) -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV).map(PathBuf::from)
        && explicit.is_file()
    {
        return Some(explicit);
    }

    let root_toml = root.join(CONFIG_TOML);
    if root_toml.is_file() {
        return Some(root_toml);
    }

    let user_toml = dirs::config_dir()?.join("scirun").join("config.toml");
    if user_toml.is_file() {
        return Some(user_toml);
    }

    None
}

/// Top-level .scirun.toml config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Directory relative paths are resolved against (the project root).
    #[serde(skip)]
    #[schemars(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PathsConfig {
    /// Task template source (read-only, shared by all jobs)
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    /// Host-visible root that holds one directory per job
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,
    /// Where idea files live (used by the viewer to find a job's idea)
    #[serde(default = "default_ideas_dir")]
    pub ideas_dir: PathBuf,
    /// Parent directory for staged build contexts (default: system temp dir)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            template_dir: default_template_dir(),
            jobs_dir: default_jobs_dir(),
            ideas_dir: default_ideas_dir(),
            staging_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    /// Orchestration runtime executable
    #[serde(default = "default_runtime_program")]
    pub program: String,
    /// Base agent timeout used when the task config does not declare one
    #[serde(default = "default_base_timeout")]
    pub base_timeout_sec: u64,
    #[serde(default)]
    pub environment: EnvironmentKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// Job timeout when none is given on the command line
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: default_runtime_program(),
            base_timeout_sec: default_base_timeout(),
            environment: EnvironmentKind::default(),
            model: default_model(),
            timeout_sec: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Seconds between periodic passes; at least `MIN_SYNC_INTERVAL_SEC` (30)
    #[serde(default = "default_sync_interval")]
    pub interval_sec: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_sec: default_sync_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerifierConfig {
    /// Categories that count toward the completeness score
    #[serde(default = "default_required_categories")]
    pub required: Vec<Category>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            required: default_required_categories(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgentsConfig {
    #[serde(default, rename = "claude-code")]
    pub claude_code: Option<AgentOverride>,
    #[serde(default, rename = "gemini-cli")]
    pub gemini_cli: Option<AgentOverride>,
}

/// Per-agent overrides for how the runtime loads the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AgentOverride {
    /// Import path of the sync-wrapped adapter
    #[serde(default)]
    pub import_path: Option<String>,
    /// Built-in runtime agent name used with --no-sync-daemon
    #[serde(default)]
    pub runtime_name: Option<String>,
}

// Default value functions for serde
fn default_template_dir() -> PathBuf { PathBuf::from("harbor-task") }
fn default_jobs_dir() -> PathBuf { PathBuf::from("jobs") }
fn default_ideas_dir() -> PathBuf { PathBuf::from("ideas") }
fn default_runtime_program() -> String { "harbor".into() }
fn default_base_timeout() -> u64 { crate::launch::DEFAULT_BASE_TIMEOUT_SEC }
fn default_model() -> String { "anthropic/claude-opus-4-6".into() }
fn default_timeout() -> u64 { 14_400 }
fn default_sync_interval() -> u64 { 180 }
fn default_required_categories() -> Vec<Category> { Category::DEFAULT_REQUIRED.to_vec() }

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&contents)
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid .scirun.toml: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the project config, or defaults when no file exists.
    pub fn discover(root: &Path) -> anyhow::Result<Self> {
        let mut config = match find_config_in_project(root) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(&path)?
            }
            None => Self::default(),
        };
        config.root = root.to_path_buf();
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sync.interval_sec < MIN_SYNC_INTERVAL_SEC {
            return Err(ExitError::Config(format!(
                "sync.interval_sec ({}) is below the minimum of {MIN_SYNC_INTERVAL_SEC}",
                self.sync.interval_sec
            ))
            .into());
        }
        if self.runtime.base_timeout_sec == 0 {
            return Err(ExitError::Config("runtime.base_timeout_sec must be positive".into()).into());
        }
        if self.verifier.required.is_empty() {
            return Err(ExitError::Config("verifier.required must name at least one category".into()).into());
        }
        Ok(())
    }

    /// Resolve a configured path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn template_dir(&self) -> PathBuf {
        self.resolve(&self.paths.template_dir)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.resolve(&self.paths.jobs_dir)
    }

    pub fn ideas_dir(&self) -> PathBuf {
        self.resolve(&self.paths.ideas_dir)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.paths
            .staging_dir
            .as_deref()
            .map_or_else(std::env::temp_dir, |p| self.resolve(p))
    }

    pub fn agent_override(&self, kind: AgentKind) -> Option<&AgentOverride> {
        match kind {
            AgentKind::ClaudeCode => self.agents.claude_code.as_ref(),
            AgentKind::GeminiCli => self.agents.gemini_cli.as_ref(),
        }
    }

    /// Serialize config to a TOML string with helpful comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;

        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# scirun project configuration\n# Relative paths resolve against this file's directory.\n\n");

        fn set_table_comment(doc: &mut toml_edit::DocumentMut, key: &str, comment: &str) {
            if let Some(tbl) = doc.get_mut(key).and_then(|item| item.as_table_mut()) {
                tbl.decor_mut().set_prefix(comment);
            }
        }

        set_table_comment(&mut doc, "paths", "# Template source, job output root, idea files\n");
        set_table_comment(&mut doc, "runtime", "\n# Orchestration runtime invocation\n# base_timeout_sec must match the runtime's own agent timeout\n");
        set_table_comment(&mut doc, "sync", "\n# In-sandbox artifact sync cadence (seconds)\n");
        set_table_comment(&mut doc, "verifier", "\n# Categories that gate the completeness reward\n");
        set_table_comment(&mut doc, "agents", "\n# Agent adapter overrides (omit to use defaults)\n");

        Ok(doc.to_string())
    }
}
