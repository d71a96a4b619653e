use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::Args;

use super::{OutputFormat, project_root};
use crate::config::Config;
use crate::error::ExitError;
use crate::idea::Idea;
use crate::interrupt;
use crate::job::{AgentKind, EnvironmentKind, Job, JobId, validate_sync_interval};
use crate::launch::{LaunchOutcome, launch};

#[derive(Debug, Args)]
pub struct LaunchArgs {
    /// Idea file (JSON with at least a Name field)
    pub idea: PathBuf,
    /// Model passed to the agent (default from config)
    #[arg(long, short)]
    pub model: Option<String>,
    /// Absolute agent timeout in seconds (default from config)
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Previous job or trial directory to continue from
    #[arg(long)]
    pub resume_from: Option<PathBuf>,
    /// Reviewer feedback to address (text, or @path to read it from a file)
    #[arg(long)]
    pub feedback: Option<String>,
    /// Sandbox environment (default from config)
    #[arg(long = "env", value_enum)]
    pub environment: Option<EnvironmentKind>,
    /// GPUs to request for the sandbox
    #[arg(long, default_value_t = 0)]
    pub gpus: u32,
    /// Execution agent: claude-code or gemini-cli
    #[arg(long, default_value = "claude-code")]
    pub agent: String,
    /// Artifact sync interval in seconds (default from config)
    #[arg(long)]
    pub sync_interval: Option<u64>,
    /// Use the runtime's stock agent without the artifact sync daemon
    #[arg(long)]
    pub no_sync_daemon: bool,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl LaunchArgs {
    /// Validate everything that can be checked before staging.
    pub fn to_job(&self, config: &Config, idea: &Idea) -> anyhow::Result<Job> {
        let agent: AgentKind = self.agent.parse()?;
        let sync_interval_sec =
            validate_sync_interval(self.sync_interval.unwrap_or(config.sync.interval_sec))?;
        let timeout_sec = self.timeout.unwrap_or(config.runtime.timeout_sec);
        if timeout_sec == 0 {
            return Err(ExitError::Validation("timeout must be positive".into()).into());
        }
        if let Some(resume) = &self.resume_from
            && !resume.is_dir()
        {
            return Err(ExitError::ResumeNotFound {
                searched: resume.clone(),
                tried: "path is not a directory".into(),
            }
            .into());
        }

        Ok(Job {
            id: JobId::new(&idea.stem, Local::now()),
            idea_path: idea.path.clone(),
            model: self.model.clone().unwrap_or_else(|| config.runtime.model.clone()),
            timeout_sec,
            agent,
            gpus: self.gpus,
            environment: self.environment.unwrap_or(config.runtime.environment),
            resume_from: self.resume_from.clone(),
            feedback: self.feedback()?,
            sync_interval_sec,
            bypass_sync_daemon: self.no_sync_daemon,
        })
    }

    fn feedback(&self) -> anyhow::Result<Option<String>> {
        let Some(feedback) = self.feedback.as_deref() else {
            return Ok(None);
        };
        let Some(path) = feedback.strip_prefix('@') else {
            return Ok(Some(feedback.to_string()));
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| ExitError::Validation(format!("reading feedback file {path}: {e}")))?;
        Ok(Some(text))
    }

    pub fn execute(&self) -> anyhow::Result<()> {
        let root = project_root(self.project_root.as_ref())?;
        let config = Config::discover(&root)?;
        let format = OutputFormat::resolve(self.format);

        // Agent name is checked before touching the idea file.
        self.agent.parse::<AgentKind>()?;
        let idea = Idea::load(&self.idea)?;
        let job = self.to_job(&config, &idea)?;

        interrupt::install_or_warn("staged context cleanup");
        let outcome = launch(&job, &idea, &config)?;
        self.print(&outcome, format)
    }

    fn print(&self, outcome: &LaunchOutcome, format: OutputFormat) -> anyhow::Result<()> {
        let record = &outcome.record;
        match format {
            OutputFormat::Pretty => {
                println!("Job {} finished", record.job.id);
                println!("  agent:      {}", record.job.agent);
                println!("  model:      {}", record.job.model);
                println!(
                    "  timeout:    {}s (x{:.2} of {}s)",
                    record.job.timeout_sec, record.timeout_multiplier, record.base_timeout_sec
                );
                println!("  output:     {}", outcome.job_dir.display());
            }
            OutputFormat::Text => {
                println!(
                    "job  {}  agent={}  multiplier={}  dir={}",
                    record.job.id,
                    record.job.agent,
                    record.timeout_multiplier,
                    outcome.job_dir.display()
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(record).context("serializing launch record")?
                );
            }
        }
        Ok(())
    }
}
