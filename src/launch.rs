//! Job launcher: validate, resolve the resume reference, stage, hand off to
//! the orchestration runtime, record the outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::adapters;
use crate::artifacts::fsops;
use crate::config::Config;
use crate::error::ExitError;
use crate::idea::Idea;
use crate::job::{EnvironmentKind, Job};
use crate::resume::{self, ResumeSource};
use crate::stage::{self, RecipeVariant, StageRequest, StagedContext};
use crate::subprocess::{self, Tool};

/// Agent timeout the runtime assumes when the task config declares none.
pub const DEFAULT_BASE_TIMEOUT_SEC: u64 = 7200;

/// Written into the job directory after the runtime returns.
pub const LAUNCH_RECORD_FILE: &str = "scirun_launch.json";

const GPU_PROBE_TIMEOUT: Duration = Duration::from_secs(20);
const RUNTIME_POLL: Duration = Duration::from_millis(200);
/// The runtime tears down its sandbox on SIGTERM; give it time to do so.
const RUNTIME_STOP_GRACE: Duration = Duration::from_secs(30);

/// `requested / base`; the runtime scales every phase timeout by this.
#[allow(clippy::cast_precision_loss)]
pub fn timeout_multiplier(requested_sec: u64, base_sec: u64) -> f64 {
    requested_sec as f64 / base_sec.max(1) as f64
}

/// How the runtime should load the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AgentSelector {
    /// Sync-wrapped adapter loaded by import path
    ImportPath(String),
    /// The runtime's stock agent, no in-sandbox sync daemon
    Builtin(String),
}

impl AgentSelector {
    pub fn for_job(job: &Job, config: &Config) -> Self {
        let overrides = config.agent_override(job.agent);
        if job.bypass_sync_daemon {
            let name = overrides
                .and_then(|o| o.runtime_name.clone())
                .unwrap_or_else(|| job.agent.runtime_name().to_string());
            AgentSelector::Builtin(name)
        } else {
            let path = overrides
                .and_then(|o| o.import_path.clone())
                .unwrap_or_else(|| job.agent.default_import_path());
            AgentSelector::ImportPath(path)
        }
    }
}

/// Runtime command line for one job.
pub fn runtime_args(
    job: &Job,
    staged: &Path,
    jobs_dir: &Path,
    agent: &AgentSelector,
    multiplier: f64,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--path".to_string(),
        staged.display().to_string(),
    ];
    match agent {
        AgentSelector::ImportPath(path) => {
            args.extend(["--agent-import-path".to_string(), path.clone()]);
        }
        AgentSelector::Builtin(name) => args.extend(["--agent".to_string(), name.clone()]),
    }
    args.extend([
        "--model".to_string(),
        job.model.clone(),
        "--env".to_string(),
        job.environment.as_str().to_string(),
        "--timeout-multiplier".to_string(),
        multiplier.to_string(),
        "--jobs-dir".to_string(),
        jobs_dir.display().to_string(),
        "--job-name".to_string(),
        job.id.to_string(),
    ]);
    if matches!(agent, AgentSelector::ImportPath(_)) {
        args.extend([
            "--agent-kwarg".to_string(),
            format!("artifact_sync_interval_sec={}", job.sync_interval_sec),
        ]);
    }
    args
}

/// Reject GPU requests the target environment cannot satisfy.
pub fn check_gpu_support(environment: EnvironmentKind, gpus: u32) -> anyhow::Result<()> {
    if gpus == 0 || !environment.needs_host_gpu_runtime() {
        return Ok(());
    }
    let output = Tool::new("docker")
        .args(&["info", "--format", "{{json .Runtimes}}"])
        .timeout(GPU_PROBE_TIMEOUT)
        .run()
        .context("probing docker for GPU support")?;
    if !output.success() {
        return Err(ExitError::Validation(format!(
            "--gpus {gpus} requested but `docker info` failed: {}",
            output.stderr.trim()
        ))
        .into());
    }
    if !output.stdout.contains("nvidia") {
        return Err(ExitError::Validation(format!(
            "--gpus {gpus} requested but the Docker daemon has no nvidia runtime; \
             install nvidia-container-toolkit or use --env modal"
        ))
        .into());
    }
    Ok(())
}

/// Persisted summary of one launch.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchRecord {
    pub job: Job,
    /// The idea's `Name` field, when it has one.
    pub idea_name: Option<String>,
    pub staged_context: String,
    pub recipe: RecipeVariant,
    pub resumed: bool,
    pub template_fingerprint: String,
    pub agent: AgentSelector,
    pub base_timeout_sec: u64,
    pub timeout_multiplier: f64,
    pub runtime: Vec<String>,
    pub exit_code: i32,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

/// What a launch produced.
#[derive(Debug)]
pub struct LaunchOutcome {
    pub record: LaunchRecord,
    pub job_dir: PathBuf,
}

/// Launch one job. The staged context is released when this returns, on
/// every path, including a termination signal once [`crate::interrupt`] is
/// installed.
pub fn launch(job: &Job, idea: &Idea, config: &Config) -> anyhow::Result<LaunchOutcome> {
    let _span = tracing::info_span!("launch", job = %job.id, agent = %job.agent).entered();
    let started_at = Local::now();

    let resume: Option<ResumeSource> = job
        .resume_from
        .as_deref()
        .map(resume::resolve)
        .transpose()?;
    check_gpu_support(job.environment, job.gpus)?;

    let template_dir = config.template_dir();
    let template_fingerprint = stage::tree_fingerprint(&template_dir)
        .map_err(|e| ExitError::Staging(format!("reading template: {e:#}")))?;
    let staging_root = config.staging_dir();
    let staged: StagedContext = stage::stage(&StageRequest {
        template_dir: &template_dir,
        staging_root: &staging_root,
        idea,
        gpus: job.gpus,
        resume: resume.as_ref(),
        feedback: job.feedback.as_deref(),
    })?;

    let base_timeout_sec = staged
        .agent_timeout_sec()
        .unwrap_or(config.runtime.base_timeout_sec);
    let multiplier = timeout_multiplier(job.timeout_sec, base_timeout_sec);
    let agent = AgentSelector::for_job(job, config);
    let jobs_dir = config.jobs_dir();
    fsops::ensure_dir(&jobs_dir)?;

    let args = runtime_args(job, staged.path(), &jobs_dir, &agent, multiplier);
    tracing::info!(
        program = %config.runtime.program,
        multiplier,
        base_timeout_sec,
        staged = %staged.name(),
        "starting runtime"
    );
    let mut runtime = Tool::new(&config.runtime.program)
        .args(&args)
        .current_dir(&config.root);
    if matches!(agent, AgentSelector::ImportPath(_)) {
        runtime = runtime.env("PYTHONPATH", adapters::python_path(&config.root)?);
    }
    let mut child = runtime.spawn()?;
    let Some(status) = subprocess::wait_or_interrupt(&mut child, RUNTIME_POLL)
        .with_context(|| format!("waiting for {}", config.runtime.program))?
    else {
        tracing::warn!(staged = %staged.name(), "termination signal; stopping runtime");
        if let Err(e) = subprocess::stop(&mut child, RUNTIME_STOP_GRACE) {
            tracing::warn!(error = %e, "could not reap runtime");
        }
        drop(staged);
        return Err(ExitError::Interrupted { what: format!("job {}", job.id) }.into());
    };
    let exit_code = status.code().unwrap_or(-1);

    let job_dir = jobs_dir.join(job.id.as_str());
    let record = LaunchRecord {
        job: job.clone(),
        idea_name: idea.name.clone(),
        staged_context: staged.name(),
        recipe: staged.recipe(),
        resumed: staged.resumed(),
        template_fingerprint,
        agent,
        base_timeout_sec,
        timeout_multiplier: multiplier,
        runtime: std::iter::once(config.runtime.program.clone()).chain(args).collect(),
        exit_code,
        started_at,
        finished_at: Local::now(),
    };
    fsops::atomic_write_json_pretty(&job_dir.join(LAUNCH_RECORD_FILE), &record)?;
    drop(staged);

    if exit_code != 0 {
        return Err(ExitError::ToolFailed {
            tool: config.runtime.program.clone(),
            code: exit_code,
            message: format!("job {} did not finish cleanly; see {}", job.id, job_dir.display()),
        }
        .into());
    }
    tracing::info!(job_dir = %job_dir.display(), "job finished");
    Ok(LaunchOutcome { record, job_dir })
}
