//! Read-only queries over the jobs directory.
//!
//! Nothing here writes: status, timing, rewards and submissions are derived
//! from what the runtime, the sync daemon and the verifier left on disk.

pub mod secrets;
pub mod trajectory;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::artifacts::{AGENT_SINK, ArtifactBundle, Category, VERIFIER_SINK};
use crate::config::Config;
use crate::error::ExitError;
use crate::idea::idea_path_candidates;
use crate::job::JobId;
use crate::launch::LAUNCH_RECORD_FILE;
use crate::resume::trial_dirs;
use crate::submission::{SubmissionEntry, VERSION_LOG_FILE, VersionLog};
use crate::verifier::{REWARD_FILE, grade};
use secrets::SecretMasker;

/// A job whose activity file changed within this window is running.
pub const RUNNING_WINDOW: Duration = Duration::from_secs(300);

/// Agent activity files under `<trial>/agent/`, in lookup order.
const ACTIVITY_FILES: [&str; 3] = ["claude-code.txt", "gemini-cli.txt", "trajectory.json"];

pub fn job_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)__\d{4}-\d{2}-\d{2}__\d{2}-\d{2}-\d{2}$").unwrap())
}

pub fn is_bare_date(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap())
        .is_match(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Idle,
    Unknown,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Idle => "idle",
            JobStatus::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub path: PathBuf,
    pub status: JobStatus,
    pub model: Option<String>,
    pub idea_stem: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_sec: Option<i64>,
    pub submissions: u32,
    pub reward: Option<String>,
    /// Categories present in the better of the two sinks.
    pub artifacts: Vec<Category>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdeaPayload {
    pub found: bool,
    pub stem: Option<String>,
    pub source: Option<PathBuf>,
    pub format: Option<&'static str>,
    pub content: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub trials: Vec<PathBuf>,
    pub idea: IdeaPayload,
    pub submission_log: Vec<SubmissionEntry>,
}

/// Agent activity file of the first trial that has one.
pub fn activity_file(job_root: &Path) -> Option<PathBuf> {
    trial_dirs(job_root).into_iter().find_map(|trial| {
        ACTIVITY_FILES
            .iter()
            .map(|f| trial.join("agent").join(f))
            .find(|p| p.is_file())
    })
}

fn modified_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok().or(Some(Duration::ZERO))
}

pub fn job_status(job_root: &Path) -> JobStatus {
    let Some(activity) = activity_file(job_root) else {
        return JobStatus::Unknown;
    };
    if modified_age(&activity).is_some_and(|age| age < RUNNING_WINDOW) {
        return JobStatus::Running;
    }
    if trial_dirs(job_root).iter().any(|t| t.join("verifier").is_dir()) {
        return JobStatus::Completed;
    }
    JobStatus::Idle
}

fn read_json(path: &Path) -> Option<Value> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Start and finish from the first result.json that has a start time.
fn timing(job_root: &Path) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut candidates = vec![job_root.join("result.json")];
    for trial in trial_dirs(job_root) {
        candidates.push(trial.join("result.json"));
        candidates.push(trial.join(VERIFIER_SINK).join("result.json"));
    }
    for path in candidates {
        let Some(result) = read_json(&path) else {
            continue;
        };
        let field = |k: &str| result.get(k).and_then(Value::as_str).and_then(parse_timestamp);
        if let Some(started) = field("started_at") {
            return (Some(started), field("finished_at"));
        }
    }
    (None, None)
}

fn duration_sec(
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    status: JobStatus,
) -> Option<i64> {
    let started = started?;
    let end = match (finished, status) {
        (Some(finished), _) => finished,
        (None, JobStatus::Running) => Utc::now(),
        (None, _) => return None,
    };
    Some((end - started).num_seconds().max(0))
}

fn submission_logs(job_root: &Path) -> Vec<VersionLog> {
    let mut logs = Vec::new();
    for trial in trial_dirs(job_root) {
        for sink in [VERIFIER_SINK, AGENT_SINK] {
            let path = trial.join(sink).join("submissions").join(VERSION_LOG_FILE);
            match VersionLog::read(&path) {
                Ok(log) if path.is_file() => logs.push(log),
                Ok(_) => {}
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "unreadable version log"),
            }
        }
    }
    logs
}

fn model_name(job_root: &Path) -> Option<String> {
    let from_config = read_json(&job_root.join("config.json")).and_then(|c| {
        c.pointer("/agents/0/model_name")
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    from_config.or_else(|| {
        read_json(&job_root.join(LAUNCH_RECORD_FILE))
            .and_then(|r| r.pointer("/job/model").and_then(Value::as_str).map(str::to_string))
    })
}

fn reward(job_root: &Path) -> Option<String> {
    trial_dirs(job_root).into_iter().find_map(|trial| {
        let raw = std::fs::read_to_string(trial.join("verifier").join(REWARD_FILE)).ok()?;
        let raw = raw.trim();
        (!raw.is_empty()).then(|| raw.to_string())
    })
}

fn best_bundle(job_root: &Path) -> Option<ArtifactBundle> {
    let sinks: Vec<PathBuf> = trial_dirs(job_root)
        .iter()
        .flat_map(|t| [t.join(AGENT_SINK), t.join(VERIFIER_SINK)])
        .collect();
    grade(&sinks, &Category::ALL).map(|(bundle, _)| bundle)
}

pub fn summarize(job_root: &Path) -> JobSummary {
    let name = job_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let status = job_status(job_root);
    let (started, finished) = timing(job_root);
    JobSummary {
        idea_stem: JobId::idea_stem(&name).map(str::to_string),
        name,
        path: job_root.to_path_buf(),
        status,
        model: model_name(job_root),
        started_at: started,
        duration_sec: duration_sec(started, finished, status),
        submissions: submission_logs(job_root)
            .iter()
            .map(|l| l.current_version)
            .max()
            .unwrap_or(0),
        reward: reward(job_root),
        artifacts: best_bundle(job_root)
            .map(|b| b.present().map(|(c, _)| c).collect())
            .unwrap_or_default(),
    }
}

/// Every job directory under `jobs_dir`, newest name first.
pub fn list_jobs(jobs_dir: &Path) -> anyhow::Result<Vec<JobSummary>> {
    if !jobs_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut roots: Vec<PathBuf> = std::fs::read_dir(jobs_dir)
        .with_context(|| format!("reading {}", jobs_dir.display()))?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| !p.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')))
        .collect();
    roots.sort_by(|a, b| b.cmp(a));
    Ok(roots.iter().map(|r| summarize(r)).collect())
}

/// Locate a job by name under the jobs dir.
pub fn job_root(jobs_dir: &Path, name: &str) -> Result<PathBuf, ExitError> {
    let root = jobs_dir.join(name);
    if name.contains('/') || name.contains("..") || !root.is_dir() {
        return Err(ExitError::Validation(format!(
            "no job named {name} under {}",
            jobs_dir.display()
        )));
    }
    Ok(root)
}

pub fn load_idea(config: &Config, job_name: &str, masker: &SecretMasker) -> IdeaPayload {
    let Some(stem) = JobId::idea_stem(job_name) else {
        return IdeaPayload { found: false, stem: None, source: None, format: None, content: None };
    };
    let found = idea_path_candidates(&config.root, &config.ideas_dir(), stem)
        .into_iter()
        .find(|p| p.is_file());
    let Some(path) = found else {
        return IdeaPayload {
            found: false,
            stem: Some(stem.to_string()),
            source: None,
            format: None,
            content: None,
        };
    };
    let raw = std::fs::read_to_string(&path).unwrap_or_default();
    let (format, content) = match serde_json::from_str::<Value>(&raw) {
        Ok(v) => ("json", masker.mask_json(&v)),
        Err(_) => ("text", Value::String(masker.mask(&raw))),
    };
    IdeaPayload {
        found: true,
        stem: Some(stem.to_string()),
        source: Some(path),
        format: Some(format),
        content: Some(content),
    }
}

pub fn job_detail(config: &Config, name: &str) -> anyhow::Result<JobDetail> {
    let root = job_root(&config.jobs_dir(), name)?;
    let masker = SecretMasker::new().with_env_file(&config.root.join(".env"));

    let mut seen = BTreeSet::new();
    let mut submission_log: Vec<SubmissionEntry> = submission_logs(&root)
        .into_iter()
        .flat_map(|l| l.versions)
        .filter(|e| seen.insert(e.directory.clone()))
        .collect();
    submission_log.sort_by_key(|e| e.version);

    Ok(JobDetail {
        summary: summarize(&root),
        trials: trial_dirs(&root),
        idea: load_idea(config, name, &masker),
        submission_log,
    })
}

fn is_uuid_stem(path: &Path) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
    });
    path.file_stem().is_some_and(|s| re.is_match(&s.to_string_lossy()))
}

/// Newest UUID-named top-level session log synced from the agent's Claude
/// config dir. Subagent logs live in nested directories and are skipped.
pub fn primary_session(job_root: &Path) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for trial in trial_dirs(job_root) {
        for sink in [AGENT_SINK, VERIFIER_SINK] {
            let projects = trial.join(sink).join("claude_sessions/projects");
            let Ok(project_dirs) = std::fs::read_dir(&projects) else {
                continue;
            };
            for project in project_dirs.filter_map(Result::ok).map(|e| e.path()) {
                let Ok(files) = std::fs::read_dir(&project) else {
                    continue;
                };
                for file in files.filter_map(Result::ok).map(|e| e.path()) {
                    if file.extension().is_none_or(|e| e != "jsonl") || !is_uuid_stem(&file) {
                        continue;
                    }
                    let modified = std::fs::metadata(&file)
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    if best.as_ref().is_none_or(|(t, _)| modified > *t) {
                        best = Some((modified, file));
                    }
                }
            }
        }
    }
    best.map(|(_, p)| p)
}

/// The transcript the trajectory view reads: the agent's stream-JSON log, or
/// the synced Claude session when the log is missing.
pub fn transcript_path(job_root: &Path) -> Option<PathBuf> {
    trial_dirs(job_root)
        .into_iter()
        .map(|t| t.join("agent/claude-code.txt"))
        .find(|p| p.is_file())
        .or_else(|| primary_session(job_root))
}
