use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use super::{OutputFormat, project_root};
use crate::config::Config;
use crate::error::ExitError;
use crate::viewer::secrets::SecretMasker;
use crate::viewer::trajectory::{Breakdown, Event, TokenUsage, estimate_cost_usd, parse_transcript};
use crate::viewer::{self, JobSummary};

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// List every job with status, reward and artifact presence
    List(ListArgs),
    /// Show one job's metadata, submissions and idea
    Show(ShowArgs),
    /// Print a job's parsed agent trajectory
    Trajectory(TrajectoryArgs),
}

impl JobsCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            Self::List(args) => args.execute(),
            Self::Show(args) => args.execute(),
            Self::Trajectory(args) => args.execute(),
        }
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Job directory name
    pub job: String,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Args)]
pub struct TrajectoryArgs {
    /// Job directory name
    pub job: String,
    /// Only events from this transcript line on (0-based)
    #[arg(long, default_value_t = 0)]
    pub after_line: usize,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

fn load_config(arg: Option<&PathBuf>) -> anyhow::Result<Config> {
    let root = project_root(arg)?;
    Config::discover(&root)
}

fn reward_or_dash(job: &JobSummary) -> &str {
    job.reward.as_deref().unwrap_or("-")
}

fn format_duration(secs: Option<i64>) -> String {
    match secs {
        None => "-".to_string(),
        Some(s) if s >= 3600 => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
        Some(s) => format!("{}m{:02}s", s / 60, s % 60),
    }
}

impl ListArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let config = load_config(self.project_root.as_ref())?;
        let jobs = viewer::list_jobs(&config.jobs_dir())?;

        match OutputFormat::resolve(self.format) {
            OutputFormat::Pretty => {
                if jobs.is_empty() {
                    println!("No jobs under {}", config.jobs_dir().display());
                    return Ok(());
                }
                println!("{:<48} {:<10} {:>8} {:>6} {:>5}", "JOB", "STATUS", "TIME", "REWARD", "SUBS");
                for job in &jobs {
                    println!(
                        "{:<48} {:<10} {:>8} {:>6} {:>5}",
                        job.name,
                        job.status,
                        format_duration(job.duration_sec),
                        reward_or_dash(job),
                        job.submissions
                    );
                }
            }
            OutputFormat::Text => {
                for job in &jobs {
                    println!(
                        "job  {}  status={}  reward={}  submissions={}  artifacts={}",
                        job.name,
                        job.status,
                        reward_or_dash(job),
                        job.submissions,
                        job.artifacts.len()
                    );
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
        }
        Ok(())
    }
}

impl ShowArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let config = load_config(self.project_root.as_ref())?;
        let detail = viewer::job_detail(&config, &self.job)?;

        match OutputFormat::resolve(self.format) {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&detail)?),
            OutputFormat::Pretty | OutputFormat::Text => {
                let s = &detail.summary;
                println!("Job:         {}", s.name);
                println!("Status:      {}", s.status);
                println!("Model:       {}", s.model.as_deref().unwrap_or("-"));
                println!("Duration:    {}", format_duration(s.duration_sec));
                println!("Reward:      {}", reward_or_dash(s));
                let artifacts: Vec<&str> = s.artifacts.iter().map(|c| c.as_str()).collect();
                println!("Artifacts:   {}", if artifacts.is_empty() { "-".to_string() } else { artifacts.join(", ") });
                if !detail.submission_log.is_empty() {
                    println!("\nSubmissions:");
                    for entry in &detail.submission_log {
                        println!("  v{}  {}  {}", entry.version, entry.timestamp, entry.directory);
                    }
                }
                match (&detail.idea.source, &detail.idea.content) {
                    (Some(source), Some(content)) => {
                        println!("\nIdea ({}):", source.display());
                        match content {
                            serde_json::Value::String(text) => println!("{text}"),
                            other => println!("{}", serde_json::to_string_pretty(other)?),
                        }
                    }
                    _ => println!("\nIdea: not found"),
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct TrajectoryReport<'a> {
    job: &'a str,
    source: PathBuf,
    session_id: Option<String>,
    model: Option<String>,
    total_lines: usize,
    tokens: TokenUsage,
    estimated_cost_usd: f64,
    tool_breakdown: Vec<Breakdown>,
    event_types: Vec<Breakdown>,
    events: Vec<Event>,
}

impl TrajectoryArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let config = load_config(self.project_root.as_ref())?;
        let root = viewer::job_root(&config.jobs_dir(), &self.job)?;
        let source = viewer::transcript_path(&root).ok_or_else(|| {
            ExitError::Validation(format!("job {} has no agent transcript yet", self.job))
        })?;
        let masker = SecretMasker::new().with_env_file(&config.root.join(".env"));
        let transcript = parse_transcript(&source, self.after_line, &masker)?;

        let tokens = transcript.token_totals();
        let model = transcript.model.clone().unwrap_or_default();
        let report = TrajectoryReport {
            job: &self.job,
            source,
            session_id: transcript.session_id.clone(),
            model: transcript.model.clone(),
            total_lines: transcript.total_lines,
            tokens,
            estimated_cost_usd: estimate_cost_usd(&tokens, &model),
            tool_breakdown: transcript.tool_breakdown(),
            event_types: transcript.event_type_breakdown(),
            events: transcript.events,
        };

        match OutputFormat::resolve(self.format) {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                for e in &report.events {
                    println!("{}  {}  {}", e.step, e.event_type, e.summary);
                }
            }
            OutputFormat::Pretty => {
                for e in &report.events {
                    println!("{:>5}  [{:<17}] {}", e.step, e.event_type, e.summary);
                }
                println!(
                    "\n{} lines, {} tokens (~${:.2})",
                    report.total_lines,
                    report.tokens.total(),
                    report.estimated_cost_usd
                );
                for b in &report.tool_breakdown {
                    println!("  {:<12} {:>4}  {:>5.1}%", b.name, b.count, b.pct);
                }
            }
        }
        Ok(())
    }
}
