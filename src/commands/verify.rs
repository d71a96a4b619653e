use std::path::PathBuf;

use clap::Args;

use super::{OutputFormat, project_root};
use crate::artifacts::sync::{DEFAULT_SINKS, DEFAULT_WORKSPACE};
use crate::artifacts::{AGENT_SINK, VERIFIER_SINK};
use crate::config::Config;
use crate::verifier::{DEFAULT_REWARD_DIR, Verification, VerifyRequest, verify};

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Grade a finished trial directory from the host instead of in-sandbox paths
    #[arg(long)]
    pub trial: Option<PathBuf>,
    /// Workspace to copy from before grading (default in-sandbox: /app)
    #[arg(long)]
    pub workspace: Option<PathBuf>,
    /// Sink to grade (repeatable, preference order)
    #[arg(long = "sink")]
    pub sinks: Vec<PathBuf>,
    /// Directory that receives reward.txt and verification.json
    #[arg(long)]
    pub reward_dir: Option<PathBuf>,
    /// Project root directory (for .scirun.toml)
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl VerifyArgs {
    /// Host mode reads a trial's two sinks and skips the workspace copy unless
    /// one is named.
    fn layout(&self) -> (Option<PathBuf>, Vec<PathBuf>, PathBuf) {
        match &self.trial {
            Some(trial) => (
                self.workspace.clone(),
                if self.sinks.is_empty() {
                    vec![trial.join(AGENT_SINK), trial.join(VERIFIER_SINK)]
                } else {
                    self.sinks.clone()
                },
                self.reward_dir.clone().unwrap_or_else(|| trial.join("verifier")),
            ),
            None => (
                Some(self.workspace.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE))),
                if self.sinks.is_empty() {
                    DEFAULT_SINKS.iter().map(PathBuf::from).collect()
                } else {
                    self.sinks.clone()
                },
                self.reward_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_REWARD_DIR)),
            ),
        }
    }

    pub fn execute(&self) -> anyhow::Result<()> {
        let root = project_root(self.project_root.as_ref())?;
        let config = Config::discover(&root)?;
        let format = OutputFormat::resolve(self.format);

        let (workspace, sinks, reward_dir) = self.layout();
        let verification = verify(&VerifyRequest {
            workspace: workspace.as_deref(),
            sinks: &sinks,
            required: &config.verifier.required,
            reward_dir: &reward_dir,
        })?;

        match format {
            OutputFormat::Pretty => print_pretty(&verification),
            OutputFormat::Text => {
                println!(
                    "reward  {}  score={}/{}  sink={}",
                    verification.reward_text,
                    verification.score,
                    verification.total,
                    verification.graded_sink.display()
                );
                for item in &verification.checklist {
                    let status = if item.present { "ok" } else { "missing" };
                    println!("check  {}  {status}  files={}", item.category, item.files);
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&verification)?),
        }
        Ok(())
    }
}

fn print_pretty(v: &Verification) {
    println!("=== Verification ===\n");
    println!("Graded: {}", v.graded_sink.display());
    for item in &v.checklist {
        if item.present {
            println!("  ✓ {} ({} file{})", item.category, item.files, if item.files == 1 { "" } else { "s" });
        } else {
            println!("  ✗ {}", item.category);
        }
    }
    if v.last_copy_clean == Some(false) {
        println!("\n  ! last-chance copy from the workspace had errors");
    }
    println!("\nReward: {} ({}/{})", v.reward_text, v.score, v.total);
}
