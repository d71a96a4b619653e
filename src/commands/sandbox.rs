use std::path::PathBuf;
use std::process::Child;
use std::time::Duration;

use clap::Args;

use crate::artifacts::sync::{DEFAULT_SINKS, DEFAULT_WORKSPACE};
use crate::artifacts::{SessionSource, SyncPlan};
use crate::daemon::SyncDaemon;
use crate::error::ExitError;
use crate::interrupt;
use crate::job::{AgentKind, validate_sync_interval};
use crate::subprocess::{self, Tool};

/// Exit status reported when a termination signal ends the sandbox.
const SIGNALLED_EXIT: i32 = 143;
const POLL: Duration = Duration::from_millis(200);
const AGENT_STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Args)]
pub struct SandboxArgs {
    /// Execution agent whose session logs are captured
    #[arg(long, default_value = "claude-code")]
    pub agent: String,
    /// Seconds between periodic sync passes
    #[arg(long, default_value_t = 180)]
    pub interval: u64,
    /// Workspace the agent writes into
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    pub workspace: PathBuf,
    /// Durable sink (repeatable; default: agent and verifier log mounts)
    #[arg(long = "sink")]
    pub sinks: Vec<PathBuf>,
    /// Agent command line
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

impl SandboxArgs {
    fn plan(&self, agent: AgentKind) -> SyncPlan {
        let sinks = if self.sinks.is_empty() {
            DEFAULT_SINKS.iter().map(PathBuf::from).collect()
        } else {
            self.sinks.clone()
        };
        SyncPlan::new(&self.workspace, sinks).with_sessions(SessionSource::from_env(agent))
    }

    fn spawn(&self) -> anyhow::Result<Child> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ExitError::Validation("no agent command given".into()))?;
        Tool::new(program).args(args).spawn()
    }

    /// Run the agent under the sync daemon. Every exit path, a termination
    /// signal included, finishes the final sync pass before the agent is
    /// torn down or the process exits.
    pub fn execute(&self) -> anyhow::Result<()> {
        let agent: AgentKind = self.agent.parse()?;
        let interval = validate_sync_interval(self.interval)?;

        interrupt::install_or_warn("a final artifact sync");
        let daemon = SyncDaemon::start(self.plan(agent), Duration::from_secs(interval));
        let mut child = self.spawn()?;

        let waited = subprocess::wait_or_interrupt(&mut child, POLL);
        let periodic = daemon.passes();
        let report = daemon.shutdown();
        tracing::info!(
            periodic,
            copied = report.copied(),
            clean = report.is_clean(),
            "final sync done"
        );

        let status = match waited {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                eprintln!("final sync copied {} item(s)", report.copied());
                if let Err(e) = subprocess::stop(&mut child, AGENT_STOP_GRACE) {
                    tracing::warn!(error = %e, "could not reap agent");
                }
                return Err(ExitError::Interrupted { what: "agent".into() }.into());
            }
            Err(e) => {
                tracing::warn!(error = %e, "lost track of agent process");
                None
            }
        };

        let code = status.map_or(1, |s| s.code().unwrap_or(SIGNALLED_EXIT));
        if code != 0 {
            return Err(ExitError::new(
                u8::try_from(code).unwrap_or(1),
                format!("agent exited with status {code}"),
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        args: SandboxArgs,
    }

    #[test]
    fn trailing_command_is_captured() {
        let cli = Cli::parse_from(["scirun", "--interval", "60", "--", "claude", "-p", "go"]);
        assert_eq!(cli.args.command, ["claude", "-p", "go"]);
        assert_eq!(cli.args.workspace, PathBuf::from("/app"));
    }

    #[test]
    fn default_plan_uses_both_log_sinks() {
        let cli = Cli::parse_from(["scirun", "--", "true"]);
        let plan = cli.args.plan(AgentKind::ClaudeCode);
        assert_eq!(plan.sinks().len(), 2);
        assert!(plan.entries().iter().any(|e| e.dest.starts_with("claude_sessions")));
    }

    #[cfg(unix)]
    #[test]
    fn agent_exit_code_propagates_after_final_sync() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        std::fs::create_dir_all(&ws).unwrap();
        let sink = dir.path().join("sink");
        let script = format!("echo '{{}}' > {}/review.json; exit 3", ws.display());
        let cli = Cli::parse_from([
            "scirun",
            "--workspace",
            ws.to_str().unwrap(),
            "--sink",
            sink.to_str().unwrap(),
            "--",
            "sh",
            "-c",
            script.as_str(),
        ]);
        let err = cli.args.execute().unwrap_err();
        let exit = err.downcast_ref::<ExitError>().unwrap();
        assert!(matches!(exit, ExitError::WithCode { code: 3, .. }));
        assert!(sink.join("review.json").is_file());
    }
}
