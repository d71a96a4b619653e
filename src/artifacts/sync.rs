//! One-shot mirror of the agent workspace into every durable sink.
//!
//! A pass walks a fixed manifest: each artifact [`Category`] maps from its
//! workspace path to its sink path, plus the agent's session logs. Sinks are
//! independent; an error in one never stops the others.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::fsops;
use super::{Category, Layout};
use crate::job::AgentKind;

/// Agent working directory inside the sandbox.
pub const DEFAULT_WORKSPACE: &str = "/app";

/// Durable sinks inside the sandbox, mounted from the trial directory.
pub const DEFAULT_SINKS: [&str; 2] = ["/logs/agent/artifacts", "/logs/verifier/artifacts"];

const CLAUDE_CONFIG_ENV: &str = "CLAUDE_CONFIG_DIR";
const CLAUDE_DEFAULT_CONFIG_DIR: &str = "/logs/agent/sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Tree,
    File,
}

/// One manifest line: copy `source` to `<sink>/<dest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEntry {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub kind: EntryKind,
}

impl SyncEntry {
    fn tree(source: PathBuf, dest: impl Into<PathBuf>) -> Self {
        Self { source, dest: dest.into(), kind: EntryKind::Tree }
    }

    fn file(source: PathBuf, dest: impl Into<PathBuf>) -> Self {
        Self { source, dest: dest.into(), kind: EntryKind::File }
    }
}

/// Where the running agent keeps its session logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    Claude { config_dir: PathBuf },
    Gemini { tmp_dir: PathBuf },
}

impl SessionSource {
    /// Resolve from `CLAUDE_CONFIG_DIR` / `HOME` like the agents themselves do.
    pub fn from_env(agent: AgentKind) -> Self {
        match agent {
            AgentKind::ClaudeCode => SessionSource::Claude {
                config_dir: std::env::var_os(CLAUDE_CONFIG_ENV)
                    .map_or_else(|| PathBuf::from(CLAUDE_DEFAULT_CONFIG_DIR), PathBuf::from),
            },
            AgentKind::GeminiCli => {
                let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/root"), PathBuf::from);
                SessionSource::Gemini { tmp_dir: home.join(".gemini").join("tmp") }
            }
        }
    }

    fn entries(&self) -> Vec<SyncEntry> {
        match self {
            SessionSource::Claude { config_dir } => vec![
                SyncEntry::tree(config_dir.join("projects"), "claude_sessions/projects"),
                SyncEntry::tree(config_dir.join("todos"), "claude_sessions/todos"),
                SyncEntry::tree(config_dir.join("debug"), "claude_sessions/debug"),
                SyncEntry::file(config_dir.join(".claude.json"), "claude_sessions/.claude.json"),
            ],
            SessionSource::Gemini { tmp_dir } => {
                vec![SyncEntry::tree(tmp_dir.clone(), "gemini_sessions")]
            }
        }
    }

    /// Claude writes its logs 0600 as root; the host reads them for trajectories.
    fn prepare(&self) {
        if let SessionSource::Claude { config_dir } = self
            && config_dir.is_dir()
            && let Err(e) = fsops::relax_permissions(config_dir)
        {
            tracing::debug!(error = %e, "could not relax session log permissions");
        }
    }
}

/// The manifest plus the sinks it is mirrored into.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    sinks: Vec<PathBuf>,
    entries: Vec<SyncEntry>,
    sessions: Option<SessionSource>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SinkReport {
    pub sink: PathBuf,
    pub copied: usize,
    /// Manifest entries whose source did not exist yet
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub sinks: Vec<SinkReport>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.sinks.iter().all(|s| s.errors.is_empty())
    }

    pub fn copied(&self) -> usize {
        self.sinks.iter().map(|s| s.copied).sum()
    }
}

impl SyncPlan {
    /// Artifact manifest for `workspace`, mirrored into `sinks`.
    pub fn new(workspace: &Path, sinks: Vec<PathBuf>) -> Self {
        let entries = Category::ALL
            .iter()
            .map(|c| {
                let source = workspace.join(c.rel_path(Layout::Workspace));
                let dest = c.rel_path(Layout::Sink);
                if c.is_tree() {
                    SyncEntry::tree(source, dest)
                } else {
                    SyncEntry::file(source, dest)
                }
            })
            .collect();
        Self { sinks, entries, sessions: None }
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: SessionSource) -> Self {
        self.entries.extend(sessions.entries());
        self.sessions = Some(sessions);
        self
    }

    pub fn sinks(&self) -> &[PathBuf] {
        &self.sinks
    }

    pub fn entries(&self) -> &[SyncEntry] {
        &self.entries
    }

    /// Run one full pass. Never fails: per-sink problems land in the report.
    pub fn run_pass(&self) -> SyncReport {
        let _span = tracing::debug_span!("sync_pass", sinks = self.sinks.len()).entered();
        if let Some(sessions) = &self.sessions {
            sessions.prepare();
        }
        let sinks = self.sinks.iter().map(|sink| self.sync_sink(sink)).collect();
        let report = SyncReport { sinks };
        for sink in &report.sinks {
            if sink.errors.is_empty() {
                tracing::debug!(sink = %sink.sink.display(), copied = sink.copied, skipped = sink.skipped, "sink synced");
            } else {
                tracing::warn!(sink = %sink.sink.display(), errors = sink.errors.len(), "sink sync incomplete");
            }
        }
        report
    }

    fn sync_sink(&self, sink: &Path) -> SinkReport {
        let mut report = SinkReport { sink: sink.to_path_buf(), ..SinkReport::default() };
        if let Err(e) = fsops::ensure_dir(sink) {
            report.errors.push(format!("{e:#}"));
            return report;
        }
        for entry in &self.entries {
            let dest = sink.join(&entry.dest);
            let result = match entry.kind {
                EntryKind::Tree if entry.source.is_dir() => {
                    fsops::replace_tree(&entry.source, &dest).map(Some)
                }
                EntryKind::File if entry.source.is_file() => {
                    fsops::copy_file_atomic(&entry.source, &dest).map(|()| Some(1))
                }
                _ => Ok(None),
            };
            match result {
                Ok(Some(n)) => report.copied += n,
                Ok(None) => report.skipped += 1,
                Err(e) => report.errors.push(format!("{}: {e:#}", entry.dest.display())),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::testutil::write_workspace;
    use crate::artifacts::ArtifactBundle;
    use std::fs;

    #[test]
    fn pass_mirrors_workspace_into_both_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        write_workspace(&ws);
        let sinks = vec![dir.path().join("agent"), dir.path().join("verifier")];

        let report = SyncPlan::new(&ws, sinks.clone()).run_pass();
        assert!(report.is_clean());
        for sink in &sinks {
            let bundle = ArtifactBundle::inspect(sink, Layout::Sink);
            assert!(bundle.has(Category::Paper));
            assert!(bundle.has(Category::Experiments));
            assert_eq!(
                fs::read_to_string(sink.join("paper.tex")).unwrap(),
                "\\begin{document}"
            );
        }
    }

    #[test]
    fn missing_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        fs::create_dir_all(&ws).unwrap();
        let sink = dir.path().join("sink");

        let report = SyncPlan::new(&ws, vec![sink.clone()]).run_pass();
        assert!(report.is_clean());
        assert_eq!(report.copied(), 0);
        assert_eq!(report.sinks[0].skipped, Category::ALL.len());
        assert!(sink.is_dir());
    }

    #[test]
    fn deleted_workspace_files_are_dropped_from_trees() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        write_workspace(&ws);
        fs::write(ws.join("figures/old.png"), b"x").unwrap();
        let sink = dir.path().join("sink");
        let plan = SyncPlan::new(&ws, vec![sink.clone()]);
        plan.run_pass();
        assert!(sink.join("figures/old.png").exists());

        fs::remove_file(ws.join("figures/old.png")).unwrap();
        plan.run_pass();
        assert!(!sink.join("figures/old.png").exists());
        assert!(sink.join("figures/acc.png").exists());
    }

    #[cfg(unix)]
    #[test]
    fn broken_sink_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        write_workspace(&ws);
        // A regular file where a sink directory should be.
        let bad = dir.path().join("bad");
        fs::write(&bad, "not a dir").unwrap();
        let good = dir.path().join("good");

        let report = SyncPlan::new(&ws, vec![bad, good.clone()]).run_pass();
        assert!(!report.is_clean());
        assert!(!report.sinks[0].errors.is_empty());
        assert!(report.sinks[1].errors.is_empty());
        assert!(good.join("review.json").is_file());
    }

    #[test]
    fn claude_sessions_are_mirrored() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        fs::create_dir_all(&ws).unwrap();
        let cfg = dir.path().join("sessions");
        fs::create_dir_all(cfg.join("projects/-app")).unwrap();
        fs::write(cfg.join("projects/-app/s.jsonl"), "{}\n").unwrap();
        fs::write(cfg.join(".claude.json"), "{}").unwrap();
        let sink = dir.path().join("sink");

        SyncPlan::new(&ws, vec![sink.clone()])
            .with_sessions(SessionSource::Claude { config_dir: cfg })
            .run_pass();
        assert!(sink.join("claude_sessions/projects/-app/s.jsonl").is_file());
        assert!(sink.join("claude_sessions/.claude.json").is_file());
    }

    #[test]
    fn gemini_sessions_land_in_their_own_dir() {
        let plan = SyncPlan::new(Path::new("/app"), vec![])
            .with_sessions(SessionSource::Gemini { tmp_dir: PathBuf::from("/root/.gemini/tmp") });
        let last = plan.entries().last().unwrap();
        assert_eq!(last.dest, PathBuf::from("gemini_sessions"));
        assert_eq!(last.kind, EntryKind::Tree);
    }
}
