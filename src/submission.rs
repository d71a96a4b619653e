//! Versioned submission snapshots and the version log.
//!
//! The log (`version_log.json`) is the single source of version numbers: a
//! writer takes `version_log.lock`, reads `current_version` (0 when the log is
//! absent), writes snapshot `v{N}_{YYYYmmdd_HHMMSS}`, then rewrites the log.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifacts::{ArtifactBundle, Category, fsops};
use crate::error::ExitError;

pub const VERSION_LOG_FILE: &str = "version_log.json";
pub const LOCK_FILE: &str = "version_log.lock";

/// Categories copied into each snapshot.
pub const SNAPSHOT_CATEGORIES: [Category; 6] = [
    Category::Experiments,
    Category::Figures,
    Category::Paper,
    Category::PaperSource,
    Category::References,
    Category::Review,
];

const LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_POLL: Duration = Duration::from_millis(50);
const STALE_LOCK_AGE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionLog {
    #[serde(default)]
    pub current_version: u32,
    #[serde(default)]
    pub versions: Vec<SubmissionEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEntry {
    pub version: u32,
    pub timestamp: String,
    pub directory: String,
    #[serde(default)]
    pub has_experiments: bool,
    #[serde(default)]
    pub has_figures: bool,
    #[serde(default)]
    pub has_pdf: bool,
    #[serde(default)]
    pub has_tex: bool,
    #[serde(default)]
    pub has_bib: bool,
    #[serde(default)]
    pub has_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Fields written by other tools (e.g. reviewer metadata) survive rewrites.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SubmissionEntry {
    fn flags_from(bundle: &ArtifactBundle) -> Self {
        Self {
            has_experiments: bundle.has(Category::Experiments),
            has_figures: bundle.has(Category::Figures),
            has_pdf: bundle.has(Category::Paper),
            has_tex: bundle.has(Category::PaperSource),
            has_bib: bundle.has(Category::References),
            has_review: bundle.has(Category::Review),
            ..Self::default()
        }
    }
}

impl VersionLog {
    /// Read a log; absent means empty.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}

/// Exclusive hold on a submissions directory. Released on drop.
#[derive(Debug)]
struct LogLock {
    path: PathBuf,
}

impl Drop for LogLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

fn acquire_lock(dir: &Path, wait: Duration) -> anyhow::Result<LogLock> {
    let path = dir.join(LOCK_FILE);
    let start = Instant::now();
    loop {
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let payload = format!(
                    "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                    std::process::id(),
                    Local::now().to_rfc3339()
                );
                let _ = file.write_all(payload.as_bytes());
                let _ = file.sync_all();
                return Ok(LogLock { path });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(&path) {
                    tracing::warn!(lock = %path.display(), "removing stale version log lock");
                    let _ = fs::remove_file(&path);
                    continue;
                }
                if start.elapsed() >= wait {
                    return Err(ExitError::Locked { path }.into());
                }
                std::thread::sleep(LOCK_POLL);
            }
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        }
    }
}

pub fn snapshot_dir_name(version: u32, at: DateTime<Local>) -> String {
    format!("v{version}_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Record a new submission: snapshot `source`'s present artifacts into
/// `submissions_dir` under the next version number.
pub fn submit(
    source: &ArtifactBundle,
    submissions_dir: &Path,
    note: Option<&str>,
) -> anyhow::Result<SubmissionEntry> {
    submit_with_wait(source, submissions_dir, note, LOCK_WAIT)
}

fn submit_with_wait(
    source: &ArtifactBundle,
    submissions_dir: &Path,
    note: Option<&str>,
    wait: Duration,
) -> anyhow::Result<SubmissionEntry> {
    fsops::ensure_dir(submissions_dir)?;
    let _lock = acquire_lock(submissions_dir, wait)?;

    let log_path = submissions_dir.join(VERSION_LOG_FILE);
    let mut log = VersionLog::read(&log_path)?;
    let version = log.current_version + 1;
    let now = Local::now();
    let directory = snapshot_dir_name(version, now);
    let snapshot = submissions_dir.join(&directory);
    let _span = tracing::info_span!("submit", version, dir = %directory).entered();

    fs::create_dir(&snapshot).with_context(|| format!("creating {}", snapshot.display()))?;
    if let Err(e) = copy_snapshot(source, &snapshot) {
        let _ = fs::remove_dir_all(&snapshot);
        return Err(e);
    }

    let entry = SubmissionEntry {
        version,
        timestamp: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        directory,
        note: note.map(str::to_string),
        ..SubmissionEntry::flags_from(source)
    };
    log.current_version = version;
    log.versions.push(entry.clone());
    fsops::atomic_write_json_pretty(&log_path, &log)?;
    tracing::info!(version, "submission recorded");
    Ok(entry)
}

fn copy_snapshot(source: &ArtifactBundle, snapshot: &Path) -> anyhow::Result<()> {
    for category in SNAPSHOT_CATEGORIES {
        if !source.has(category) {
            continue;
        }
        let from = source.path_of(category);
        let to = snapshot.join(category.rel_path(crate::artifacts::Layout::Sink));
        if category.is_tree() {
            fsops::copy_tree(&from, &to)?;
        } else {
            if let Some(parent) = to.parent() {
                fsops::ensure_dir(parent)?;
            }
            fs::copy(&from, &to).with_context(|| format!("copying {}", from.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Layout;
    use crate::artifacts::testutil::write_workspace;

    fn workspace() -> (tempfile::TempDir, ArtifactBundle) {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        write_workspace(&ws);
        let bundle = ArtifactBundle::inspect(&ws, Layout::Workspace);
        (dir, bundle)
    }

    #[test]
    fn versions_start_at_one_and_increase() {
        let (dir, bundle) = workspace();
        let subs = dir.path().join("app/submissions");

        let first = submit(&bundle, &subs, None).unwrap();
        let second = submit(&bundle, &subs, Some("after rebuttal")).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(first.directory.starts_with("v1_"));

        let log = VersionLog::read(&subs.join(VERSION_LOG_FILE)).unwrap();
        assert_eq!(log.current_version, 2);
        assert_eq!(log.versions.len(), 2);
        assert_eq!(log.versions[1].note.as_deref(), Some("after rebuttal"));
        assert!(!subs.join(LOCK_FILE).exists());
    }

    #[test]
    fn snapshot_uses_sink_names_and_flags() {
        let (dir, bundle) = workspace();
        let subs = dir.path().join("subs");
        let entry = submit(&bundle, &subs, None).unwrap();
        let snap = subs.join(&entry.directory);
        assert!(snap.join("paper.pdf").is_file());
        assert!(snap.join("paper.tex").is_file());
        assert!(snap.join("references.bib").is_file());
        assert!(snap.join("figures/acc.png").is_file());
        assert!(entry.has_pdf && entry.has_tex && entry.has_bib && entry.has_review);
        assert!(entry.has_experiments && entry.has_figures);
    }

    #[test]
    fn missing_categories_are_flagged_false() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        fs::create_dir_all(ws.join("latex")).unwrap();
        fs::write(ws.join("latex/template.pdf"), b"%PDF").unwrap();
        let bundle = ArtifactBundle::inspect(&ws, Layout::Workspace);
        let entry = submit(&bundle, &ws.join("submissions"), None).unwrap();
        assert!(entry.has_pdf);
        assert!(!entry.has_review && !entry.has_figures && !entry.has_experiments);
    }

    #[test]
    fn existing_log_fields_survive() {
        let (dir, bundle) = workspace();
        let subs = dir.path().join("subs");
        fs::create_dir_all(&subs).unwrap();
        fs::write(
            subs.join(VERSION_LOG_FILE),
            r#"{"current_version": 3, "versions": [{"version": 3, "timestamp": "t", "directory": "v3_x", "reviewer_mode": "api"}]}"#,
        )
        .unwrap();

        let entry = submit(&bundle, &subs, None).unwrap();
        assert_eq!(entry.version, 4);
        let log = VersionLog::read(&subs.join(VERSION_LOG_FILE)).unwrap();
        assert_eq!(log.versions[0].extra["reviewer_mode"], "api");
    }

    #[test]
    fn held_lock_reports_locked() {
        let (dir, bundle) = workspace();
        let subs = dir.path().join("subs");
        fs::create_dir_all(&subs).unwrap();
        fs::write(subs.join(LOCK_FILE), "{}").unwrap();

        let err = submit_with_wait(&bundle, &subs, None, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err.downcast_ref::<ExitError>(), Some(ExitError::Locked { .. })));
        assert!(!subs.join(VERSION_LOG_FILE).exists());
    }

    #[test]
    fn concurrent_writers_get_distinct_versions() {
        let (dir, bundle) = workspace();
        let subs = dir.path().join("subs");
        let mut versions: Vec<u32> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| s.spawn(|| submit(&bundle, &subs, None).unwrap().version))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);
    }
}
