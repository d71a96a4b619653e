//! Resume references: map a previous job or trial directory to exactly one
//! artifact bundle.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifacts::{ArtifactBundle, Category, Layout, fsops};
use crate::error::ExitError;

/// Bundle locations under a trial root, highest priority first.
pub const CANDIDATES: [&str; 3] = ["agent/artifacts", "verifier/artifacts", "artifacts"];

/// Trial directories inside a job root start with this prefix.
pub const TRIAL_PREFIX: &str = "harbor-task";

/// A resolved resume reference.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeSource {
    /// What the user passed.
    pub reference: PathBuf,
    /// The trial directory the bundle came from, when the reference was a job root.
    pub trial: Option<PathBuf>,
    /// Which candidate matched.
    pub candidate: &'static str,
    pub bundle: ArtifactBundle,
}

impl ResumeSource {
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle.root
    }

    /// Present categories with their file counts, for the resume note.
    pub fn present_items(&self) -> Vec<PresentItem> {
        self.bundle
            .present()
            .map(|(category, presence)| PresentItem {
                category,
                path: category.rel_path(Layout::Sink),
                files: presence.files,
                is_tree: category.is_tree(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PresentItem {
    pub category: Category,
    pub path: &'static str,
    pub files: usize,
    pub is_tree: bool,
}

fn first_candidate(root: &Path) -> Option<(&'static str, PathBuf)> {
    CANDIDATES
        .iter()
        .map(|c| (*c, root.join(c)))
        .find(|(_, p)| fsops::is_nonempty_dir(p))
}

/// Trial directories under a job root, sorted by name.
pub fn trial_dirs(job_root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(job_root) else {
        return Vec::new();
    };
    let mut trials: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(TRIAL_PREFIX))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    trials.sort();
    trials
}

/// Resolve a resume reference. The reference may be a trial root that holds
/// a candidate directly, or a job root whose first trial (sorted) does.
pub fn resolve(reference: &Path) -> Result<ResumeSource, ExitError> {
    let tried = || {
        CANDIDATES
            .iter()
            .map(|c| format!("<path>/{c}"))
            .chain(CANDIDATES.iter().map(|c| format!("<path>/{TRIAL_PREFIX}*/{c}")))
            .collect::<Vec<_>>()
            .join(", ")
    };
    if !reference.is_dir() {
        return Err(ExitError::ResumeNotFound {
            searched: reference.to_path_buf(),
            tried: "path is not a directory".into(),
        });
    }

    let (trial, (candidate, dir)) = if let Some(found) = first_candidate(reference) {
        (None, found)
    } else {
        let trial = trial_dirs(reference).into_iter().next().ok_or_else(|| {
            ExitError::ResumeNotFound { searched: reference.to_path_buf(), tried: tried() }
        })?;
        let found = first_candidate(&trial).ok_or_else(|| ExitError::ResumeNotFound {
            searched: reference.to_path_buf(),
            tried: tried(),
        })?;
        (Some(trial), found)
    };

    tracing::info!(bundle = %dir.display(), candidate, "resolved resume reference");
    Ok(ResumeSource {
        reference: reference.to_path_buf(),
        trial,
        candidate,
        bundle: ArtifactBundle::inspect(&dir, Layout::Sink),
    })
}
