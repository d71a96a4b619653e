//! Artifact bundle model.
//!
//! The same categories live at different relative paths depending on where we
//! look: the agent's live workspace (`/app`), a durable sink
//! (`agent/artifacts`, `verifier/artifacts`), or a submission snapshot. An
//! [`ArtifactBundle`] is computed once per root by [`ArtifactBundle::inspect`]
//! and consumed by the verifier, the snapshot writer, the resume summary and
//! the viewer.

pub mod fsops;
pub mod sync;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

pub use sync::{SessionSource, SyncPlan, SyncReport};

/// Sink subdirectories under a trial root.
pub const AGENT_SINK: &str = "agent/artifacts";
pub const VERIFIER_SINK: &str = "verifier/artifacts";

const FIGURE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pdf", "svg", "gif", "eps"];

/// Named artifact categories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Experiment code and result files
    Experiments,
    /// Plots
    Figures,
    /// Compiled paper PDF
    Paper,
    /// Paper LaTeX source
    PaperSource,
    /// Bibliography
    References,
    /// Review / rebuttal record (JSON)
    Review,
    /// Literature notes
    Literature,
    /// Versioned submission snapshots
    Submissions,
    /// Python requirements of the experiment code
    Requirements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Tree,
    File,
}

/// Where a bundle root lives, which decides the relative path of each category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// The agent's working directory inside the sandbox.
    Workspace,
    /// A durable sink, a resumed bundle, or a submission snapshot.
    Sink,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Experiments,
        Category::Figures,
        Category::Paper,
        Category::PaperSource,
        Category::References,
        Category::Review,
        Category::Literature,
        Category::Submissions,
        Category::Requirements,
    ];

    /// Categories that gate the reward unless configured otherwise.
    pub const DEFAULT_REQUIRED: [Category; 4] = [
        Category::Experiments,
        Category::Figures,
        Category::Paper,
        Category::Review,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Experiments => "experiments",
            Category::Figures => "figures",
            Category::Paper => "paper",
            Category::PaperSource => "paper_source",
            Category::References => "references",
            Category::Review => "review",
            Category::Literature => "literature",
            Category::Submissions => "submissions",
            Category::Requirements => "requirements",
        }
    }

    const fn shape(self) -> Shape {
        match self {
            Category::Experiments
            | Category::Figures
            | Category::Literature
            | Category::Submissions => Shape::Tree,
            Category::Paper
            | Category::PaperSource
            | Category::References
            | Category::Review
            | Category::Requirements => Shape::File,
        }
    }

    pub const fn is_tree(self) -> bool {
        matches!(self.shape(), Shape::Tree)
    }

    /// Relative path of this category under a root with the given layout.
    pub const fn rel_path(self, layout: Layout) -> &'static str {
        match (self, layout) {
            (Category::Experiments, _) => "experiment_codebase",
            (Category::Figures, _) => "figures",
            (Category::Literature, _) => "literature",
            (Category::Submissions, _) => "submissions",
            (Category::Review, _) => "review.json",
            (Category::Requirements, _) => "requirements.txt",
            (Category::Paper, Layout::Workspace) => "latex/template.pdf",
            (Category::Paper, Layout::Sink) => "paper.pdf",
            (Category::PaperSource, Layout::Workspace) => "latex/template.tex",
            (Category::PaperSource, Layout::Sink) => "paper.tex",
            (Category::References, Layout::Workspace) => "latex/references.bib",
            (Category::References, Layout::Sink) => "references.bib",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence of one category: whether it counts, and how many files back it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Presence {
    pub present: bool,
    pub files: usize,
}

/// Typed presence record for one bundle root.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactBundle {
    pub root: PathBuf,
    pub layout: Layout,
    pub categories: BTreeMap<Category, Presence>,
}

/// Score of a bundle against a required category list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub score: u32,
    pub total: u32,
    pub missing: Vec<Category>,
}

impl ArtifactBundle {
    /// Inspect `root` once. A missing root yields an all-absent bundle.
    pub fn inspect(root: &Path, layout: Layout) -> Self {
        let categories = Category::ALL
            .iter()
            .map(|&c| (c, probe(&root.join(c.rel_path(layout)), c)))
            .collect();
        Self {
            root: root.to_path_buf(),
            layout,
            categories,
        }
    }

    pub fn presence(&self, category: Category) -> Presence {
        self.categories.get(&category).copied().unwrap_or_default()
    }

    pub fn has(&self, category: Category) -> bool {
        self.presence(category).present
    }

    pub fn path_of(&self, category: Category) -> PathBuf {
        self.root.join(category.rel_path(self.layout))
    }

    /// Categories that are present, in declaration order.
    pub fn present(&self) -> impl Iterator<Item = (Category, Presence)> + '_ {
        self.categories
            .iter()
            .filter(|(_, p)| p.present)
            .map(|(c, p)| (*c, *p))
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    pub fn completeness(&self, required: &[Category]) -> Completeness {
        let missing: Vec<Category> = required.iter().copied().filter(|c| !self.has(*c)).collect();
        let total = u32::try_from(required.len()).unwrap_or(u32::MAX);
        let score = total - u32::try_from(missing.len()).unwrap_or(total);
        Completeness { score, total, missing }
    }
}

fn probe(path: &Path, category: Category) -> Presence {
    match category.shape() {
        Shape::Tree => {
            if !path.is_dir() {
                return Presence::default();
            }
            let files = WalkDir::new(path)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter(|e| category != Category::Figures || is_figure(e.path()))
                .count();
            Presence { present: files > 0, files }
        }
        Shape::File => {
            let Ok(meta) = std::fs::metadata(path) else {
                return Presence::default();
            };
            if !meta.is_file() || meta.len() == 0 {
                return Presence::default();
            }
            let present = category != Category::Review || is_json_file(path);
            Presence { present, files: 1 }
        }
    }
}

fn is_figure(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| FIGURE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn is_json_file(path: &Path) -> bool {
    std::fs::read(path)
        .ok()
        .is_some_and(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).is_ok())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_sink_scores_full() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_complete_sink(dir.path());

        let bundle = ArtifactBundle::inspect(dir.path(), Layout::Sink);
        assert!(bundle.has(Category::Paper));
        assert_eq!(bundle.presence(Category::Experiments).files, 2);
        let c = bundle.completeness(&Category::DEFAULT_REQUIRED);
        assert_eq!((c.score, c.total), (4, 4));
        assert!(c.missing.is_empty());
    }

    #[test]
    fn missing_root_is_empty_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ArtifactBundle::inspect(&dir.path().join("nope"), Layout::Sink);
        assert!(bundle.is_empty());
        assert_eq!(bundle.completeness(&Category::DEFAULT_REQUIRED).score, 0);
    }

    #[test]
    fn figures_need_image_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("figures")).unwrap();
        std::fs::write(dir.path().join("figures/plot.py"), "plt.show()").unwrap();
        let bundle = ArtifactBundle::inspect(dir.path(), Layout::Sink);
        assert!(!bundle.has(Category::Figures));

        std::fs::write(dir.path().join("figures/plot.PNG"), b"x").unwrap();
        let bundle = ArtifactBundle::inspect(dir.path(), Layout::Sink);
        assert!(bundle.has(Category::Figures));
    }

    #[test]
    fn truncated_review_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("review.json"), "{\"overall\": ").unwrap();
        let bundle = ArtifactBundle::inspect(dir.path(), Layout::Sink);
        assert!(!bundle.has(Category::Review));
    }

    #[test]
    fn empty_paper_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("paper.pdf"), "").unwrap();
        let bundle = ArtifactBundle::inspect(dir.path(), Layout::Sink);
        assert!(!bundle.has(Category::Paper));
    }

    #[test]
    fn workspace_layout_maps_latex_paths() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_workspace(dir.path());
        let bundle = ArtifactBundle::inspect(dir.path(), Layout::Workspace);
        assert!(bundle.has(Category::Paper));
        assert!(bundle.has(Category::PaperSource));
        assert!(bundle.has(Category::References));
        assert_eq!(bundle.path_of(Category::Paper), dir.path().join("latex/template.pdf"));

        let as_sink = ArtifactBundle::inspect(dir.path(), Layout::Sink);
        assert!(!as_sink.has(Category::Paper));
    }

    #[test]
    fn partial_bundle_lists_missing() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_complete_sink(dir.path());
        std::fs::remove_file(dir.path().join("review.json")).unwrap();
        std::fs::remove_dir_all(dir.path().join("figures")).unwrap();
        let c = ArtifactBundle::inspect(dir.path(), Layout::Sink)
            .completeness(&Category::DEFAULT_REQUIRED);
        assert_eq!(c.score, 2);
        assert_eq!(c.missing, vec![Category::Figures, Category::Review]);
    }
}
