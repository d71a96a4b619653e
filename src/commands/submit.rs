use std::path::PathBuf;

use clap::Args;

use super::OutputFormat;
use crate::artifacts::sync::DEFAULT_WORKSPACE;
use crate::artifacts::{ArtifactBundle, Category, Layout};
use crate::error::ExitError;
use crate::submission::submit;

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Workspace holding the artifacts to snapshot
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    pub workspace: PathBuf,
    /// Submissions directory (default: <workspace>/submissions)
    #[arg(long)]
    pub submissions_dir: Option<PathBuf>,
    /// Free-form note stored with the version entry
    #[arg(long)]
    pub note: Option<String>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl SubmitArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let format = OutputFormat::resolve(self.format);
        if !self.workspace.is_dir() {
            return Err(ExitError::Validation(format!(
                "workspace {} does not exist",
                self.workspace.display()
            ))
            .into());
        }
        let bundle = ArtifactBundle::inspect(&self.workspace, Layout::Workspace);
        if bundle.is_empty() {
            tracing::warn!(workspace = %self.workspace.display(), "submitting a snapshot with no artifacts");
        }
        let dir = self
            .submissions_dir
            .clone()
            .unwrap_or_else(|| self.workspace.join(Category::Submissions.rel_path(Layout::Workspace)));

        let entry = submit(&bundle, &dir, self.note.as_deref())?;
        match format {
            OutputFormat::Pretty => {
                println!("Submitted version {} -> {}", entry.version, dir.join(&entry.directory).display());
                let flags = [
                    ("experiments", entry.has_experiments),
                    ("figures", entry.has_figures),
                    ("paper.pdf", entry.has_pdf),
                    ("paper.tex", entry.has_tex),
                    ("references.bib", entry.has_bib),
                    ("review.json", entry.has_review),
                ];
                for (name, present) in flags {
                    println!("  {} {name}", if present { "✓" } else { "✗" });
                }
            }
            OutputFormat::Text => println!("version  {}  dir={}", entry.version, entry.directory),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entry)?),
        }
        Ok(())
    }
}
