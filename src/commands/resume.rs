use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use super::OutputFormat;
use crate::resume::{PresentItem, resolve};
use crate::template::render_resume_note;

#[derive(Debug, Args)]
pub struct ResumeArgs {
    /// Previous job or trial directory
    pub path: PathBuf,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize)]
struct ResumeReport {
    bundle: PathBuf,
    candidate: &'static str,
    trial: Option<PathBuf>,
    items: Vec<PresentItem>,
    note: String,
}

impl ResumeArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let format = OutputFormat::resolve(self.format);
        let source = resolve(&self.path)?;
        let report = ResumeReport {
            bundle: source.bundle_dir().to_path_buf(),
            candidate: source.candidate,
            trial: source.trial.clone(),
            items: source.present_items(),
            note: render_resume_note(&source)?,
        };

        match format {
            OutputFormat::Pretty => {
                println!("Bundle: {} ({})", report.bundle.display(), report.candidate);
                println!();
                print!("{}", report.note);
            }
            OutputFormat::Text => {
                println!("bundle  {}  candidate={}", report.bundle.display(), report.candidate);
                for item in &report.items {
                    println!("item  {}  files={}", item.path, item.files);
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }
        Ok(())
    }
}
