pub mod doctor;
pub mod init;
pub mod jobs;
pub mod launch;
pub mod resume;
pub mod sandbox;
pub mod schema;
pub mod submit;
pub mod verify;

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

impl OutputFormat {
    /// Explicit choice, else pretty on a terminal and text when piped.
    pub fn resolve(choice: Option<Self>) -> Self {
        choice.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                OutputFormat::Pretty
            } else {
                OutputFormat::Text
            }
        })
    }
}

pub(crate) fn project_root(arg: Option<&PathBuf>) -> anyhow::Result<PathBuf> {
    match arg {
        Some(p) => Ok(p.clone()),
        None => std::env::current_dir().context("could not determine current directory"),
    }
}
