//! Idea files: the research task description handed to the agent.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::Value;

use crate::error::ExitError;

/// A loaded idea file.
#[derive(Debug, Clone)]
pub struct Idea {
    pub path: PathBuf,
    /// File name stem with any `idea_` prefix removed, used in job names.
    pub stem: String,
    /// The idea's `Name` field, when present.
    pub name: Option<String>,
    /// Pretty-printed JSON (or raw text for non-JSON ideas), as inserted into
    /// the instruction.
    pub content: String,
}

impl Idea {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Err(ExitError::Validation(format!("idea file not found: {}", path.display())).into());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading idea file {}", path.display()))?;

        let (name, content) = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                let name = value
                    .get("Name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                let pretty = serde_json::to_string_pretty(&value)
                    .context("re-serializing idea JSON")?;
                (name, pretty)
            }
            Err(_) if path.extension().is_some_and(|e| e == "json") => {
                return Err(ExitError::Validation(format!(
                    "idea file {} is not valid JSON",
                    path.display()
                ))
                .into());
            }
            Err(_) => (None, raw.trim().to_string()),
        };

        if content.trim().is_empty() {
            return Err(ExitError::Validation(format!("idea file {} is empty", path.display())).into());
        }

        Ok(Self {
            path: path.to_path_buf(),
            stem: idea_stem(path),
            name,
            content,
        })
    }
}

/// `ideas/idea_grokking.json` -> `grokking`.
pub fn idea_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem.strip_prefix("idea_").unwrap_or(&stem);
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "idea".to_string() } else { cleaned }
}

/// Candidate idea files for a stem, in lookup order.
pub fn idea_path_candidates(project_root: &Path, ideas_dir: &Path, stem: &str) -> Vec<PathBuf> {
    vec![
        project_root.join(format!("idea_{stem}.json")),
        ideas_dir.join(format!("idea_{stem}.json")),
        project_root.join(format!("{stem}.json")),
        ideas_dir.join(format!("{stem}.json")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_json_idea() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idea_grokking.json");
        std::fs::write(&path, r#"{"Name": "grokking", "Title": "Why do nets grok?"}"#).unwrap();

        let idea = Idea::load(&path).unwrap();
        assert_eq!(idea.stem, "grokking");
        assert_eq!(idea.name.as_deref(), Some("grokking"));
        assert!(idea.content.contains("\"Title\": \"Why do nets grok?\""));
    }

    #[test]
    fn missing_idea_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Idea::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExitError>(),
            Some(ExitError::Validation(_))
        ));
    }

    #[test]
    fn malformed_json_idea_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Idea::load(&path).is_err());
    }

    #[test]
    fn markdown_idea_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse attention.md");
        std::fs::write(&path, "# Sparse attention\nTry it.\n").unwrap();
        let idea = Idea::load(&path).unwrap();
        assert_eq!(idea.stem, "sparse_attention");
        assert_eq!(idea.content, "# Sparse attention\nTry it.");
        assert!(idea.name.is_none());
    }
}
