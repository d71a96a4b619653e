//! Per-job build context staging.
//!
//! The template directory is only ever read. Each job gets a fresh directory
//! under the staging root holding a dereferenced copy of the template, the
//! previous-artifacts subtree, one container recipe and the compiled
//! instruction. The returned [`StagedContext`] owns that directory and removes
//! it when dropped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::artifacts::fsops;
use crate::error::ExitError;
use crate::idea::Idea;
use crate::resume::ResumeSource;
use crate::template::compile_instruction;

pub const INSTRUCTION_FILE: &str = "instruction.md";
pub const TASK_CONFIG_FILE: &str = "task.toml";
pub const RECIPE_DIR: &str = "environment";
pub const RECIPE_FILE: &str = "Dockerfile";
pub const PREVIOUS_ARTIFACTS_DIR: &str = "environment/previous_artifacts";
pub const SENTINEL_FILE: &str = ".keep";

const MAX_NAME_ATTEMPTS: usize = 16;

/// Container recipe variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeVariant {
    Cpu,
    Gpu,
}

impl RecipeVariant {
    pub const fn for_gpus(gpus: u32) -> Self {
        if gpus > 0 { RecipeVariant::Gpu } else { RecipeVariant::Cpu }
    }

    pub const fn file_name(self) -> &'static str {
        match self {
            RecipeVariant::Cpu => "Dockerfile.cpu",
            RecipeVariant::Gpu => "Dockerfile.gpu",
        }
    }

    pub fn source_in(self, template_dir: &Path) -> PathBuf {
        template_dir.join(RECIPE_DIR).join(self.file_name())
    }
}

/// Inputs for one staging run.
#[derive(Debug)]
pub struct StageRequest<'a> {
    pub template_dir: &'a Path,
    /// Parent of the staged directory
    pub staging_root: &'a Path,
    pub idea: &'a Idea,
    pub gpus: u32,
    pub resume: Option<&'a ResumeSource>,
    pub feedback: Option<&'a str>,
}

/// An exclusively owned build context. Dropping it deletes the directory.
#[derive(Debug)]
pub struct StagedContext {
    dir: PathBuf,
    recipe: RecipeVariant,
    resumed: bool,
}

impl StagedContext {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub const fn recipe(&self) -> RecipeVariant {
        self.recipe
    }

    pub const fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn previous_artifacts(&self) -> PathBuf {
        self.dir.join(PREVIOUS_ARTIFACTS_DIR)
    }

    pub fn task_config(&self) -> PathBuf {
        self.dir.join(TASK_CONFIG_FILE)
    }

    /// `[agent] timeout_sec` from the staged task config, if declared.
    /// Fractional seconds are truncated.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn agent_timeout_sec(&self) -> Option<u64> {
        let raw = fs::read_to_string(self.task_config()).ok()?;
        let doc: toml::Table = raw.parse().ok()?;
        let value = doc.get("agent")?.get("timeout_sec")?;
        value
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .or_else(|| value.as_float().filter(|f| *f > 0.0).map(|f| f as u64))
            .filter(|v| *v > 0)
    }
}

impl Drop for StagedContext {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => tracing::debug!(dir = %self.dir.display(), "removed staged context"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove staged context");
            }
        }
    }
}

/// Lowercase, filesystem- and image-name-safe fragment of an idea stem.
fn name_fragment(stem: &str) -> String {
    let mut out: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    out.truncate(40);
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() { "job".into() } else { trimmed.to_string() }
}

/// Create a fresh directory under `root`. `create_dir` fails on an existing
/// path, so two jobs can never share one.
fn allocate_dir(root: &Path, stem: &str) -> anyhow::Result<PathBuf> {
    fsops::ensure_dir(root)?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let fragment = name_fragment(stem);
    for _ in 0..MAX_NAME_ATTEMPTS {
        let suffix: u32 = rand::random();
        let dir = root.join(format!("scirun-{fragment}-{stamp}-{suffix:08x}"));
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("creating {}", dir.display())),
        }
    }
    Err(ExitError::Staging(format!(
        "could not allocate a unique staging directory under {}",
        root.display()
    ))
    .into())
}

/// Build the staged context for one job.
pub fn stage(req: &StageRequest<'_>) -> anyhow::Result<StagedContext> {
    let _span = tracing::info_span!("stage", idea = %req.idea.stem, gpus = req.gpus).entered();

    if !req.template_dir.is_dir() {
        return Err(ExitError::Staging(format!(
            "template directory not found: {}",
            req.template_dir.display()
        ))
        .into());
    }
    let recipe = RecipeVariant::for_gpus(req.gpus);
    let recipe_src = recipe.source_in(req.template_dir);
    if !recipe_src.is_file() {
        return Err(ExitError::Staging(format!(
            "missing {recipe:?} recipe variant: {}",
            recipe_src.display()
        ))
        .into());
    }
    if !req.template_dir.join(INSTRUCTION_FILE).is_file() {
        return Err(ExitError::Staging(format!(
            "template has no {INSTRUCTION_FILE}: {}",
            req.template_dir.display()
        ))
        .into());
    }

    let ctx = StagedContext {
        dir: allocate_dir(req.staging_root, &req.idea.stem)?,
        recipe,
        resumed: req.resume.is_some(),
    };
    tracing::info!(dir = %ctx.dir.display(), "staging build context");

    let copied = fsops::copy_tree(req.template_dir, &ctx.dir)
        .map_err(|e| ExitError::Staging(format!("copying template: {e:#}")))?;
    tracing::debug!(files = copied, "template copied");

    let previous = ctx.previous_artifacts();
    fsops::ensure_dir(&previous)?;
    fs::write(previous.join(SENTINEL_FILE), "")
        .with_context(|| format!("writing sentinel in {}", previous.display()))?;

    if let Some(source) = req.resume {
        fs::remove_file(previous.join(SENTINEL_FILE)).ok();
        let n = fsops::copy_tree(source.bundle_dir(), &previous)
            .map_err(|e| ExitError::Staging(format!("merging resume bundle: {e:#}")))?;
        tracing::info!(files = n, from = %source.bundle_dir().display(), "merged previous artifacts");
    }

    materialize_recipe(&ctx.dir, recipe)?;
    set_task_gpus(&ctx.task_config(), req.gpus)?;

    let instruction_path = ctx.dir.join(INSTRUCTION_FILE);
    let template = fs::read_to_string(&instruction_path)
        .with_context(|| format!("reading {}", instruction_path.display()))?;
    let instruction = compile_instruction(&template, &req.idea.content, req.resume, req.feedback)?;
    fs::write(&instruction_path, instruction)
        .with_context(|| format!("writing {}", instruction_path.display()))?;

    Ok(ctx)
}

/// Copy the chosen variant to `environment/Dockerfile` and drop both
/// variants, leaving exactly one recipe in the context.
fn materialize_recipe(dir: &Path, recipe: RecipeVariant) -> anyhow::Result<()> {
    let env_dir = dir.join(RECIPE_DIR);
    let chosen = env_dir.join(recipe.file_name());
    fs::copy(&chosen, env_dir.join(RECIPE_FILE))
        .with_context(|| format!("materializing {}", chosen.display()))?;
    for variant in [RecipeVariant::Cpu, RecipeVariant::Gpu] {
        fsops::remove_path(&env_dir.join(variant.file_name()))?;
    }
    Ok(())
}

/// Write `[environment] gpus` into the staged task config, keeping its comments.
fn set_task_gpus(task_config: &Path, gpus: u32) -> anyhow::Result<()> {
    if !task_config.is_file() {
        tracing::debug!(path = %task_config.display(), "no task config to annotate");
        return Ok(());
    }
    let raw = fs::read_to_string(task_config)
        .with_context(|| format!("reading {}", task_config.display()))?;
    let mut doc: toml_edit::DocumentMut = raw
        .parse()
        .map_err(|e| ExitError::Staging(format!("invalid {}: {e}", task_config.display())))?;
    if !doc.contains_table("environment") {
        doc["environment"] = toml_edit::table();
    }
    doc["environment"]["gpus"] = toml_edit::value(i64::from(gpus));
    fs::write(task_config, doc.to_string())
        .with_context(|| format!("writing {}", task_config.display()))?;
    Ok(())
}

/// Content hash of a directory tree (relative paths plus file bytes).
pub fn tree_fingerprint(root: &Path) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    let mut entries: Vec<_> = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .collect::<Result<_, _>>()
        .with_context(|| format!("walking {}", root.display()))?;
    entries.retain(|e| e.file_type().is_file());
    for entry in entries {
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0]);
        let bytes = fs::read(entry.path())
            .with_context(|| format!("reading {}", entry.path().display()))?;
        hasher.update(&bytes);
        hasher.update([0]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs;
    use std::path::Path;

    /// A minimal task template with both recipe variants.
    pub fn write_template(root: &Path) {
        fs::create_dir_all(root.join("environment")).unwrap();
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("environment/Dockerfile.cpu"), "FROM python:3.12-slim\n").unwrap();
        fs::write(root.join("environment/Dockerfile.gpu"), "FROM nvidia/cuda:12.4.1-runtime\n").unwrap();
        fs::write(
            root.join("instruction.md"),
            "# Research task\n\n{{IDEA}}\n\n{{RESUME_NOTE}}\n{{FEEDBACK}}\n",
        )
        .unwrap();
        fs::write(
            root.join("task.toml"),
            "version = \"1.0\"\n\n[agent]\n# agent budget\ntimeout_sec = 7200.0\n\n[environment]\nmemory = \"32G\"\n",
        )
        .unwrap();
        fs::write(root.join("tests/test.sh"), "#!/bin/sh\nscirun verify\n").unwrap();
    }
}
