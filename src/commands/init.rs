use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::project_root;
use crate::adapters;
use crate::config::{CONFIG_TOML, Config};
use crate::error::ExitError;
use crate::job::EnvironmentKind;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Task template directory
    #[arg(long)]
    pub template_dir: Option<PathBuf>,
    /// Jobs output directory
    #[arg(long)]
    pub jobs_dir: Option<PathBuf>,
    /// Default sandbox environment
    #[arg(long = "env", value_enum)]
    pub environment: Option<EnvironmentKind>,
    /// Default model
    #[arg(long)]
    pub model: Option<String>,
    /// Force overwrite existing config
    #[arg(long)]
    pub force: bool,
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl InitArgs {
    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(dir) = &self.template_dir {
            config.paths.template_dir.clone_from(dir);
        }
        if let Some(dir) = &self.jobs_dir {
            config.paths.jobs_dir.clone_from(dir);
        }
        if let Some(env) = self.environment {
            config.runtime.environment = env;
        }
        if let Some(model) = &self.model {
            config.runtime.model.clone_from(model);
        }
        config
    }

    pub fn execute(&self) -> anyhow::Result<()> {
        let root = project_root(self.project_root.as_ref())?;
        let path = root.join(CONFIG_TOML);
        let adapter = adapters::adapter_path(&root);
        if !self.force
            && let Some(existing) = [&path, &adapter].into_iter().find(|p| p.exists())
        {
            return Err(ExitError::Config(format!(
                "{} already exists (use --force to overwrite)",
                existing.display()
            ))
            .into());
        }

        let config = self.config();
        let contents = config.to_toml()?;
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote config");
        println!("Wrote {}", path.display());

        let module = adapters::render(config.sync.interval_sec)?;
        fs::write(&adapter, module).with_context(|| format!("writing {}", adapter.display()))?;
        tracing::info!(path = %adapter.display(), "wrote agent adapters");
        println!("Wrote {}", adapter.display());
        Ok(())
    }
}
