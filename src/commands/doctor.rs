use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};

use super::{OutputFormat, project_root};
use crate::adapters;
use crate::config::{Config, find_config_in_project};
use crate::job::AgentKind;
use crate::stage::{INSTRUCTION_FILE, RecipeVariant, TASK_CONFIG_FILE};
use crate::subprocess::{Tool, on_path};

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Project root directory
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorReport {
    pub config: ConfigStatus,
    pub tools: Vec<ToolStatus>,
    pub template_files: Vec<FileStatus>,
    pub adapters: AdapterStatus,
    pub issues: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub path: String,
    /// False when every agent has an `import_path` override.
    pub needed: bool,
    pub importable: bool,
}

/// Interpreter used to check that the runtime can import the adapters.
const PYTHON: &str = "python3";

/// Check the generated adapter module, unless every agent is overridden.
fn check_adapters(config: &Config) -> (AdapterStatus, Option<String>) {
    let needed = AgentKind::ALL.iter().any(|kind| {
        config
            .agent_override(*kind)
            .and_then(|o| o.import_path.as_ref())
            .is_none()
    });
    let path = adapters::adapter_path(&config.root).display().to_string();
    if !needed {
        return (AdapterStatus { path, needed, importable: false }, None);
    }
    match adapters::check_importable(PYTHON, &config.root) {
        Ok(()) => (AdapterStatus { path, needed, importable: true }, None),
        Err(issue) => (AdapterStatus { path, needed, importable: false }, Some(issue)),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigStatus {
    pub path: Option<String>,
    pub template_dir: String,
    pub jobs_dir: String,
    pub runtime: String,
    pub environment: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolStatus {
    pub name: String,
    pub version: Option<String>,
    pub present: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: String,
    pub exists: bool,
}

fn probe_tool(name: &str) -> ToolStatus {
    if !on_path(name) {
        return ToolStatus { name: name.to_string(), version: None, present: false };
    }
    let version = Tool::new(name)
        .arg("--version")
        .run()
        .ok()
        .filter(|o| o.success())
        .and_then(|o| o.stdout.lines().next().map(|l| l.trim().to_string()));
    ToolStatus { name: name.to_string(), version, present: true }
}

impl DoctorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = project_root(self.project_root.as_ref())?;
        let format = OutputFormat::resolve(self.format);
        let mut issues = Vec::new();

        let config = match Config::discover(&root) {
            Ok(config) => config,
            Err(e) => {
                issues.push(format!("{e:#}"));
                Config { root: root.clone(), ..Config::default() }
            }
        };

        let template_dir = config.template_dir();
        let mut template_files = Vec::new();
        let expected = [
            RecipeVariant::Cpu.source_in(&template_dir),
            RecipeVariant::Gpu.source_in(&template_dir),
            template_dir.join(INSTRUCTION_FILE),
            template_dir.join(TASK_CONFIG_FILE),
        ];
        for path in expected {
            let exists = path.is_file();
            let rel = path.strip_prefix(&root).unwrap_or(&path).display().to_string();
            if !exists {
                issues.push(format!("template file missing: {rel}"));
            }
            template_files.push(FileStatus { path: rel, exists });
        }

        let mut tools = Vec::new();
        for name in [config.runtime.program.as_str(), "docker"] {
            let status = probe_tool(name);
            if !status.present {
                issues.push(format!("Tool not found: {name}"));
            }
            tools.push(status);
        }

        let (adapters, adapter_issue) = check_adapters(&config);
        issues.extend(adapter_issue);

        let report = DoctorReport {
            config: ConfigStatus {
                path: find_config_in_project(&root).map(|p| p.display().to_string()),
                template_dir: template_dir.display().to_string(),
                jobs_dir: config.jobs_dir().display().to_string(),
                runtime: config.runtime.program.clone(),
                environment: config.runtime.environment.to_string(),
            },
            tools,
            template_files,
            adapters,
            issues,
        };

        match format {
            OutputFormat::Pretty => print_pretty(&report),
            OutputFormat::Text => print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }

        let issue_count = report.issues.len();
        if issue_count > 0 {
            return Err(crate::error::ExitError::new(
                u8::try_from(issue_count.min(125)).unwrap_or(125),
                format!("{issue_count} issue(s) found"),
            )
            .into());
        }
        Ok(())
    }
}

fn print_pretty(report: &DoctorReport) {
    println!("=== scirun doctor ===\n");
    println!("Config:    {}", report.config.path.as_deref().unwrap_or("(defaults)"));
    println!("Template:  {}", report.config.template_dir);
    println!("Jobs:      {}", report.config.jobs_dir);
    println!("Runtime:   {} ({})", report.config.runtime, report.config.environment);
    println!();

    println!("Tools:");
    for tool in &report.tools {
        if tool.present {
            println!("  ✓ {}: {}", tool.name, tool.version.as_deref().unwrap_or("OK"));
        } else {
            println!("  ✗ {}: NOT FOUND", tool.name);
        }
    }

    println!("\nTemplate Files:");
    for file in &report.template_files {
        println!("  {} {}", if file.exists { "✓" } else { "✗" }, file.path);
    }

    if report.adapters.needed {
        let mark = if report.adapters.importable { "✓" } else { "✗" };
        println!("\nAgent Adapters:\n  {mark} {}", report.adapters.path);
    }

    if report.issues.is_empty() {
        println!("\n✓ No issues found");
    } else {
        println!("\nIssues ({}):", report.issues.len());
        for issue in &report.issues {
            println!("  • {issue}");
        }
    }
}

fn print_text(report: &DoctorReport) {
    println!(
        "scirun-doctor  template={}  jobs={}  runtime={}",
        report.config.template_dir, report.config.jobs_dir, report.config.runtime
    );
    for tool in &report.tools {
        let status = if tool.present {
            format!("ok  {}", tool.version.as_deref().unwrap_or_default())
        } else {
            "missing".to_string()
        };
        println!("tool  {}  {status}", tool.name);
    }
    for file in &report.template_files {
        println!("file  {}  {}", file.path, if file.exists { "ok" } else { "missing" });
    }
    if report.adapters.needed {
        let state = if report.adapters.importable { "ok" } else { "missing" };
        println!("adapters  {}  {state}", report.adapters.path);
    }
    if !report.issues.is_empty() {
        println!("issues  count={}", report.issues.len());
        for issue in &report.issues {
            println!("issue  {issue}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentOverride;

    fn config(root: &std::path::Path) -> Config {
        Config { root: root.to_path_buf(), ..Config::default() }
    }

    #[test]
    fn missing_adapters_are_an_issue() {
        let dir = tempfile::tempdir().unwrap();
        let (status, issue) = check_adapters(&config(dir.path()));
        assert!(status.needed);
        assert!(!status.importable);
        assert!(issue.unwrap().contains("scirun init"));
    }

    #[test]
    fn overridden_agents_skip_the_adapter_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        let custom = |path: &str| AgentOverride { import_path: Some(path.into()), runtime_name: None };
        config.agents.claude_code = Some(custom("lab:Claude"));
        config.agents.gemini_cli = Some(custom("lab:Gemini"));
        let (status, issue) = check_adapters(&config);
        assert!(!status.needed);
        assert!(issue.is_none());
    }
}
