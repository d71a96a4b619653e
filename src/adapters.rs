//! Runtime agent adapters.
//!
//! The orchestration runtime loads agents by Python import path. `scirun init`
//! writes one module with a class per [`AgentKind`]; each class runs the
//! stock agent's command under `scirun sandbox`, which is what brings the
//! artifact sync daemon into the sandbox. `launch` puts the project root on
//! `PYTHONPATH` so the runtime can import it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use minijinja::{Environment, context};
use serde::Serialize;

use crate::job::{ADAPTER_MODULE, AgentKind, MIN_SYNC_INTERVAL_SEC};
use crate::subprocess::Tool;

const ADAPTER_TEMPLATE: &str = include_str!("templates/scirun_agents.py.jinja");

#[derive(Serialize)]
struct AdapterClass {
    kind: &'static str,
    class_name: &'static str,
    base_module: &'static str,
    base_class: &'static str,
}

/// `<root>/scirun_agents.py`
pub fn adapter_path(root: &Path) -> PathBuf {
    root.join(format!("{ADAPTER_MODULE}.py"))
}

/// Python source of the adapter module.
pub fn render(default_interval_sec: u64) -> anyhow::Result<String> {
    let agents: Vec<AdapterClass> = AgentKind::ALL
        .iter()
        .map(|kind| {
            let (base_module, base_class) = kind.runtime_class();
            AdapterClass {
                kind: kind.as_str(),
                class_name: kind.adapter_class(),
                base_module,
                base_class,
            }
        })
        .collect();
    let mut env = Environment::new();
    env.add_template("adapters", ADAPTER_TEMPLATE)?;
    let rendered = env.get_template("adapters")?.render(context! {
        agents => agents,
        min_interval => MIN_SYNC_INTERVAL_SEC,
        default_interval => default_interval_sec.max(MIN_SYNC_INTERVAL_SEC),
    })?;
    Ok(rendered)
}

/// `root` prepended to any inherited `PYTHONPATH`.
pub fn python_path(root: &Path) -> anyhow::Result<OsString> {
    let inherited = std::env::var_os("PYTHONPATH");
    let paths = std::iter::once(root.to_path_buf())
        .chain(inherited.iter().flat_map(std::env::split_paths));
    Ok(std::env::join_paths(paths)?)
}

/// Whether `python` can locate the adapter module from `root`. Uses
/// `find_spec`, so the runtime itself need not be installed.
pub fn check_importable(python: &str, root: &Path) -> Result<(), String> {
    if !adapter_path(root).is_file() {
        return Err(format!(
            "agent adapter module missing: {} (run `scirun init --force`)",
            adapter_path(root).display()
        ));
    }
    let script = format!(
        "import importlib.util, sys; sys.exit(0 if importlib.util.find_spec('{ADAPTER_MODULE}') else 1)"
    );
    let pythonpath = python_path(root).map_err(|e| e.to_string())?;
    let output = Tool::new(python)
        .args(&["-c", script.as_str()])
        .env("PYTHONPATH", &pythonpath)
        .current_dir(root)
        .run()
        .map_err(|e| format!("{e:#}"))?;
    if output.success() {
        Ok(())
    } else {
        Err(format!("{python} cannot import {ADAPTER_MODULE} from {}", root.display()))
    }
}
