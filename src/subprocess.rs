//! Child processes: short captured probes (`docker info`, `--version`) and
//! long supervised runs (the orchestration runtime, the in-sandbox agent).

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::error::ExitError;
use crate::interrupt;

const POLL: Duration = Duration::from_millis(50);

/// Captured result of a short-lived tool.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One external program invocation.
pub struct Tool {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, OsString)>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Tool {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<S: AsRef<str>>(mut self, args: &[S]) -> Self {
        self.args.extend(args.iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<OsStr>) -> Self {
        self.envs.push((key.to_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Kill the tool if it has not exited after `duration` (captured runs only).
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    fn spawn_with(&self, stdio: fn() -> Stdio) -> anyhow::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(stdio())
            .stderr(stdio());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExitError::ToolNotFound { tool: self.program.clone() }.into()
            } else {
                anyhow::Error::new(e).context(format!("spawning {}", self.program))
            }
        })
    }

    /// Start the tool with the terminal's stdio, for runs whose output
    /// belongs to the user. Pair with [`wait_or_interrupt`].
    pub fn spawn(&self) -> anyhow::Result<Child> {
        self.spawn_with(Stdio::inherit)
    }

    /// Run to completion, capturing output.
    pub fn run(&self) -> anyhow::Result<RunOutput> {
        let mut child = self.spawn_with(Stdio::piped)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("waiting for {}", self.program))?
            {
                break status;
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExitError::Timeout {
                    tool: self.program.clone(),
                    timeout_secs: self.timeout.map_or(0, |t| t.as_secs()),
                }
                .into());
            }
            std::thread::sleep(POLL);
        };

        Ok(RunOutput {
            stdout: joined(stdout),
            stderr: joined(stderr),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

/// Read a pipe to the end on its own thread so a chatty child cannot block
/// on a full pipe while we poll it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut r| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf);
            buf
        })
    })
}

fn joined(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Wait for `child`, returning `None` as soon as a termination signal is
/// raised. The child is left running in that case so the caller can order
/// its own teardown before [`stop`].
pub fn wait_or_interrupt(child: &mut Child, poll: Duration) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if interrupt::raised() {
            return Ok(None);
        }
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        std::thread::sleep(poll);
    }
}

/// SIGTERM, then SIGKILL once `grace` runs out. Returns the final status.
pub fn stop(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    terminate(child);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        std::thread::sleep(POLL);
    }
    tracing::warn!(pid = child.id(), "child ignored SIGTERM; killing");
    let _ = child.kill();
    child.wait()
}

#[cfg(unix)]
fn terminate(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match i32::try_from(child.id()) {
        Ok(pid) => {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::debug!(pid, error = %e, "SIGTERM failed");
            }
        }
        Err(_) => tracing::debug!(pid = child.id(), "pid out of range for SIGTERM"),
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

/// Whether `program` resolves to an executable on PATH (or is a path that exists).
pub fn on_path(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
    })
}
