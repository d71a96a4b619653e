use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn scirun(project: &Path) -> Command {
    let mut cmd = Command::cargo_bin("scirun").unwrap();
    cmd.current_dir(project)
        .env_remove("SCIRUN_CONFIG")
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
        .env("XDG_CONFIG_HOME", project.join(".xdg"));
    cmd
}

fn write_idea(project: &Path) -> std::path::PathBuf {
    let path = project.join("idea_grokking.json");
    fs::write(&path, r#"{"Name": "grokking", "Title": "Why do nets grok?"}"#).unwrap();
    path
}

fn write_complete_sink(root: &Path) {
    fs::create_dir_all(root.join("experiment_codebase")).unwrap();
    fs::write(root.join("experiment_codebase/train.py"), "print('hi')\n").unwrap();
    fs::create_dir_all(root.join("figures")).unwrap();
    fs::write(root.join("figures/loss.png"), b"\x89PNG").unwrap();
    fs::write(root.join("paper.pdf"), b"%PDF-1.5").unwrap();
    fs::write(root.join("paper.tex"), "\\documentclass{article}").unwrap();
    fs::write(root.join("references.bib"), "@article{x}").unwrap();
    fs::write(root.join("review.json"), r#"{"overall": 6}"#).unwrap();
}

#[test]
fn launch_rejects_unknown_agent_type() {
    let dir = tempfile::tempdir().unwrap();
    let idea = write_idea(dir.path());
    scirun(dir.path())
        .arg("launch")
        .arg(&idea)
        .args(["--agent", "codex"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("Unsupported agent type: codex"));
}

#[test]
fn launch_rejects_missing_idea() {
    let dir = tempfile::tempdir().unwrap();
    scirun(dir.path())
        .args(["launch", "nope.json"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("idea file not found"));
}

#[test]
fn launch_rejects_interval_below_floor() {
    let dir = tempfile::tempdir().unwrap();
    let idea = write_idea(dir.path());
    scirun(dir.path())
        .arg("launch")
        .arg(&idea)
        .args(["--sync-interval", "10"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("below the minimum"));
}

#[test]
fn resume_failure_names_searched_path() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("old-job");
    fs::create_dir_all(empty.join("harbor-task__x")).unwrap();
    scirun(dir.path())
        .arg("resume")
        .arg(&empty)
        .assert()
        .code(65)
        .stderr(predicate::str::contains("no artifact bundle found under"))
        .stderr(predicate::str::contains("old-job"));
}

#[test]
fn resume_prefers_agent_sink() {
    let dir = tempfile::tempdir().unwrap();
    let trial = dir.path().join("job/harbor-task__x");
    write_complete_sink(&trial.join("agent/artifacts"));
    write_complete_sink(&trial.join("verifier/artifacts"));
    scirun(dir.path())
        .arg("resume")
        .arg(dir.path().join("job"))
        .args(["--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"candidate\": \"agent/artifacts\""));
}

#[test]
fn verify_writes_full_reward_for_complete_trial() {
    let dir = tempfile::tempdir().unwrap();
    let trial = dir.path().join("jobs/j/harbor-task__x");
    write_complete_sink(&trial.join("agent/artifacts"));
    scirun(dir.path())
        .arg("verify")
        .arg("--trial")
        .arg(&trial)
        .args(["--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reward  1  score=4/4"));
    assert_eq!(fs::read_to_string(trial.join("verifier/reward.txt")).unwrap(), "1");
    assert!(trial.join("verifier/verification.json").is_file());
}

#[test]
fn verify_truncates_partial_reward() {
    let dir = tempfile::tempdir().unwrap();
    let trial = dir.path().join("t");
    let sink = trial.join("agent/artifacts");
    write_complete_sink(&sink);
    fs::remove_file(sink.join("paper.pdf")).unwrap();
    fs::remove_file(sink.join("review.json")).unwrap();
    scirun(dir.path())
        .arg("verify")
        .arg("--trial")
        .arg(&trial)
        .args(["--format", "json"])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(trial.join("verifier/reward.txt")).unwrap(), "0.50");
}

#[test]
fn submit_assigns_increasing_versions() {
    let dir = tempfile::tempdir().unwrap();
    let ws = dir.path().join("app");
    fs::create_dir_all(ws.join("latex")).unwrap();
    fs::write(ws.join("latex/template.pdf"), b"%PDF").unwrap();

    for expected in ["version  1", "version  2"] {
        scirun(dir.path())
            .arg("submit")
            .arg("--workspace")
            .arg(&ws)
            .args(["--format", "text"])
            .assert()
            .success()
            .stdout(predicate::str::contains(expected));
    }
    let log: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(ws.join("submissions/version_log.json")).unwrap()).unwrap();
    assert_eq!(log["current_version"], 2);
}

#[test]
fn jobs_list_emits_json() {
    let dir = tempfile::tempdir().unwrap();
    let trial = dir.path().join("jobs/grokking__2026-01-01__00-00-00/harbor-task__x");
    write_complete_sink(&trial.join("agent/artifacts"));
    fs::create_dir_all(trial.join("verifier")).unwrap();
    fs::write(trial.join("verifier/reward.txt"), "1").unwrap();
    let activity = trial.join("agent/claude-code.txt");
    fs::write(&activity, "{}\n").unwrap();
    fs::File::options()
        .write(true)
        .open(&activity)
        .unwrap()
        .set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(3600))
        .unwrap();

    let out = scirun(dir.path())
        .args(["jobs", "list", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let jobs: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(jobs[0]["name"], "grokking__2026-01-01__00-00-00");
    assert_eq!(jobs[0]["idea_stem"], "grokking");
    assert_eq!(jobs[0]["reward"], "1");
    assert_eq!(jobs[0]["status"], "completed");
}

#[test]
fn jobs_show_unknown_job_fails() {
    let dir = tempfile::tempdir().unwrap();
    scirun(dir.path())
        .args(["jobs", "show", "missing"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("no job named missing"));
}

#[test]
fn init_then_schema() {
    let dir = tempfile::tempdir().unwrap();
    scirun(dir.path()).arg("init").assert().success();
    assert!(dir.path().join(".scirun.toml").is_file());
    scirun(dir.path()).arg("init").assert().code(2);
    scirun(dir.path())
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"base_timeout_sec\""));
}

#[cfg(unix)]
#[test]
fn launch_runs_runtime_and_writes_record() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let project = dir.path();
    let tpl = project.join("harbor-task");
    fs::create_dir_all(tpl.join("environment")).unwrap();
    fs::write(tpl.join("environment/Dockerfile.cpu"), "FROM python:3.12-slim\n").unwrap();
    fs::write(tpl.join("environment/Dockerfile.gpu"), "FROM nvidia/cuda:12.4.1-runtime\n").unwrap();
    fs::write(tpl.join("instruction.md"), "# Task\n\n{{IDEA}}\n{{RESUME_NOTE}}\n").unwrap();
    fs::write(tpl.join("task.toml"), "[agent]\ntimeout_sec = 7200.0\n").unwrap();

    let runtime = project.join("fake-harbor.sh");
    fs::write(&runtime, "#!/bin/sh\necho \"$@\" > \"$(dirname \"$0\")/argv.txt\"\n").unwrap();
    fs::set_permissions(&runtime, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(
        project.join(".scirun.toml"),
        format!(
            "[paths]\nstaging_dir = \"staging\"\n\n[runtime]\nprogram = \"{}\"\n",
            runtime.display()
        ),
    )
    .unwrap();
    let idea = write_idea(project);

    scirun(project)
        .arg("launch")
        .arg(&idea)
        .args(["--timeout", "3600", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("multiplier=0.5"));

    let argv = fs::read_to_string(project.join("argv.txt")).unwrap();
    assert!(argv.contains("--timeout-multiplier 0.5"));
    assert!(argv.contains("--job-name grokking__"));
    let staged: Vec<_> = fs::read_dir(project.join("staging")).unwrap().collect();
    assert!(staged.is_empty());
    let jobs: Vec<_> = fs::read_dir(project.join("jobs")).unwrap().filter_map(Result::ok).collect();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].path().join("scirun_launch.json").is_file());
}

#[cfg(unix)]
mod signals {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::process::{Child, Command};
    use std::time::{Duration, Instant};

    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    fn wait_for(path: &Path) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !path.exists() {
            assert!(Instant::now() < deadline, "{} never appeared", path.display());
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn terminate_and_wait(mut child: Child) -> Option<i32> {
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        kill(pid, Signal::SIGTERM).unwrap();
        child.wait().unwrap().code()
    }

    fn scirun(project: &Path) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin("scirun"));
        cmd.current_dir(project)
            .env_remove("SCIRUN_CONFIG")
            .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
            .env("XDG_CONFIG_HOME", project.join(".xdg"))
            .env("CLAUDE_CONFIG_DIR", project.join("claude"));
        cmd
    }

    #[test]
    fn sandbox_syncs_before_exiting_on_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("app");
        fs::create_dir_all(&ws).unwrap();
        let sink = dir.path().join("sink");
        let script = format!(
            "echo '{{\"overall\": 5}}' > {ws}/review.json; touch {ws}/started; exec sleep 30",
            ws = ws.display()
        );

        let child = scirun(dir.path())
            .args(["sandbox", "--interval", "3600", "--workspace"])
            .arg(&ws)
            .arg("--sink")
            .arg(&sink)
            .args(["--", "sh", "-c", script.as_str()])
            .spawn()
            .unwrap();
        wait_for(&ws.join("started"));

        assert_eq!(terminate_and_wait(child), Some(143));
        assert!(fs::read_to_string(sink.join("review.json")).unwrap().contains("overall"));
    }

    #[test]
    fn launch_removes_staged_context_on_sigterm() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path();
        let tpl = project.join("harbor-task");
        fs::create_dir_all(tpl.join("environment")).unwrap();
        fs::write(tpl.join("environment/Dockerfile.cpu"), "FROM python:3.12-slim\n").unwrap();
        fs::write(tpl.join("environment/Dockerfile.gpu"), "FROM nvidia/cuda:12.4.1-runtime\n").unwrap();
        fs::write(tpl.join("instruction.md"), "# Task\n\n{{IDEA}}\n").unwrap();
        fs::write(tpl.join("task.toml"), "[agent]\ntimeout_sec = 7200.0\n").unwrap();

        let runtime = project.join("slow-harbor.sh");
        fs::write(&runtime, "#!/bin/sh\ntouch \"$(dirname \"$0\")/started\"\nexec sleep 30\n").unwrap();
        fs::set_permissions(&runtime, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(
            project.join(".scirun.toml"),
            format!(
                "[paths]\nstaging_dir = \"staging\"\n\n[runtime]\nprogram = \"{}\"\n",
                runtime.display()
            ),
        )
        .unwrap();
        let idea = super::write_idea(project);

        let child = scirun(project).arg("launch").arg(&idea).spawn().unwrap();
        wait_for(&project.join("started"));
        assert_eq!(fs::read_dir(project.join("staging")).unwrap().count(), 1);

        assert_eq!(terminate_and_wait(child), Some(143));
        assert_eq!(fs::read_dir(project.join("staging")).unwrap().count(), 0);
    }
}
