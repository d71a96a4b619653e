mod adapters;
mod artifacts;
mod commands;
mod config;
mod daemon;
mod error;
mod idea;
mod interrupt;
mod job;
mod launch;
mod resume;
mod stage;
mod submission;
mod subprocess;
mod telemetry;
mod template;
mod verifier;
mod viewer;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::doctor::DoctorArgs;
use commands::init::InitArgs;
use commands::jobs::JobsCommand;
use commands::launch::LaunchArgs;
use commands::resume::ResumeArgs;
use commands::sandbox::SandboxArgs;
use commands::submit::SubmitArgs;
use commands::verify::VerifyArgs;

#[derive(Debug, Parser)]
#[command(
    name = "scirun",
    version,
    about = "Launch, sync, verify and inspect autonomous research jobs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Stage a build context from an idea and run one job
    Launch(LaunchArgs),
    /// Run an agent command inside the sandbox with artifact sync
    Sandbox(SandboxArgs),
    /// Grade artifact completeness and write the reward
    Verify(VerifyArgs),
    /// Snapshot the workspace as the next submission version
    Submit(SubmitArgs),
    /// Resolve a resume reference and show what it would carry over
    Resume(ResumeArgs),
    /// Inspect job directories (read-only)
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
    /// Write a default .scirun.toml
    Init(InitArgs),
    /// Validate config, template and companion tools
    Doctor(DoctorArgs),
    /// Print the JSON Schema for .scirun.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Launch(_) => "launch",
            Self::Sandbox(_) => "sandbox",
            Self::Verify(_) => "verify",
            Self::Submit(_) => "submit",
            Self::Resume(_) => "resume",
            Self::Jobs { .. } => "jobs",
            Self::Init(_) => "init",
            Self::Doctor(_) => "doctor",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Launch(args) => args.execute(),
        Commands::Sandbox(args) => args.execute(),
        Commands::Verify(args) => args.execute(),
        Commands::Submit(args) => args.execute(),
        Commands::Resume(args) => args.execute(),
        Commands::Jobs { command } => command.execute(),
        Commands::Init(args) => args.execute(),
        Commands::Doctor(args) => args.execute(),
        Commands::Schema => commands::schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
