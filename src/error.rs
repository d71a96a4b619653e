use std::path::PathBuf;
use std::process::ExitCode;

/// Errors that cause scirun to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("no artifact bundle found under {searched}: tried {tried}")]
    ResumeNotFound { searched: PathBuf, tried: String },

    #[error("staging failed: {0}")]
    Staging(String),

    #[error("{path} is locked by another writer")]
    Locked { path: PathBuf },

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("{message}")]
    WithCode { code: u8, message: String },

    /// A termination signal stopped the command after its cleanup ran.
    #[error("{what} interrupted by a termination signal")]
    Interrupted { what: String },
}

impl ExitError {
    pub fn new(code: u8, message: String) -> Self {
        ExitError::WithCode { code, message }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::ToolNotFound { .. } => ExitCode::from(3),
            ExitError::ToolFailed { .. } => ExitCode::from(4),
            ExitError::Timeout { .. } => ExitCode::from(5),
            ExitError::Validation(_) => ExitCode::from(64),
            ExitError::ResumeNotFound { .. } => ExitCode::from(65),
            ExitError::Staging(_) => ExitCode::from(66),
            ExitError::Locked { .. } => ExitCode::from(75),
            ExitError::WithCode { code, .. } => ExitCode::from(*code),
            ExitError::Interrupted { .. } => ExitCode::from(143),
        }
    }
}
