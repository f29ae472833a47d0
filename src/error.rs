use std::io;

use thiserror::Error;

/// Failures that stop a running pipeline.
///
/// Every variant is fatal: the executor logs it and returns, and the
/// binaries map it to exit status 1.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required tool '{tool}' is not available: {hint}")]
    MissingPrerequisite { tool: String, hint: String },

    #[error("command `{command}` failed with exit code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    /// Exit code reported by the failing subprocess, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PipelineError::CommandFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}
