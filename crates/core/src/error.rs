// crates/core/src/error.rs
use thiserror::Error;

/// Errors raised synchronously while launching a job.
///
/// Everything that goes wrong after the process is running is reported through
/// the line buffer instead.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up output pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("job spec has an empty program")]
    EmptyProgram,
}

impl SupervisorError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}
