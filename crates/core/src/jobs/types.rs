// crates/core/src/jobs/types.rs
//! Types for the job supervisor.

use std::time::Duration;

use serde::Serialize;

/// Generation identifier. Strictly increasing across the life of a supervisor.
pub type JobId = u64;

/// Lines the supervisor writes into the buffer on its own behalf.
pub const MSG_COMPLETED: &str = "Download completed successfully";
pub const MSG_STOPPED: &str = "Download stopped";
pub const MSG_TIMED_OUT: &str = "Error: Command timed out";

pub fn failed_message(exit_code: i32) -> String {
    format!("Error: Download failed (exit {exit_code})")
}

/// What to run: program, arguments, and an optional wall-clock limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub program: String,
    pub args: Vec<String>,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl JobSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    /// Set the limit in seconds; `0` means unbounded.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    /// Program followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Lifecycle position of a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Running,
    Completed,
    Failed,
    TimedOut,
    Terminated,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Starting | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Terminated => "terminated",
        }
    }
}

/// Why a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    Failed { exit_code: i32 },
    TimedOut,
    Superseded,
    Stopped,
    Shutdown,
    Error { message: String },
}

/// Reasons another party can ask a running job to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A new start request replaced the job.
    Superseded,
    /// Explicit stop request.
    Stopped,
    /// The server is going away.
    Shutdown,
}

impl From<StopReason> for TerminationReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Superseded => Self::Superseded,
            StopReason::Stopped => Self::Stopped,
            StopReason::Shutdown => Self::Shutdown,
        }
    }
}

/// Result of [`JobSupervisor::stop`](super::JobSupervisor::stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Point-in-time view of a job, served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub command: Vec<String>,
    pub pid: Option<u32>,
    pub status: JobStatus,
    pub reason: Option<TerminationReason>,
    pub timeout_secs: u64,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// What the supervisor is doing, plus buffer occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    /// Running job, else the most recent one, else `None`.
    pub job: Option<JobSnapshot>,
    pub buffered: usize,
    pub capacity: usize,
}
