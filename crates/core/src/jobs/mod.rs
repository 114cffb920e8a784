// crates/core/src/jobs/mod.rs
//! Single-job supervision for the download command.
//!
//! Provides:
//! - `JobSupervisor` - start, stop and supersede the one running process
//! - `JobRecord` - shared lifecycle state of a job
//! - `JobSpec` / `JobSnapshot` - what to run, and what it looks like now
//! - `process` - group spawning, merged output, and the TERM/KILL protocol

mod process;
pub mod state;
pub mod supervisor;
pub mod types;

pub use state::JobRecord;
pub use supervisor::{JobSupervisor, SupervisorConfig};
pub use types::{
    failed_message, JobId, JobSnapshot, JobSpec, JobStatus, StopOutcome, StopReason,
    SupervisorStatus, TerminationReason, MSG_COMPLETED, MSG_STOPPED, MSG_TIMED_OUT,
};
