// crates/core/src/lib.rs
pub mod buffer;
pub mod codec;
pub mod error;
pub mod jobs;
pub mod publisher;

pub use buffer::{LineBuffer, Subscription, DEFAULT_CAPACITY};
pub use codec::OutputLineCodec;
pub use error::*;
pub use jobs::{
    JobSnapshot, JobSpec, JobStatus, JobSupervisor, StopOutcome, SupervisorConfig, SupervisorStatus,
};
pub use publisher::{StreamEvent, StreamPublisher, POLL_INTERVAL};
