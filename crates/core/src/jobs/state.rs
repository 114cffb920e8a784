// crates/core/src/jobs/state.rs
//! Shared record of a single job's progress through its lifecycle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::types::{JobId, JobSnapshot, JobSpec, JobStatus, TerminationReason};

#[derive(Debug)]
struct Lifecycle {
    status: JobStatus,
    reason: Option<TerminationReason>,
    finished_at: Option<DateTime<Utc>>,
}

/// Everything the outside world may know about a job.
///
/// The process handle itself is not here: it belongs to the job's monitor
/// task. This record only carries the pid for display.
#[derive(Debug)]
pub struct JobRecord {
    id: JobId,
    command: Vec<String>,
    timeout_secs: u64,
    started_at: DateTime<Utc>,
    /// 0 until the process is spawned.
    pid: AtomicU32,
    lifecycle: RwLock<Lifecycle>,
}

impl JobRecord {
    pub fn new(id: JobId, spec: &JobSpec) -> Self {
        Self {
            id,
            command: spec.command_line(),
            timeout_secs: spec.timeout.map_or(0, |t| t.as_secs()),
            started_at: Utc::now(),
            pid: AtomicU32::new(0),
            lifecycle: RwLock::new(Lifecycle {
                status: JobStatus::Starting,
                reason: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Relaxed) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self.lifecycle.read() {
            Ok(guard) => guard.status,
            Err(e) => e.into_inner().status,
        }
    }

    /// Transition Starting -> Running once the process exists.
    pub fn set_running(&self, pid: u32) {
        self.pid.store(pid, Ordering::Relaxed);
        match self.lifecycle.write() {
            Ok(mut guard) => guard.status = JobStatus::Running,
            Err(e) => tracing::error!("RwLock poisoned writing job lifecycle: {e}"),
        }
    }

    /// Record the terminal state. Later calls are ignored.
    pub fn finish(&self, status: JobStatus, reason: TerminationReason) {
        debug_assert!(status.is_terminal());
        match self.lifecycle.write() {
            Ok(mut guard) => {
                if guard.status.is_terminal() {
                    return;
                }
                guard.status = status;
                guard.reason = Some(reason);
                guard.finished_at = Some(Utc::now());
            }
            Err(e) => tracing::error!("RwLock poisoned finishing job: {e}"),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let (status, reason, finished_at) = match self.lifecycle.read() {
            Ok(g) => (g.status, g.reason.clone(), g.finished_at),
            Err(e) => {
                tracing::error!("RwLock poisoned reading job lifecycle: {e}");
                (JobStatus::Failed, None, None)
            }
        };
        JobSnapshot {
            job_id: self.id,
            command: self.command.clone(),
            pid: self.pid(),
            status,
            reason,
            timeout_secs: self.timeout_secs,
            started_at: self.started_at.to_rfc3339(),
            finished_at: finished_at.map(|t| t.to_rfc3339()),
        }
    }
}
