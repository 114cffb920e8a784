// crates/core/src/jobs/supervisor.rs
//! The job supervisor: at most one external process at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::unix::pipe;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use super::process::{self, SpawnedJob};
use super::state::JobRecord;
use super::types::{
    failed_message, JobId, JobSnapshot, JobSpec, JobStatus, StopOutcome, StopReason,
    SupervisorStatus, TerminationReason, MSG_COMPLETED, MSG_STOPPED, MSG_TIMED_OUT,
};
use crate::buffer::LineBuffer;
use crate::codec::OutputLineCodec;
use crate::error::SupervisorError;

/// Tunables for the supervisor. Defaults match the server's behaviour.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    /// How long to keep reading output after the process is gone.
    pub output_drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            output_drain_timeout: Duration::from_secs(2),
        }
    }
}

/// Handle to the registered job. Dropping it without `terminate` makes the
/// monitor treat the job as shut down.
struct ActiveJob {
    record: Arc<JobRecord>,
    stop_tx: oneshot::Sender<StopReason>,
    /// `true` once the monitor has acted on the stop request, `false` if the
    /// process had already exited on its own.
    done_rx: oneshot::Receiver<bool>,
}

impl ActiveJob {
    /// Ask the monitor to run the termination protocol and wait until the
    /// process is reaped and its reader has stopped.
    ///
    /// Returns whether the request ended the job.
    async fn terminate(self, reason: StopReason) -> bool {
        let ActiveJob {
            record,
            stop_tx,
            done_rx,
        } = self;
        if stop_tx.send(reason).is_err() {
            tracing::debug!(job_id = record.id(), "job already finishing on its own");
        }
        match done_rx.await {
            Ok(honored) => honored,
            Err(_) => {
                tracing::warn!(job_id = record.id(), "job monitor went away without reporting");
                false
            }
        }
    }
}

type CurrentJob = Arc<Mutex<Option<ActiveJob>>>;

/// Owns the lifecycle of the single supervised job.
///
/// Construct once at startup, share behind an `Arc`. `start`, `stop` and
/// `shutdown` serialize on one async mutex; every wait performed while holding
/// it is bounded by the grace period.
pub struct JobSupervisor {
    buffer: Arc<LineBuffer>,
    config: SupervisorConfig,
    next_id: AtomicU64,
    current: CurrentJob,
    last: RwLock<Option<Arc<JobRecord>>>,
}

impl JobSupervisor {
    pub fn new(buffer: Arc<LineBuffer>) -> Self {
        Self::with_config(buffer, SupervisorConfig::default())
    }

    pub fn with_config(buffer: Arc<LineBuffer>, config: SupervisorConfig) -> Self {
        Self {
            buffer,
            config,
            next_id: AtomicU64::new(1),
            current: Arc::new(Mutex::new(None)),
            last: RwLock::new(None),
        }
    }

    pub fn buffer(&self) -> &Arc<LineBuffer> {
        &self.buffer
    }

    /// Start a job, superseding whatever is running.
    ///
    /// Returns as soon as the process is spawned. A spawn failure is written
    /// to the buffer as well as returned, so stream consumers see it.
    pub async fn start(&self, spec: JobSpec) -> Result<JobId, SupervisorError> {
        let mut current = self.current.lock().await;

        if let Some(active) = current.take() {
            tracing::info!(job_id = active.record.id(), "superseding running job");
            active.terminate(StopReason::Superseded).await;
        }
        let dropped = self.buffer.drain();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(JobRecord::new(id, &spec));
        self.remember(Arc::clone(&record));

        let spawned = match process::spawn_merged(&spec) {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::error!(job_id = id, program = %spec.program, error = %err, "failed to start job");
                self.buffer.push(format!("Error: {err}"));
                record.finish(
                    JobStatus::Failed,
                    TerminationReason::Error {
                        message: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        record.set_running(spawned.pid);
        tracing::info!(
            job_id = id,
            pid = spawned.pid,
            command = ?spec.command_line(),
            timeout_secs = spec.timeout.map_or(0, |t| t.as_secs()),
            dropped_lines = dropped,
            "job started"
        );

        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let monitor = JobMonitor {
            record: Arc::clone(&record),
            buffer: Arc::clone(&self.buffer),
            current: Arc::clone(&self.current),
            config: self.config.clone(),
            deadline: spec.timeout.map(|t| Instant::now() + t),
        };
        tokio::spawn(monitor.run(spawned, stop_rx, done_tx));

        *current = Some(ActiveJob {
            record,
            stop_tx,
            done_rx,
        });
        Ok(id)
    }

    /// Terminate the running job. No-op when nothing is running.
    ///
    /// A job whose process already exited but which is still being finalized
    /// counts as not running: it ends with its own outcome, not as stopped.
    pub async fn stop(&self) -> StopOutcome {
        let mut current = self.current.lock().await;
        let Some(active) = current.take() else {
            return StopOutcome::NotRunning;
        };
        let job_id = active.record.id();
        tracing::info!(job_id, "stopping job");
        if active.terminate(StopReason::Stopped).await {
            StopOutcome::Stopped
        } else {
            tracing::info!(job_id, "job had already exited");
            StopOutcome::NotRunning
        }
    }

    /// Terminate the running job because the server is exiting.
    ///
    /// Returns `true` if a running job was terminated.
    pub async fn shutdown(&self) -> bool {
        let mut current = self.current.lock().await;
        match current.take() {
            Some(active) => {
                tracing::info!(job_id = active.record.id(), "terminating job for shutdown");
                active.terminate(StopReason::Shutdown).await
            }
            None => false,
        }
    }

    /// Whether a job is currently registered.
    pub async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// The running job, or the most recent one if none is running.
    pub fn last_job(&self) -> Option<JobSnapshot> {
        match self.last.read() {
            Ok(guard) => guard.as_ref().map(|r| r.snapshot()),
            Err(e) => {
                tracing::error!("RwLock poisoned reading last job: {e}");
                None
            }
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            job: self.last_job(),
            buffered: self.buffer.len(),
            capacity: self.buffer.capacity(),
        }
    }

    fn remember(&self, record: Arc<JobRecord>) {
        match self.last.write() {
            Ok(mut guard) => *guard = Some(record),
            Err(e) => tracing::error!("RwLock poisoned writing last job: {e}"),
        }
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Stop(StopReason),
}

/// Per-job task: owns the `Child`, races exit against deadline and stop
/// requests, writes the final line, and clears the registration.
struct JobMonitor {
    record: Arc<JobRecord>,
    buffer: Arc<LineBuffer>,
    current: CurrentJob,
    config: SupervisorConfig,
    deadline: Option<Instant>,
}

impl JobMonitor {
    async fn run(
        self,
        spawned: SpawnedJob,
        mut stop_rx: oneshot::Receiver<StopReason>,
        done_tx: oneshot::Sender<bool>,
    ) {
        let SpawnedJob {
            mut child,
            output,
            pid,
        } = spawned;
        let job_id = self.record.id();
        let reader = tokio::spawn(pump_output(output, Arc::clone(&self.buffer)));

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = expired => Outcome::TimedOut,
            // A dropped sender means the supervisor itself is gone.
            reason = &mut stop_rx => Outcome::Stop(reason.unwrap_or(StopReason::Shutdown)),
        };

        let honored_stop = matches!(outcome, Outcome::Stop(_));
        let (status, reason, final_line) = match outcome {
            Outcome::Exited(Ok(exit)) => {
                let lines = self.finish_reading(reader, pid).await;
                // Helpers the tool left behind outlive it in the group.
                process::sweep_group(pid, self.config.grace_period).await;
                let code = process::exit_code(&exit);
                tracing::info!(job_id, exit_code = code, lines, "job exited");
                if exit.success() {
                    (
                        JobStatus::Completed,
                        TerminationReason::Completed,
                        Some(MSG_COMPLETED.to_string()),
                    )
                } else {
                    (
                        JobStatus::Failed,
                        TerminationReason::Failed { exit_code: code },
                        Some(failed_message(code)),
                    )
                }
            }
            Outcome::Exited(Err(e)) => {
                tracing::error!(job_id, error = %e, "failed waiting for job");
                self.terminate(&mut child).await;
                self.finish_reading(reader, pid).await;
                (
                    JobStatus::Failed,
                    TerminationReason::Error {
                        message: e.to_string(),
                    },
                    Some(format!("Error: {e}")),
                )
            }
            Outcome::TimedOut => {
                tracing::error!(job_id, "command timed out");
                self.buffer.push(MSG_TIMED_OUT);
                self.terminate(&mut child).await;
                self.finish_reading(reader, pid).await;
                (JobStatus::TimedOut, TerminationReason::TimedOut, None)
            }
            Outcome::Stop(reason) => {
                self.terminate(&mut child).await;
                self.finish_reading(reader, pid).await;
                let line = (reason == StopReason::Stopped).then(|| MSG_STOPPED.to_string());
                (JobStatus::Terminated, reason.into(), line)
            }
        };

        if let Some(line) = final_line {
            self.buffer.push(line);
        }
        self.record.finish(status, reason);
        drop(child);

        // Whoever took the registration (stop, supersede) is waiting on this
        // while holding the supervisor lock, so signal before locking.
        let _ = done_tx.send(honored_stop);

        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|a| a.record.id() == job_id) {
            *current = None;
        }
        tracing::debug!(job_id, status = status.as_str(), "job finalized");
    }

    async fn terminate(&self, child: &mut tokio::process::Child) {
        if let Err(e) = process::terminate(child, self.config.grace_period).await {
            tracing::error!(job_id = self.record.id(), error = %e, "termination protocol failed");
        }
    }

    /// Let the reader flush what the pipe still holds, then make sure it is
    /// stopped. Returns the number of lines read, 0 if it had to be cut off.
    ///
    /// If something left in the process group keeps the pipe open past the
    /// drain timeout, the group is swept and the reader gets one more window.
    async fn finish_reading(&self, mut reader: JoinHandle<u64>, pid: u32) -> u64 {
        let job_id = self.record.id();
        if let Some(lines) = self.join_reader(&mut reader).await {
            return lines;
        }
        tracing::warn!(job_id, pid, "output pipe still held after exit; terminating leftover processes");
        process::sweep_group(pid, self.config.grace_period).await;
        if let Some(lines) = self.join_reader(&mut reader).await {
            return lines;
        }
        tracing::warn!(job_id, "output pipe still open; abandoning reader");
        reader.abort();
        let _ = reader.await;
        0
    }

    async fn join_reader(&self, reader: &mut JoinHandle<u64>) -> Option<u64> {
        match tokio::time::timeout(self.config.output_drain_timeout, reader).await {
            Ok(Ok(lines)) => Some(lines),
            Ok(Err(e)) => {
                tracing::error!(job_id = self.record.id(), error = %e, "output reader panicked");
                Some(0)
            }
            Err(_) => None,
        }
    }
}

async fn pump_output(output: pipe::Receiver, buffer: Arc<LineBuffer>) -> u64 {
    let mut lines = FramedRead::new(output, OutputLineCodec::new());
    let mut count = 0;
    while let Some(next) = lines.next().await {
        match next {
            Ok(line) => {
                buffer.push(line);
                count += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "error reading job output");
                break;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sh(script: &str) -> JobSpec {
        JobSpec::new("/bin/sh", ["-c", script])
    }

    fn supervisor() -> JobSupervisor {
        JobSupervisor::with_config(
            Arc::new(LineBuffer::new(100)),
            SupervisorConfig {
                grace_period: Duration::from_secs(5),
                output_drain_timeout: Duration::from_secs(2),
            },
        )
    }

    /// Poll until the supervisor has no registered job.
    async fn wait_idle(supervisor: &JobSupervisor, limit: Duration) {
        let started = std::time::Instant::now();
        while supervisor.is_running().await {
            assert!(started.elapsed() < limit, "job still running after {limit:?}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn pid_alive(pid: u32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn test_completed_job_writes_output_then_success() {
        let supervisor = supervisor();
        supervisor.start(sh("echo X")).await.unwrap();
        wait_idle(&supervisor, Duration::from_secs(5)).await;

        assert_eq!(supervisor.buffer().snapshot(), vec!["X", MSG_COMPLETED]);
        let status = supervisor.status();
        assert_eq!(status.buffered, 2);
        assert_eq!(status.capacity, 100);
        let job = status.job.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.reason, Some(TerminationReason::Completed));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_code() {
        let supervisor = supervisor();
        supervisor.start(sh("echo partial; exit 3")).await.unwrap();
        wait_idle(&supervisor, Duration::from_secs(5)).await;

        assert_eq!(
            supervisor.buffer().snapshot(),
            vec!["partial", "Error: Download failed (exit 3)"]
        );
        let job = supervisor.last_job().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.reason, Some(TerminationReason::Failed { exit_code: 3 }));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_through_buffer() {
        let supervisor = supervisor();
        let err = supervisor
            .start(JobSpec::new("/nonexistent/tidal-dl-ng", ["dl", "url"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));

        let lines = supervisor.buffer().snapshot();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error: failed to start /nonexistent/tidal-dl-ng"));
        assert!(!supervisor.is_running().await);
        assert_eq!(supervisor.last_job().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_without_job_is_noop() {
        let supervisor = supervisor();
        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
        assert!(supervisor.buffer().is_empty());
        assert!(supervisor.last_job().is_none());
    }

    #[tokio::test]
    async fn test_stop_terminates_and_reaps() {
        let supervisor = supervisor();
        supervisor.start(sh("echo begin; sleep 30")).await.unwrap();
        let pid = supervisor.last_job().unwrap().pid.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(supervisor.stop().await, StopOutcome::Stopped);
        assert!(!supervisor.is_running().await);
        assert!(!pid_alive(pid));

        assert_eq!(supervisor.buffer().snapshot(), vec!["begin", MSG_STOPPED]);
        let job = supervisor.last_job().unwrap();
        assert_eq!(job.status, JobStatus::Terminated);
        assert_eq!(job.reason, Some(TerminationReason::Stopped));

        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_timeout_terminates_job() {
        let supervisor = supervisor();
        let started = std::time::Instant::now();
        supervisor
            .start(sh("sleep 10").with_timeout_secs(1))
            .await
            .unwrap();
        let pid = supervisor.last_job().unwrap().pid.unwrap();

        wait_idle(&supervisor, Duration::from_secs(8)).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(6), "took {elapsed:?}");

        assert_eq!(supervisor.buffer().snapshot(), vec![MSG_TIMED_OUT]);
        assert_eq!(supervisor.last_job().unwrap().status, JobStatus::TimedOut);
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn test_supersede_replaces_job_without_interleaving() {
        let supervisor = supervisor();
        supervisor
            .start(sh("while :; do echo A; sleep 0.05; done"))
            .await
            .unwrap();
        let first = supervisor.last_job().unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(supervisor.buffer().snapshot().iter().any(|l| l == "A"));

        let second_id = supervisor.start(sh("echo B; sleep 0.2; echo B2")).await.unwrap();
        assert!(second_id > first.job_id);
        assert!(!pid_alive(first.pid.unwrap()));

        wait_idle(&supervisor, Duration::from_secs(5)).await;
        assert_eq!(supervisor.buffer().snapshot(), vec!["B", "B2", MSG_COMPLETED]);
        assert_eq!(supervisor.last_job().unwrap().job_id, second_id);
    }

    #[tokio::test]
    async fn test_concurrent_starts_leave_exactly_one_job() {
        let supervisor = Arc::new(supervisor());
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let supervisor = Arc::clone(&supervisor);
                tokio::spawn(async move {
                    supervisor
                        .start(sh(&format!("echo job{i}; sleep 30")))
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);

        let last = supervisor.last_job().unwrap();
        assert_eq!(last.status, JobStatus::Running);
        assert_eq!(last.job_id, *ids.last().unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let job_lines: Vec<String> = supervisor
            .buffer()
            .snapshot()
            .into_iter()
            .filter(|l| l.starts_with("job"))
            .collect();
        assert_eq!(job_lines.len(), 1);

        assert!(supervisor.shutdown().await);
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_finalize_of_old_job_does_not_clear_new_registration() {
        let supervisor = supervisor();
        // The first job exits by itself almost immediately; its monitor
        // finalizes while the second job is already registered.
        supervisor.start(sh("exit 0")).await.unwrap();
        supervisor.start(sh("sleep 30")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(supervisor.is_running().await);
        assert_eq!(supervisor.last_job().unwrap().status, JobStatus::Running);
        assert_eq!(supervisor.stop().await, StopOutcome::Stopped);
    }

    fn quick_sweep_supervisor() -> JobSupervisor {
        JobSupervisor::with_config(
            Arc::new(LineBuffer::new(100)),
            SupervisorConfig {
                grace_period: Duration::from_secs(1),
                output_drain_timeout: Duration::from_millis(300),
            },
        )
    }

    fn first_line_as_pid(supervisor: &JobSupervisor) -> i32 {
        supervisor.buffer().snapshot()[0].parse().unwrap()
    }

    #[tokio::test]
    async fn test_background_helper_holding_pipe_is_killed_after_exit() {
        let supervisor = quick_sweep_supervisor();
        supervisor.start(sh("sleep 30 & echo $!; exit 0")).await.unwrap();
        wait_idle(&supervisor, Duration::from_secs(5)).await;

        let helper = first_line_as_pid(&supervisor);
        assert!(!process::process_running(helper), "helper {helper} survived the job");
        let lines = supervisor.buffer().snapshot();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], MSG_COMPLETED);
        assert_eq!(supervisor.last_job().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_detached_helper_is_killed_after_exit() {
        let supervisor = quick_sweep_supervisor();
        supervisor
            .start(sh("sleep 30 >/dev/null 2>&1 & echo $!; exit 0"))
            .await
            .unwrap();
        wait_idle(&supervisor, Duration::from_secs(5)).await;

        let helper = first_line_as_pid(&supervisor);
        assert!(!process::process_running(helper), "helper {helper} survived the job");
        assert_eq!(supervisor.buffer().snapshot()[1], MSG_COMPLETED);
    }

    #[tokio::test]
    async fn test_stop_after_exit_during_finalize_reports_not_running() {
        let supervisor = quick_sweep_supervisor();
        // The helper keeps the pipe open, holding the monitor in its drain
        // window after the shell has exited.
        supervisor.start(sh("sleep 30 & echo hi; exit 0")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(supervisor.is_running().await);

        assert_eq!(supervisor.stop().await, StopOutcome::NotRunning);
        assert!(!supervisor.is_running().await);
        assert_eq!(supervisor.buffer().snapshot(), vec!["hi", MSG_COMPLETED]);
        let job = supervisor.last_job().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.reason, Some(TerminationReason::Completed));
    }

    #[tokio::test]
    async fn test_shutdown_without_job() {
        let supervisor = supervisor();
        assert!(!supervisor.shutdown().await);
    }
}
