// crates/core/src/jobs/process.rs
//! Spawning and terminating the external process.
//!
//! The child runs in its own process group with stdout and stderr pointing at
//! the write end of a single pipe, so the reader sees one interleaved stream
//! in the order the tool wrote it. Termination signals the whole group, which
//! also takes down helpers the tool forked and closes the pipe behind them.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};

use super::types::JobSpec;
use crate::error::SupervisorError;

pub(crate) struct SpawnedJob {
    pub child: Child,
    pub output: pipe::Receiver,
    pub pid: u32,
}

pub(crate) fn spawn_merged(spec: &JobSpec) -> Result<SpawnedJob, SupervisorError> {
    if spec.program.is_empty() {
        return Err(SupervisorError::EmptyProgram);
    }

    let (reader, writer) = std::io::pipe().map_err(SupervisorError::Pipe)?;
    let stderr_writer = writer.try_clone().map_err(SupervisorError::Pipe)?;

    tracing::trace!(program = %spec.program, args = ?spec.args, "spawn");

    // The Command owns the parent's copies of the write end; it must be gone
    // before reading or the pipe never reports EOF.
    let mut child = {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr_writer))
            .process_group(0)
            .kill_on_drop(true);
        cmd.spawn()
            .map_err(|e| SupervisorError::spawn(&spec.program, e))?
    };

    let Some(pid) = child.id() else {
        // Exited and was reaped inside spawn; nothing left to supervise.
        let _ = child.start_kill();
        return Err(SupervisorError::spawn(
            &spec.program,
            std::io::Error::new(std::io::ErrorKind::Other, "process exited before it could be tracked"),
        ));
    };

    let output = pipe::Receiver::from_owned_fd(reader.into()).map_err(SupervisorError::Pipe)?;

    Ok(SpawnedJob { child, output, pid })
}

/// Exit code as users see it; death by signal N reports `-N`.
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| -s))
        .unwrap_or(-1)
}

fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => {}
        // Group already gone.
        Err(nix::Error::ESRCH) => {}
        Err(e) => tracing::warn!(pid, ?signal, error = %e, "failed to signal job process group"),
    }
}

fn group_alive(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|raw| killpg(Pid::from_raw(raw), None::<Signal>).is_ok())
}

/// Clear out processes left in the job's group after the leader exited on
/// its own: SIGTERM, up to `grace` for them to go, then SIGKILL.
///
/// Orphans are reaped by init, not by us.
pub(crate) async fn sweep_group(pid: u32, grace: Duration) {
    if !group_alive(pid) {
        return;
    }
    tracing::debug!(pid, "terminating leftover processes in job group");
    signal_group(pid, Signal::SIGTERM);

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !group_alive(pid) {
            return;
        }
    }
    tracing::warn!(pid, "leftover job processes ignored SIGTERM, sending SIGKILL");
    signal_group(pid, Signal::SIGKILL);
}

/// SIGTERM the group, wait up to `grace`, SIGKILL if still alive, always reap.
///
/// Errors are logged and reported, never retried; the caller moves on to idle
/// regardless.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Ok(status);
    }
    let Some(pid) = child.id() else {
        return child.wait().await;
    };

    signal_group(pid, Signal::SIGTERM);

    let graceful = tokio::time::timeout(grace, child.wait()).await;
    match graceful {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(
                pid,
                grace_secs = grace.as_secs_f64(),
                "job ignored SIGTERM, sending SIGKILL"
            );
            signal_group(pid, Signal::SIGKILL);
            if let Err(e) = child.start_kill() {
                tracing::debug!(pid, error = %e, "direct kill after group kill failed");
            }
            child.wait().await
        }
    }
}

/// Exists and is not a zombie.
#[cfg(test)]
pub(crate) fn process_running(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State is the first field after the parenthesised command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}
