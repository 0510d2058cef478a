//! Supervision of a single restartable child process.
//!
//! # Lifecycle
//!
//! ```text
//!            start()                 generation cancelled
//!   Idle ─────────────► Running ───────────────────────────► Terminating
//!    ▲                     │                                   │
//!    │                     │ exits on its own                  │ SIGINT to group
//!    │                     ▼                                   │ wait kill_delay
//!    └──────────────── exited ◄────────────────────────────────┘ SIGKILL to group
//! ```
//!
//! Each spawn owns a *generation* token derived from the caller's context.
//! Cancelling it (through [`Executor::restart`], the caller's context, or
//! dropping the executor) wakes a watchdog task that interrupts the process
//! group and escalates to a kill if any member is still present after the
//! configured delay. A separate waiter task owns the child and reaps the
//! leader.
//!
//! The *exited* token tracks the whole group, not the leader: it is only
//! tripped once the leader has been reaped and no member of the group is
//! left. A leader that exits on its own while descendants keep running
//! leaves the executor [`ExecState::Running`] until those are gone or the
//! generation is cancelled.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dl_core::ExecConfig;

use crate::error::ExecError;
use crate::group::{self, ProcessGroup};

/// Observable state of an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecState {
    /// No process is alive.
    Idle,
    /// A process is alive and has not been asked to stop.
    Running,
    /// A stop was requested and the process has not exited yet.
    Terminating,
}

/// Runs a command as a process group and restarts it on demand.
///
/// At most one process is alive at a time: [`Executor::start`] is a no-op
/// while a previous process has not exited, and [`Executor::restart`] waits
/// for the exit before spawning again.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use dl_exec::Executor;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> Result<(), dl_exec::ExecError> {
/// let ctx = CancellationToken::new();
/// let mut exec = Executor::new(["go", "run", "."])?.with_kill_delay(Duration::from_secs(5));
///
/// exec.start(&ctx)?;
/// exec.restart(&ctx).await?;
///
/// ctx.cancel();
/// exec.exited().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Executor {
    program: String,
    args: Vec<String>,
    kill_delay: Duration,

    /// Cancelled to request termination of the current process.
    generation: CancellationToken,

    /// Cancelled once the current process group is empty; starts cancelled.
    exited: CancellationToken,

    group: Option<Arc<dyn ProcessGroup>>,
}

impl Executor {
    /// Default time between the interrupt and the forced kill.
    pub const DEFAULT_KILL_DELAY: Duration = Duration::from_secs(5);

    /// How often group membership is polled once the leader is gone.
    const POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// Upper bound on waiting for a killed group to disappear.
    const KILL_GRACE: Duration = Duration::from_secs(2);

    /// Creates an idle executor for the given argv.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::EmptyCommand`] if `cmd` is empty.
    pub fn new<I, S>(cmd: I) -> Result<Self, ExecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = cmd.into_iter().map(Into::into);
        let program = argv
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ExecError::EmptyCommand)?;

        let exited = CancellationToken::new();
        exited.cancel();

        Ok(Self {
            program,
            args: argv.collect(),
            kill_delay: Self::DEFAULT_KILL_DELAY,
            generation: CancellationToken::new(),
            exited,
            group: None,
        })
    }

    /// Creates an idle executor from an [`ExecConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::EmptyCommand`] if the configured command is empty.
    pub fn from_config(config: &ExecConfig) -> Result<Self, ExecError> {
        Ok(Self::new(config.cmd.iter().cloned())?.with_kill_delay(config.kill_delay()))
    }

    /// Sets the delay between the interrupt and the forced kill.
    #[must_use]
    pub fn with_kill_delay(mut self, delay: Duration) -> Self {
        self.kill_delay = delay;
        self
    }

    /// Returns the program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ExecState {
        if self.exited.is_cancelled() {
            ExecState::Idle
        } else if self.generation.is_cancelled() {
            ExecState::Terminating
        } else {
            ExecState::Running
        }
    }

    /// Returns the process group id of the live process, if any.
    #[must_use]
    pub fn pgid(&self) -> Option<u32> {
        if self.exited.is_cancelled() {
            return None;
        }
        self.group.as_ref().map(|g| g.id())
    }

    /// Spawns the command unless a previous process is still alive.
    ///
    /// The new process is bound to a generation derived from `ctx`, so
    /// cancelling `ctx` also terminates it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Cancelled`] if `ctx` is already cancelled, or
    /// [`ExecError::Spawn`] if the program cannot be started. The executor
    /// stays idle in both cases.
    pub fn start(&mut self, ctx: &CancellationToken) -> Result<(), ExecError> {
        if !self.exited.is_cancelled() {
            return Ok(());
        }
        if ctx.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        group::isolate(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|e| ExecError::spawn(self.program.clone(), e))?;
        let pid = child.id().ok_or(ExecError::MissingPid)?;
        let group = group::group_of(pid);

        info!(program = %self.program, pgid = pid, "Started process");

        let generation = ctx.child_token();
        let leader_exited = CancellationToken::new();
        let exited = CancellationToken::new();

        tokio::spawn(reap(child, pid, leader_exited.clone()));
        tokio::spawn(watchdog(
            Arc::clone(&group),
            generation.clone(),
            leader_exited,
            exited.clone(),
            self.kill_delay,
        ));

        self.generation = generation;
        self.exited = exited;
        self.group = Some(group);
        Ok(())
    }

    /// Stops the current process (if any), waits for it to exit, and starts
    /// a new one.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Cancelled`] if `ctx` is cancelled before the
    /// previous process exits, or any error from [`Executor::start`].
    pub async fn restart(&mut self, ctx: &CancellationToken) -> Result<(), ExecError> {
        self.generation.cancel();
        self.wait(ctx).await?;
        self.start(ctx)
    }

    /// Waits until every process of the current group has exited, bounded
    /// by `ctx`.
    ///
    /// Returns immediately if no process is alive.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Cancelled`] if `ctx` is cancelled first.
    pub async fn wait(&self, ctx: &CancellationToken) -> Result<(), ExecError> {
        tokio::select! {
            biased;
            () = self.exited.cancelled() => Ok(()),
            () = ctx.cancelled() => Err(ExecError::Cancelled),
        }
    }

    /// Waits until every process of the current group has exited, without a
    /// bound.
    pub async fn exited(&self) {
        self.exited.cancelled().await;
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.generation.cancel();
    }
}

/// Owns the child until it exits, then trips `leader_exited`.
async fn reap(mut child: Child, pid: u32, leader_exited: CancellationToken) {
    match child.wait().await {
        Ok(status) => info!(pgid = pid, %status, "Process exited"),
        Err(e) => warn!(pgid = pid, error = %e, "Failed to wait for process"),
    }
    leader_exited.cancel();
}

/// Resolves once the leader has been reaped and the group is empty.
async fn group_drained(group: &dyn ProcessGroup, leader_exited: &CancellationToken) {
    leader_exited.cancelled().await;
    while group.is_alive() {
        tokio::time::sleep(Executor::POLL_INTERVAL).await;
    }
}

/// Interrupts the group once the generation is cancelled, kills it if any
/// member outlives `kill_delay`, and trips `exited` once the group is gone.
async fn watchdog(
    group: Arc<dyn ProcessGroup>,
    generation: CancellationToken,
    leader_exited: CancellationToken,
    exited: CancellationToken,
    kill_delay: Duration,
) {
    tokio::select! {
        () = group_drained(&*group, &leader_exited) => {
            exited.cancel();
            return;
        }
        () = generation.cancelled() => {}
    }

    debug!(pgid = group.id(), "Interrupting process group");
    if let Err(e) = group.interrupt() {
        warn!(error = %e, "Failed to interrupt process group");
    }

    tokio::select! {
        () = group_drained(&*group, &leader_exited) => {}
        () = tokio::time::sleep(kill_delay) => {
            warn!(
                pgid = group.id(),
                delay_ms = kill_delay.as_millis(),
                "Process group did not exit after interrupt; killing it"
            );
            if let Err(e) = group.kill() {
                warn!(error = %e, "Failed to kill process group");
            }

            let drained = tokio::time::timeout(
                Executor::KILL_GRACE,
                group_drained(&*group, &leader_exited),
            );
            if drained.await.is_err() {
                warn!(pgid = group.id(), "Process group still present after kill");
            }
        }
    }

    exited.cancel();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn group_alive(pgid: u32) -> bool {
        killpg(Pid::from_raw(i32::try_from(pgid).unwrap()), None).is_ok()
    }

    #[test]
    fn test_new_rejects_empty_command() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            Executor::new(empty).unwrap_err(),
            ExecError::EmptyCommand
        ));
        assert!(matches!(
            Executor::new(["  "]).unwrap_err(),
            ExecError::EmptyCommand
        ));
    }

    #[test]
    fn test_from_config() {
        let config = ExecConfig {
            cmd: vec!["sleep".to_owned(), "1".to_owned()],
            kill_delay_ms: 250,
        };
        let exec = Executor::from_config(&config).unwrap();
        assert_eq!(exec.program(), "sleep");
        assert_eq!(exec.kill_delay, Duration::from_millis(250));
        assert_eq!(exec.state(), ExecState::Idle);
        assert_eq!(exec.pgid(), None);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let ctx = CancellationToken::new();
        let mut exec = Executor::new(["sleep", "30"]).unwrap();

        exec.start(&ctx).unwrap();
        assert_eq!(exec.state(), ExecState::Running);
        let first = exec.pgid().unwrap();

        exec.start(&ctx).unwrap();
        assert_eq!(exec.pgid(), Some(first));

        ctx.cancel();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
        assert_eq!(exec.state(), ExecState::Idle);
    }

    #[tokio::test]
    async fn test_restart_replaces_process_group() {
        let ctx = CancellationToken::new();
        let mut exec = Executor::new(["sleep", "30"]).unwrap();

        exec.start(&ctx).unwrap();
        let old = exec.pgid().unwrap();
        assert!(group_alive(old));

        tokio::time::timeout(TIMEOUT, exec.restart(&ctx))
            .await
            .unwrap()
            .unwrap();

        let new = exec.pgid().unwrap();
        assert_ne!(old, new);
        assert!(!group_alive(old));
        assert!(group_alive(new));

        ctx.cancel();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
        assert!(!group_alive(new));
    }

    /// A shell whose background job ignores SIGINT, so interrupting the
    /// group stops the leader but leaves a descendant running.
    fn stubborn_tree(kill_delay: Duration) -> Executor {
        Executor::new(["sh", "-c", "sleep 30 & wait"])
            .unwrap()
            .with_kill_delay(kill_delay)
    }

    #[tokio::test]
    async fn test_restart_terminates_descendants() {
        let ctx = CancellationToken::new();
        let mut exec = stubborn_tree(Duration::from_millis(300));

        exec.start(&ctx).unwrap();
        // Let the shell fork its background job
        tokio::time::sleep(Duration::from_millis(200)).await;
        let old = exec.pgid().unwrap();

        tokio::time::timeout(TIMEOUT, exec.restart(&ctx))
            .await
            .unwrap()
            .unwrap();

        let new = exec.pgid().unwrap();
        assert_ne!(old, new);
        assert!(!group_alive(old), "old group {old} survived the restart");
        assert!(group_alive(new));

        ctx.cancel();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
        assert!(!group_alive(new));
    }

    #[tokio::test]
    async fn test_cancel_terminates_descendants() {
        let ctx = CancellationToken::new();
        let mut exec = stubborn_tree(Duration::from_millis(300));

        exec.start(&ctx).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let pgid = exec.pgid().unwrap();

        ctx.cancel();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
        assert!(!group_alive(pgid), "group {pgid} survived shutdown");
        assert_eq!(exec.state(), ExecState::Idle);
    }

    #[tokio::test]
    async fn test_lingering_descendant_keeps_executor_running() {
        let ctx = CancellationToken::new();
        let mut exec = Executor::new(["sh", "-c", "sleep 30 &"])
            .unwrap()
            .with_kill_delay(Duration::from_millis(300));

        exec.start(&ctx).unwrap();
        let pgid = exec.pgid().unwrap();

        // The shell exits at once; its background job does not
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(exec.state(), ExecState::Running);
        assert_eq!(exec.pgid(), Some(pgid));
        assert!(group_alive(pgid));

        ctx.cancel();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
        assert!(!group_alive(pgid));
    }

    #[tokio::test]
    async fn test_natural_exit_returns_to_idle() {
        let ctx = CancellationToken::new();
        let mut exec = Executor::new(["true"]).unwrap();

        exec.start(&ctx).unwrap();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
        assert_eq!(exec.state(), ExecState::Idle);

        // A later restart just starts again
        exec.restart(&ctx).await.unwrap();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ignored_interrupt_escalates_to_kill() {
        let ctx = CancellationToken::new();
        let kill_delay = Duration::from_millis(200);
        let mut exec = Executor::new(["sh", "-c", "trap '' INT; sleep 30"])
            .unwrap()
            .with_kill_delay(kill_delay);

        exec.start(&ctx).unwrap();
        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(300)).await;

        let requested = Instant::now();
        ctx.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(exec.state(), ExecState::Terminating);

        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
        assert!(requested.elapsed() >= kill_delay);
        assert_eq!(exec.state(), ExecState::Idle);
    }

    #[tokio::test]
    async fn test_wait_is_bounded_by_context() {
        let ctx = CancellationToken::new();
        let mut exec = Executor::new(["sleep", "30"]).unwrap();
        exec.start(&ctx).unwrap();

        let waiter = CancellationToken::new();
        waiter.cancel();
        assert!(exec.wait(&waiter).await.unwrap_err().is_cancelled());

        ctx.cancel();
        tokio::time::timeout(TIMEOUT, exec.exited()).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_executor_idle() {
        let ctx = CancellationToken::new();
        let mut exec = Executor::new(["devloop-definitely-not-a-binary"]).unwrap();

        let err = exec.start(&ctx).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert_eq!(exec.state(), ExecState::Idle);
        assert_eq!(exec.pgid(), None);
    }

    #[tokio::test]
    async fn test_start_after_cancel_is_refused() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let mut exec = Executor::new(["sleep", "30"]).unwrap();
        assert!(exec.start(&ctx).unwrap_err().is_cancelled());
        assert_eq!(exec.state(), ExecState::Idle);
    }
}
