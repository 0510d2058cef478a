//! Process-group signalling.
//!
//! The supervised command is spawned as the leader of its own process group
//! so that interrupting or killing it also reaches every descendant (the
//! compiled binary behind `go run`, shells spawned by `npm`, and so on).
//!
//! | Platform | Isolation                    | Interrupt          | Kill                  |
//! |----------|------------------------------|--------------------|-----------------------|
//! | Unix     | `setpgid(0, 0)` at spawn     | `killpg(SIGINT)`   | `killpg(SIGKILL)`     |
//! | Windows  | `CREATE_NEW_PROCESS_GROUP`   | `taskkill /T`      | `taskkill /T /F`      |

use std::fmt;
use std::sync::Arc;

use tokio::process::Command;

use crate::error::ExecError;

/// A handle able to signal every process in a supervised group.
pub trait ProcessGroup: Send + Sync + fmt::Debug {
    /// Returns the group id (the pid of the group leader).
    fn id(&self) -> u32;

    /// Asks every process in the group to stop.
    ///
    /// A group that no longer exists is not an error.
    fn interrupt(&self) -> Result<(), ExecError>;

    /// Forcibly terminates every process in the group.
    ///
    /// A group that no longer exists is not an error.
    fn kill(&self) -> Result<(), ExecError>;

    /// Returns `true` while any process of the group still exists.
    ///
    /// Descendants can outlive the leader, so this is the only reliable
    /// signal that the whole group is gone.
    fn is_alive(&self) -> bool;
}

/// Configures `cmd` so the spawned child leads a new process group.
pub(crate) fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }
}

/// Returns the group handle for a child spawned through [`isolate`].
pub(crate) fn group_of(pid: u32) -> Arc<dyn ProcessGroup> {
    #[cfg(unix)]
    {
        Arc::new(UnixProcessGroup::new(pid))
    }

    #[cfg(windows)]
    {
        Arc::new(WindowsProcessTree::new(pid))
    }
}

#[cfg(unix)]
pub use unix::UnixProcessGroup;

#[cfg(windows)]
pub use windows::WindowsProcessTree;

#[cfg(unix)]
mod unix {
    use std::io;

    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    use super::ProcessGroup;
    use crate::error::ExecError;

    /// A POSIX process group addressed with `killpg(2)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnixProcessGroup {
        pgid: u32,
    }

    impl UnixProcessGroup {
        /// Wraps an existing process group id.
        #[must_use]
        pub const fn new(pgid: u32) -> Self {
            Self { pgid }
        }

        fn send(self, signal: Signal) -> Result<(), ExecError> {
            let raw = i32::try_from(self.pgid).map_err(|_| {
                ExecError::signal(
                    signal.as_str(),
                    self.pgid,
                    io::Error::from(io::ErrorKind::InvalidInput),
                )
            })?;

            match killpg(Pid::from_raw(raw), signal) {
                // Already gone
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(errno) => Err(ExecError::signal(signal.as_str(), self.pgid, errno)),
            }
        }
    }

    impl ProcessGroup for UnixProcessGroup {
        fn id(&self) -> u32 {
            self.pgid
        }

        fn interrupt(&self) -> Result<(), ExecError> {
            self.send(Signal::SIGINT)
        }

        fn kill(&self) -> Result<(), ExecError> {
            self.send(Signal::SIGKILL)
        }

        fn is_alive(&self) -> bool {
            let Ok(raw) = i32::try_from(self.pgid) else {
                return false;
            };
            // EPERM means members exist but belong to someone else
            !matches!(killpg(Pid::from_raw(raw), None), Err(Errno::ESRCH))
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use std::process::{Command, Stdio};

    use super::ProcessGroup;
    use crate::error::ExecError;

    /// A Windows process tree terminated with `taskkill /T`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WindowsProcessTree {
        pid: u32,
    }

    impl WindowsProcessTree {
        /// Wraps the pid of the tree's root process.
        #[must_use]
        pub const fn new(pid: u32) -> Self {
            Self { pid }
        }

        fn taskkill(self, label: &'static str, force: bool) -> Result<(), ExecError> {
            let mut cmd = Command::new("taskkill");
            cmd.args(["/PID", &self.pid.to_string(), "/T"]);
            if force {
                cmd.arg("/F");
            }

            let status = cmd
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| ExecError::signal(label, self.pid, e))?;

            if status.success() {
                Ok(())
            } else {
                Err(ExecError::signal(
                    label,
                    self.pid,
                    io::Error::other(format!("taskkill exited with {status}")),
                ))
            }
        }
    }

    impl ProcessGroup for WindowsProcessTree {
        fn id(&self) -> u32 {
            self.pid
        }

        fn interrupt(&self) -> Result<(), ExecError> {
            self.taskkill("CTRL_BREAK", false)
        }

        fn kill(&self) -> Result<(), ExecError> {
            self.taskkill("TERMINATE", true)
        }

        fn is_alive(&self) -> bool {
            // Only the root is observable without a job object
            Command::new("tasklist")
                .args(["/FI", &format!("PID eq {}", self.pid), "/NH", "/FO", "CSV"])
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
                .is_ok_and(|out| {
                    String::from_utf8_lossy(&out.stdout).contains(&format!("\"{}\"", self.pid))
                })
        }
    }
}
