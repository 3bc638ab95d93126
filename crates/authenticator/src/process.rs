//! Launching and terminating the supervised Dex process.
use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use snafu::{ResultExt as _, Snafu};
use tokio::process::{Child, Command};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to spawn {program:?}"))]
    Spawn {
        source: io::Error,
        program: PathBuf,
    },

    #[snafu(display("failed to send SIGTERM to process {pid}"))]
    Signal { source: io::Error, pid: u32 },

    #[snafu(display("failed to kill process {pid}"))]
    Kill { source: io::Error, pid: u32 },

    #[snafu(display("failed to wait for process exit"))]
    Wait { source: io::Error },
}

/// How a child process ended after being asked to terminate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period after SIGTERM.
    Graceful(ExitStatus),

    /// Was killed after the grace period elapsed.
    Killed(ExitStatus),

    /// Had already exited before it was signalled.
    AlreadyExited,
}

/// Starts the supervised process for a configuration file.
pub trait Launcher: Send + Sync {
    type Child: ChildProcess;

    fn launch(&self, config_path: &Path) -> Result<Self::Child>;
}

#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Waits for the process to exit.
    ///
    /// Must be cancel safe, the supervisor polls it alongside other events.
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Sends SIGTERM and waits up to `grace_period` for the process to exit, killing it
    /// afterwards.
    async fn terminate(&mut self, grace_period: Duration) -> Result<Termination>;
}

/// Runs `<program> serve <config path>` with the standard streams of this process.
#[derive(Clone, Debug)]
pub struct DexLauncher {
    program: PathBuf,
}

impl DexLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Launcher for DexLauncher {
    type Child = DexProcess;

    fn launch(&self, config_path: &Path) -> Result<Self::Child> {
        let child = Command::new(&self.program)
            .arg("serve")
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .context(SpawnSnafu {
                program: &self.program,
            })?;

        Ok(DexProcess { child })
    }
}

#[derive(Debug)]
pub struct DexProcess {
    child: Child,
}

#[async_trait]
impl ChildProcess for DexProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.context(WaitSnafu)
    }

    async fn terminate(&mut self, grace_period: Duration) -> Result<Termination> {
        // The id is gone once the exit status has been collected
        let Some(pid) = self.child.id() else {
            return Ok(Termination::AlreadyExited);
        };

        // SAFETY: kill(2) only sends a signal, the pid belongs to a child which has not been
        // reaped yet.
        if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
            let error = io::Error::last_os_error();
            if error.raw_os_error() != Some(libc::ESRCH) {
                return Err(error).context(SignalSnafu { pid });
            }
        }

        if let Ok(status) = tokio::time::timeout(grace_period, self.child.wait()).await {
            return Ok(Termination::Graceful(status.context(WaitSnafu)?));
        }

        tracing::warn!(
            pid,
            grace_period = %humantime::format_duration(grace_period),
            "process did not exit in time, killing it"
        );
        self.child.kill().await.context(KillSnafu { pid })?;
        let status = self.child.wait().await.context(WaitSnafu)?;

        Ok(Termination::Killed(status))
    }
}
