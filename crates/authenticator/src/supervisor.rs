//! The reconciliation loop keeping Dex running with the configuration projected from the
//! destination Secret.
//!
//! Every change notification triggers a fresh read of the Secret and a new projection. Dex
//! is only restarted if the serialized document differs from the one it is running with.
use std::{
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use snafu::{ResultExt as _, Snafu};
use tokio::sync::mpsc;

use crate::{
    backend::{self, SecretBackend},
    dex::{self, DexConfigDocument},
    process::{self, ChildProcess, Launcher, Termination},
    secret_store::SecretStore,
    settings::{AdminPasswordStatus, NamespacedName, ServerIdentity, ServerSettings},
};

/// Delay before restarting Dex after it exited on its own.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read settings from Secret {secret}"))]
    ReadSettings {
        source: backend::Error,
        secret: NamespacedName,
    },

    #[snafu(display("failed to project Dex configuration"))]
    ProjectConfig { source: dex::Error },

    #[snafu(display("failed to write Dex configuration to {path:?}"))]
    WriteConfig {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to start Dex"))]
    StartDex { source: process::Error },

    #[snafu(display("failed to stop Dex"))]
    StopDex { source: process::Error },

    #[snafu(display("failed to wait for Dex"))]
    WaitDex { source: process::Error },

    #[snafu(display("change notification channel closed"))]
    NotificationChannelClosed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Path the projected configuration is written to before Dex is started.
    pub config_path: PathBuf,

    /// Time Dex gets to exit after SIGTERM before it is killed.
    pub termination_grace_period: Duration,
}

/// Lifecycle state of the supervised process.
#[derive(Debug)]
enum State<C> {
    /// Dex is not configured, so nothing runs.
    Unconfigured,

    /// Dex runs with `document`.
    Running { child: C, document: DexConfigDocument },
}

impl<C> State<C> {
    /// Whether `document` is what the current state already reflects.
    fn is_current(&self, document: &DexConfigDocument) -> bool {
        match self {
            Self::Unconfigured => document.is_empty(),
            Self::Running {
                document: active, ..
            } => active == document,
        }
    }
}

enum Event {
    Shutdown,
    Changed(bool),
    ChannelClosed,
    Exited(process::Result<ExitStatus>),
}

/// Owns the single Dex process and restarts it whenever its projected configuration changes.
pub struct Supervisor<B, L> {
    store: SecretStore<B>,
    secret: NamespacedName,
    identity: ServerIdentity,
    launcher: L,
    options: SupervisorOptions,
}

impl<B, L> Supervisor<B, L>
where
    B: SecretBackend,
    L: Launcher,
{
    pub fn new(
        store: SecretStore<B>,
        secret: NamespacedName,
        identity: ServerIdentity,
        launcher: L,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            store,
            secret,
            identity,
            launcher,
            options,
        }
    }

    async fn project(&self) -> Result<DexConfigDocument> {
        project_secret(&self.store, &self.secret, &self.identity).await
    }

    /// Runs until `shutdown` completes or a fatal error occurs.
    ///
    /// Each `true` received from `notifications` triggers a reconciliation pass. Projection
    /// errors are logged and leave the running Dex untouched. Failures to write the
    /// configuration or to start, stop or wait for Dex are fatal. Dex is stopped before
    /// returning.
    pub async fn run(
        self,
        mut notifications: mpsc::Receiver<bool>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        let document = self.project().await.unwrap_or_else(|error| {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                "failed to generate Dex configuration"
            );
            DexConfigDocument::unconfigured()
        });
        let mut state = self.start(document).await?;

        loop {
            let event = tokio::select! {
                biased;

                () = &mut shutdown => Event::Shutdown,
                notification = notifications.recv() => match notification {
                    Some(changed) => Event::Changed(changed),
                    None => Event::ChannelClosed,
                },
                status = wait_for_exit(&mut state) => Event::Exited(status),
            };

            match event {
                Event::Shutdown => {
                    tracing::info!("shutting down");
                    return self.stop(state).await;
                }
                Event::ChannelClosed => {
                    self.stop(state).await?;
                    return NotificationChannelClosedSnafu.fail();
                }
                Event::Changed(false) => {}
                Event::Changed(true) => {
                    tracing::debug!("configuration change received");

                    let document = match self.project().await {
                        Ok(document) => document,
                        Err(error) => {
                            tracing::error!(
                                error = &error as &dyn std::error::Error,
                                "failed to generate Dex configuration, keeping the current one"
                            );
                            continue;
                        }
                    };

                    if state.is_current(&document) {
                        tracing::debug!("Dex configuration not modified");
                        continue;
                    }

                    tracing::info!("Dex configuration modified, restarting Dex");
                    self.stop(state).await?;
                    state = self.start(document).await?;
                }
                Event::Exited(status) => {
                    let status = status.context(WaitDexSnafu)?;
                    tracing::warn!(%status, "Dex exited unexpectedly, restarting it");

                    let document = match state {
                        State::Running { document, .. } => document,
                        State::Unconfigured => DexConfigDocument::unconfigured(),
                    };
                    tokio::time::sleep(RESTART_DELAY).await;
                    state = self.start(document).await?;
                }
            }
        }
    }

    async fn start(&self, document: DexConfigDocument) -> Result<State<L::Child>> {
        if document.is_empty() {
            tracing::info!("Dex is not configured, waiting for configuration changes");
            return Ok(State::Unconfigured);
        }

        let config_path: &Path = &self.options.config_path;
        tokio::fs::write(config_path, document.as_bytes())
            .await
            .context(WriteConfigSnafu { path: config_path })?;

        let child = self.launcher.launch(config_path).context(StartDexSnafu)?;
        tracing::info!(pid = child.id(), config_path = %config_path.display(), "started Dex");

        Ok(State::Running { child, document })
    }

    async fn stop(&self, state: State<L::Child>) -> Result<()> {
        let State::Running { mut child, .. } = state else {
            return Ok(());
        };

        let termination = child
            .terminate(self.options.termination_grace_period)
            .await
            .context(StopDexSnafu)?;
        match termination {
            Termination::Graceful(status) => tracing::info!(%status, "Dex stopped"),
            Termination::Killed(status) => tracing::warn!(%status, "Dex killed"),
            Termination::AlreadyExited => tracing::info!("Dex had already exited"),
        }

        Ok(())
    }
}

/// Reads `secret` and projects the Dex configuration from it.
pub async fn project_secret<B>(
    store: &SecretStore<B>,
    secret: &NamespacedName,
    identity: &ServerIdentity,
) -> Result<DexConfigDocument>
where
    B: SecretBackend,
{
    let data = store
        .get(secret)
        .await
        .context(ReadSettingsSnafu {
            secret: secret.clone(),
        })?
        .and_then(|secret| secret.data)
        .unwrap_or_default();

    let settings = ServerSettings::from_secret_data(&data);
    match settings.admin_password_status() {
        AdminPasswordStatus::Missing => {
            tracing::warn!("admin password hash is missing, admin login is disabled");
        }
        AdminPasswordStatus::UnknownMtime => {
            tracing::debug!("admin password modification time is missing or invalid");
        }
        AdminPasswordStatus::Set { mtime } => {
            tracing::debug!(%mtime, "admin password is set");
        }
    }

    dex::project(&settings, identity).context(ProjectConfigSnafu)
}

/// Completes when the running child exits, never if there is none.
async fn wait_for_exit<C>(state: &mut State<C>) -> process::Result<ExitStatus>
where
    C: ChildProcess,
{
    match state {
        State::Running { child, .. } => child.wait().await,
        State::Unconfigured => std::future::pending().await,
    }
}
