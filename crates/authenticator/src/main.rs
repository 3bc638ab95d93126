use std::{collections::BTreeMap, io::Write as _};

use authenticator::{
    backend::KubeBackend,
    bootstrap,
    cli::{Command, Opts, PrintConfigArguments, RunArguments},
    logging, migration,
    process::DexLauncher,
    secret_store::SecretStore,
    signal::{SignalError, SignalWatcher},
    supervisor::{self, Supervisor},
    watch::ChangeNotifier,
};
use authenticator_password::HasherChain;
use clap::Parser as _;
use snafu::{ResultExt as _, Snafu};

const APP_NAME: &str = "authenticator";
const LOG_ENV: &str = "AUTHENTICATOR_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to initialise credentials"))]
    InitialiseSettings { source: bootstrap::Error },

    #[snafu(display("failed to set up signal handling"))]
    Signal { source: SignalError },

    #[snafu(display("failed to supervise Dex"))]
    Supervise { source: supervisor::Error },

    #[snafu(display("failed to project Dex configuration"))]
    ProjectConfig { source: supervisor::Error },

    #[snafu(display("failed to write Dex configuration to stdout"))]
    WriteStdout { source: std::io::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;

    let client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;

    match opts.command {
        Command::Run(arguments) => run(client, arguments).await,
        Command::PrintConfig(arguments) => print_config(client, arguments).await,
    }
}

/// Secrets created by this binary are labelled as managed by it.
fn secret_store(client: kube::Client) -> SecretStore<KubeBackend> {
    let labels = BTreeMap::from([(
        "app.kubernetes.io/managed-by".to_owned(),
        APP_NAME.to_owned(),
    )]);

    SecretStore::new(KubeBackend::new(client, APP_NAME)).with_labels(labels)
}

async fn run(client: kube::Client, arguments: RunArguments) -> Result<(), Error> {
    let RunArguments {
        identity,
        secret,
        legacy,
        dex,
    } = arguments;
    let secret = secret.secret();
    let store = secret_store(client.clone());

    // The legacy settings stay where they are, bootstrapping still yields a working setup
    if let Err(error) = migration::migrate(&store, &legacy.source(), &secret).await {
        tracing::error!(
            error = &error as &dyn std::error::Error,
            "failed to migrate legacy settings"
        );
    }

    bootstrap::initialise_settings(&store, &secret, &HasherChain::default())
        .await
        .context(InitialiseSettingsSnafu)?;

    let signal_watcher = SignalWatcher::shutdown().context(SignalSnafu)?;
    let notifications = ChangeNotifier::new(client, secret.clone()).spawn();

    Supervisor::new(
        store,
        secret,
        identity.server_identity(),
        DexLauncher::new(dex.dex_binary.clone()),
        dex.supervisor_options(),
    )
    .run(notifications, signal_watcher.handle())
    .await
    .context(SuperviseSnafu)
}

async fn print_config(client: kube::Client, arguments: PrintConfigArguments) -> Result<(), Error> {
    let PrintConfigArguments { identity, secret } = arguments;

    let document = supervisor::project_secret(
        &secret_store(client),
        &secret.secret(),
        &identity.server_identity(),
    )
    .await
    .context(ProjectConfigSnafu)?;

    if document.is_empty() {
        tracing::warn!("Dex is not configured");
    }

    std::io::stdout()
        .write_all(document.as_bytes())
        .context(WriteStdoutSnafu)
}
