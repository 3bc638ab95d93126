//! Command line arguments of the authenticator.
//!
//! Every argument can also be set through the environment variable of the same name, e.g.
//! `--secret-name` through `SECRET_NAME`.
use std::path::PathBuf;

use clap::{Args, Parser};

use crate::{
    migration::LegacySource,
    settings::{NamespacedName, ServerIdentity},
    supervisor::SupervisorOptions,
};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = "authenticator", author, version, about)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Migrate legacy settings, bootstrap credentials and supervise Dex.
    Run(RunArguments),

    /// Print the Dex configuration projected from the current Secret.
    PrintConfig(PrintConfigArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub identity: IdentityOptions,

    #[command(flatten)]
    pub secret: SecretOptions,

    #[command(flatten)]
    pub legacy: LegacyOptions,

    #[command(flatten)]
    pub dex: DexProcessOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct PrintConfigArguments {
    #[command(flatten)]
    pub identity: IdentityOptions,

    #[command(flatten)]
    pub secret: SecretOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Dex identity options")]
pub struct IdentityOptions {
    /// Address the Dex server is reached at. Its port is also the port Dex listens on.
    #[arg(long, env, default_value = "http://127.0.0.1:5556")]
    pub dex_server_address: String,

    /// Id of the static OAuth client used by the dashboard.
    #[arg(long = "dex-cli-client-id", env = "DEX_CLI_CLIENT_ID", default_value = "argo-cd")]
    pub dex_client_id: String,

    /// Lifetime of user sessions, which is also the default ID token expiry.
    #[arg(long, env, default_value = "10000s")]
    pub user_session_duration: humantime::Duration,
}

impl IdentityOptions {
    pub fn server_identity(&self) -> ServerIdentity {
        ServerIdentity {
            dex_server_address: self.dex_server_address.clone(),
            dex_client_id: self.dex_client_id.clone(),
            user_session_duration: self.user_session_duration.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Secret options")]
pub struct SecretOptions {
    /// Namespace of the Secret holding the settings and credentials.
    #[arg(long, env, default_value = "devtroncd")]
    pub namespace: String,

    /// Name of the Secret holding the settings and credentials.
    #[arg(long, env, default_value = "devtron-secret")]
    pub secret_name: String,
}

impl SecretOptions {
    pub fn secret(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.secret_name)
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Legacy migration options")]
pub struct LegacyOptions {
    /// Namespace of the legacy Secret and ConfigMap.
    #[arg(long, env, default_value = "devtroncd")]
    pub legacy_namespace: String,

    #[arg(long, env, default_value = "argocd-secret")]
    pub legacy_secret_name: String,

    #[arg(long, env, default_value = "argocd-cm")]
    pub legacy_config_map_name: String,
}

impl LegacyOptions {
    pub fn source(&self) -> LegacySource {
        LegacySource {
            secret: NamespacedName::new(&self.legacy_namespace, &self.legacy_secret_name),
            config_map: NamespacedName::new(&self.legacy_namespace, &self.legacy_config_map_name),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Dex process options")]
pub struct DexProcessOptions {
    /// Dex executable, looked up in `PATH` unless it is a path.
    #[arg(long, env, default_value = "dex")]
    pub dex_binary: PathBuf,

    /// Where the projected Dex configuration is written.
    #[arg(long, env, default_value = "/tmp/dex.yaml")]
    pub dex_config_path: PathBuf,

    /// Time Dex gets to exit after SIGTERM before it is killed.
    #[arg(long, env, default_value = "30s")]
    pub termination_grace_period: humantime::Duration,
}

impl DexProcessOptions {
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            config_path: self.dex_config_path.clone(),
            termination_grace_period: self.termination_grace_period.into(),
        }
    }
}
