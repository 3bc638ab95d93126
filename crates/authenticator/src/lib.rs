//! Control plane of the authenticator sidecar.
//!
//! The sidecar keeps a Dex server configured from a single Kubernetes Secret:
//!
//! 1. [`migration`] copies settings and credentials of the legacy Argo CD resources into the
//!    Secret, once.
//! 2. [`bootstrap`] generates the initial admin password and the server signing key.
//! 3. [`supervisor`] projects the Dex configuration from the Secret via [`dex`], starts Dex
//!    and restarts it whenever a change reported by [`watch`] alters the projection.
//!
//! All reads and writes of the Secret go through [`secret_store::SecretStore`].
pub mod backend;
pub mod bootstrap;
pub mod cli;
pub mod dex;
pub mod logging;
pub mod migration;
pub mod process;
pub mod secret_store;
pub mod settings;
pub mod signal;
pub mod supervisor;
pub mod watch;
