//! Access to the cluster store holding the Secrets and ConfigMaps this sidecar reads and writes.
//!
//! [`SecretBackend`] is the seam between the reconciliation logic and Kubernetes.
//! [`KubeBackend`] talks to the API server, tests use an in-memory implementation.
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use snafu::Snafu;

mod kubernetes;
#[cfg(test)]
pub(crate) mod memory;

pub use self::kubernetes::KubeBackend;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to get {kind} {namespace}/{name}"))]
    GetObject {
        source: kube::Error,
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to create Secret {namespace}/{name}"))]
    CreateSecret {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to replace Secret {namespace}/{name}"))]
    ReplaceSecret {
        source: kube::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("Secret {namespace}/{name} was modified concurrently"))]
    Conflict { namespace: String, name: String },
}

/// Namespaced get/create/replace operations on Secrets and read access to ConfigMaps.
///
/// A missing object is reported as `Ok(None)` and never as an error.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret>;

    /// Replaces an existing Secret. Implementations reject the write when the resource version
    /// of `secret` is outdated.
    async fn replace_secret(&self, namespace: &str, name: &str, secret: &Secret)
    -> Result<Secret>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
}

#[async_trait]
impl<B> SecretBackend for Arc<B>
where
    B: SecretBackend + ?Sized,
{
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        (**self).get_secret(namespace, name).await
    }

    async fn create_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret> {
        (**self).create_secret(namespace, name, secret).await
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret> {
        (**self).replace_secret(namespace, name, secret).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        (**self).get_config_map(namespace, name).await
    }
}
