use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, api::PostParams};
use snafu::ResultExt as _;

use super::{
    CreateSecretSnafu, GetObjectSnafu, ReplaceSecretSnafu, Result, SecretBackend,
};

/// [`SecretBackend`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeBackend {
    client: Client,
    post_params: PostParams,
}

impl KubeBackend {
    /// Creates a new backend. Writes are attributed to `field_manager`.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: Some(field_manager.into()),
                ..PostParams::default()
            },
        }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretBackend for KubeBackend {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.secrets(namespace)
            .get_opt(name)
            .await
            .context(GetObjectSnafu {
                kind: "Secret",
                namespace,
                name,
            })
    }

    async fn create_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret> {
        self.secrets(namespace)
            .create(&self.post_params, secret)
            .await
            .context(CreateSecretSnafu { namespace, name })
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret> {
        // Replacing carries the resource version of `secret`, the API server answers with a
        // conflict if the Secret changed in the meantime.
        self.secrets(namespace)
            .replace(name, &self.post_params, secret)
            .await
            .context(ReplaceSecretSnafu { namespace, name })
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .context(GetObjectSnafu {
                kind: "ConfigMap",
                namespace,
                name,
            })
    }
}
