//! Create-or-update semantics over single namespaced Secrets.
//!
//! Every operation fetches the Secret, lets the caller modify it and writes it back in one
//! call, creating it first if it does not exist yet. Failed writes are reported and never
//! retried here, retrying is up to the caller.
use std::{collections::BTreeMap, convert::Infallible};

use k8s_openapi::{
    ByteString,
    api::core::v1::{ConfigMap, Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use snafu::{ResultExt as _, Snafu};

use crate::{
    backend::{self, SecretBackend},
    settings::NamespacedName,
};

#[derive(Debug, Snafu)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("failed to fetch Secret {secret}"))]
    FetchSecret {
        source: backend::Error,
        secret: NamespacedName,
    },

    #[snafu(display("failed to prepare changes for Secret {secret}"))]
    Mutate { source: E, secret: NamespacedName },

    #[snafu(display("failed to create Secret {secret}"))]
    CreateSecret {
        source: backend::Error,
        secret: NamespacedName,
    },

    #[snafu(display("failed to update Secret {secret}"))]
    UpdateSecret {
        source: backend::Error,
        secret: NamespacedName,
    },
}

/// Reads and writes Secrets through a [`SecretBackend`].
///
/// Labels and annotations configured via [`SecretStore::with_labels`] and
/// [`SecretStore::with_annotations`] are only attached when a Secret gets created. Updates
/// never touch them.
#[derive(Debug)]
pub struct SecretStore<B> {
    backend: B,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl<B> SecretStore<B>
where
    B: SecretBackend,
{
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    /// Fetches a Secret, returning `None` if it doesn't exist.
    pub async fn get(&self, secret: &NamespacedName) -> backend::Result<Option<Secret>> {
        self.backend
            .get_secret(&secret.namespace, &secret.name)
            .await
    }

    /// Fetches a ConfigMap, returning `None` if it doesn't exist.
    pub async fn get_config_map(
        &self,
        config_map: &NamespacedName,
    ) -> backend::Result<Option<ConfigMap>> {
        self.backend
            .get_config_map(&config_map.namespace, &config_map.name)
            .await
    }

    /// Fetches the Secret, applies `mutate` and creates or updates it.
    ///
    /// `mutate` receives the Secret and whether it is new, i.e. did not exist before. New
    /// Secrets start out with an empty data map. If `mutate` fails or leaves an existing Secret
    /// unchanged, nothing is written.
    pub async fn create_or_update<F, E>(
        &self,
        secret_name: &NamespacedName,
        mutate: F,
    ) -> Result<Secret, Error<E>>
    where
        F: FnOnce(&mut Secret, bool) -> Result<(), E> + Send,
        E: std::error::Error + 'static,
    {
        let NamespacedName { namespace, name } = secret_name;

        let existing = self
            .backend
            .get_secret(namespace, name)
            .await
            .context(FetchSecretSnafu {
                secret: secret_name.clone(),
            })?;

        let is_new = existing.is_none();
        let mut secret = existing.unwrap_or_else(|| self.new_secret(secret_name));

        let original = (!is_new).then(|| secret.clone());
        mutate(&mut secret, is_new).context(MutateSnafu {
            secret: secret_name.clone(),
        })?;

        if original.as_ref() == Some(&secret) {
            tracing::debug!(k8s.secret.name = %secret_name, "secret unchanged, skipping update");
            return Ok(secret);
        }

        if is_new {
            tracing::debug!(k8s.secret.name = %secret_name, "creating secret");
            self.backend
                .create_secret(namespace, name, &secret)
                .await
                .context(CreateSecretSnafu {
                    secret: secret_name.clone(),
                })
        } else {
            tracing::debug!(k8s.secret.name = %secret_name, "updating secret");
            self.backend
                .replace_secret(namespace, name, &secret)
                .await
                .context(UpdateSecretSnafu {
                    secret: secret_name.clone(),
                })
        }
    }

    /// Creates or updates the Secret, setting `field` to `value`.
    pub async fn set_field(
        &self,
        secret: &NamespacedName,
        field: &str,
        value: impl Into<Vec<u8>> + Send,
    ) -> Result<Secret, Error<Infallible>> {
        let value = ByteString(value.into());

        self.create_or_update(secret, |secret, _| {
            secret
                .data
                .get_or_insert_default()
                .insert(field.to_owned(), value);
            Ok(())
        })
        .await
    }

    /// Creates or updates the Secret with `data`.
    ///
    /// If `merge` is `true`, `data` is merged into the existing fields, otherwise it replaces
    /// them. New Secrets always receive exactly `data`.
    pub async fn set_data(
        &self,
        secret: &NamespacedName,
        data: BTreeMap<String, ByteString>,
        merge: bool,
    ) -> Result<Secret, Error<Infallible>> {
        self.create_or_update(secret, |secret, is_new| {
            if merge && !is_new {
                secret.data.get_or_insert_default().extend(data);
            } else {
                secret.data = Some(data);
            }
            Ok(())
        })
        .await
    }

    fn new_secret(&self, secret: &NamespacedName) -> Secret {
        let non_empty = |map: &BTreeMap<String, String>| (!map.is_empty()).then(|| map.clone());

        Secret {
            metadata: ObjectMeta {
                name: Some(secret.name.clone()),
                namespace: Some(secret.namespace.clone()),
                labels: non_empty(&self.labels),
                annotations: non_empty(&self.annotations),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::new()),
            ..Secret::default()
        }
    }
}
