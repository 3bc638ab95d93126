use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use k8s_openapi::{
    ByteString,
    api::core::v1::{ConfigMap, Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};

use snafu::ResultExt as _;

use super::{ConflictSnafu, GetObjectSnafu, Result, SecretBackend};
use crate::settings::NamespacedName;

/// [`SecretBackend`] keeping objects in memory, with optimistic concurrency on resource
/// versions and injectable read and write failures.
#[derive(Debug, Default)]
pub(crate) struct InMemoryBackend {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    secrets: BTreeMap<NamespacedName, Secret>,
    config_maps: BTreeMap<NamespacedName, ConfigMap>,
    resource_version: u64,
    writes: usize,
    failing_writes: usize,
    failing_reads: usize,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

impl InMemoryBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Stores a Secret with the given string data, bypassing write accounting.
    pub(crate) fn with_secret(self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        self.put_secret(namespace, name, data);
        self
    }

    pub(crate) fn with_config_map(self, namespace: &str, name: &str, data: &[(&str, &str)]) -> Self {
        let config_map = ConfigMap {
            metadata: metadata(namespace, name),
            data: Some(
                data.iter()
                    .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                    .collect(),
            ),
            ..ConfigMap::default()
        };
        self.state()
            .config_maps
            .insert(NamespacedName::new(namespace, name), config_map);
        self
    }

    /// Overwrites a Secret the way another cluster actor would, bumping its resource version.
    pub(crate) fn put_secret(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let mut state = self.state();
        let mut metadata = metadata(namespace, name);
        metadata.resource_version = Some(state.next_resource_version());

        let secret = Secret {
            metadata,
            data: Some(
                data.iter()
                    .map(|(key, value)| ((*key).to_owned(), ByteString(value.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Secret::default()
        };
        state
            .secrets
            .insert(NamespacedName::new(namespace, name), secret);
    }

    pub(crate) fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&NamespacedName::new(namespace, name))
            .cloned()
    }

    /// Returns the data of a Secret as UTF-8 strings.
    pub(crate) fn secret_data(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.secret(namespace, name)
            .and_then(|secret| secret.data)
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, String::from_utf8(value.0).unwrap()))
            .collect()
    }

    /// Number of successful create and replace calls.
    pub(crate) fn writes(&self) -> usize {
        self.state().writes
    }

    /// Rejects the next `count` create or replace calls with a conflict.
    pub(crate) fn fail_next_writes(&self, count: usize) {
        self.state().failing_writes = count;
    }

    /// Fails the next `count` get calls, for Secrets and ConfigMaps alike.
    pub(crate) fn fail_next_reads(&self, count: usize) {
        self.state().failing_reads = count;
    }

    fn read(&self, kind: &'static str, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        if state.failing_reads == 0 {
            return Ok(());
        }

        state.failing_reads -= 1;
        Err(kube::Error::Service("connection refused".into())).context(GetObjectSnafu {
            kind,
            namespace,
            name,
        })
    }

    fn write(&self, namespace: &str, name: &str, secret: &Secret, create: bool) -> Result<Secret> {
        let mut state = self.state();
        let key = NamespacedName::new(namespace, name);

        let conflict = if state.failing_writes > 0 {
            state.failing_writes -= 1;
            true
        } else if create {
            state.secrets.contains_key(&key)
        } else {
            state.secrets.get(&key).is_none_or(|stored| {
                stored.metadata.resource_version != secret.metadata.resource_version
            })
        };
        if conflict {
            return ConflictSnafu { namespace, name }.fail();
        }

        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(state.next_resource_version());
        state.secrets.insert(key, stored.clone());
        state.writes += 1;

        Ok(stored)
    }
}

#[async_trait]
impl SecretBackend for InMemoryBackend {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.read("Secret", namespace, name)?;
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, name: &str, secret: &Secret) -> Result<Secret> {
        self.write(namespace, name, secret, true)
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret> {
        self.write(namespace, name, secret, false)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.read("ConfigMap", namespace, name)?;
        Ok(self
            .state()
            .config_maps
            .get(&NamespacedName::new(namespace, name))
            .cloned())
    }
}

fn metadata(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_owned()),
        namespace: Some(namespace.to_owned()),
        ..ObjectMeta::default()
    }
}
