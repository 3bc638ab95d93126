//! One-time migration of credentials and Dex configuration from the legacy (Argo CD) Secret
//! and ConfigMap into the destination Secret.
//!
//! Fields are only ever copied into the destination if they are absent there, so re-running
//! the migration after it succeeded once is a no-op.
use std::{
    collections::{BTreeMap, btree_map::Entry},
    convert::Infallible,
};

use k8s_openapi::ByteString;
use snafu::{ResultExt as _, Snafu};

use crate::{
    backend::{self, SecretBackend},
    secret_store::{self, SecretStore},
    settings::{
        ADMIN_PASSWORD_HASH_KEY, ADMIN_PASSWORD_KEY, ADMIN_PASSWORD_MTIME_KEY, DEX_CONFIG_KEY,
        LEGACY_ADMIN_PASSWORD_HASH_KEY, LEGACY_ADMIN_PASSWORD_KEY, NamespacedName,
        SERVER_SIGNATURE_KEY, URL_KEY,
    },
};

/// Number of read-decide-write cycles before the migration gives up.
pub const MAX_ATTEMPTS: usize = 3;

/// Fields copied from the legacy ConfigMap, as `(legacy key, destination key)`.
const CONFIG_MAP_FIELDS: [(&str, &str); 2] = [(DEX_CONFIG_KEY, DEX_CONFIG_KEY), (URL_KEY, URL_KEY)];

/// Fields copied from the legacy Secret, as `(legacy key, destination key)`.
const SECRET_FIELDS: [(&str, &str); 3] = [
    (LEGACY_ADMIN_PASSWORD_HASH_KEY, ADMIN_PASSWORD_HASH_KEY),
    (ADMIN_PASSWORD_MTIME_KEY, ADMIN_PASSWORD_MTIME_KEY),
    (SERVER_SIGNATURE_KEY, SERVER_SIGNATURE_KEY),
];

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to migrate legacy settings after {attempts} attempts"))]
    RetriesExhausted {
        source: AttemptError,
        attempts: usize,
    },
}

/// Failure of a single migration attempt.
#[derive(Debug, Snafu)]
pub enum AttemptError {
    #[snafu(display("failed to fetch legacy ConfigMap {config_map}"))]
    FetchLegacyConfigMap {
        source: backend::Error,
        config_map: NamespacedName,
    },

    #[snafu(display("failed to fetch legacy Secret {secret}"))]
    FetchLegacySecret {
        source: backend::Error,
        secret: NamespacedName,
    },

    #[snafu(display("failed to fetch destination Secret {secret}"))]
    FetchDestination {
        source: backend::Error,
        secret: NamespacedName,
    },

    #[snafu(display("failed to write migrated fields"))]
    WriteDestination {
        source: secret_store::Error<Infallible>,
    },
}

/// Location of the legacy resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacySource {
    pub secret: NamespacedName,
    pub config_map: NamespacedName,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The legacy resources are missing or carry none of the relevant fields.
    Inapplicable,

    /// Every field the legacy resources provide is already present in the destination.
    UpToDate,

    /// The listed destination fields were copied over.
    Migrated { fields: Vec<&'static str> },
}

/// Copies legacy fields into `destination`, retrying the whole cycle up to [`MAX_ATTEMPTS`]
/// times.
///
/// A field is copied only if the legacy value is non-empty and the destination does not
/// carry the field yet. All copies of an attempt are written in a single update.
#[tracing::instrument(skip(store), fields(k8s.secret.name = %destination))]
pub async fn migrate<B>(
    store: &SecretStore<B>,
    legacy: &LegacySource,
    destination: &NamespacedName,
) -> Result<MigrationOutcome>
where
    B: SecretBackend,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match migrate_once(store, legacy, destination).await {
            Ok(outcome) => {
                match &outcome {
                    MigrationOutcome::Inapplicable => {
                        tracing::debug!("no legacy settings found, skipping migration");
                    }
                    MigrationOutcome::UpToDate => tracing::debug!("legacy settings already migrated"),
                    MigrationOutcome::Migrated { fields } => {
                        tracing::info!(?fields, attempt, "migrated legacy settings");
                    }
                }
                return Ok(outcome);
            }
            Err(error) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    attempt,
                    "legacy settings migration attempt failed, retrying"
                );
            }
            Err(error) => {
                return Err(error).context(RetriesExhaustedSnafu { attempts: attempt });
            }
        }
    }
}

async fn migrate_once<B>(
    store: &SecretStore<B>,
    legacy: &LegacySource,
    destination: &NamespacedName,
) -> Result<MigrationOutcome, AttemptError>
where
    B: SecretBackend,
{
    let config_map_data = store
        .get_config_map(&legacy.config_map)
        .await
        .context(FetchLegacyConfigMapSnafu {
            config_map: legacy.config_map.clone(),
        })?
        .map(|config_map| config_map.data.unwrap_or_default());
    let secret_data = store
        .get(&legacy.secret)
        .await
        .context(FetchLegacySecretSnafu {
            secret: legacy.secret.clone(),
        })?
        .map(|secret| secret.data.unwrap_or_default());

    let (Some(config_map_data), Some(secret_data)) = (config_map_data, secret_data) else {
        return Ok(MigrationOutcome::Inapplicable);
    };
    if !is_relevant(&config_map_data, &secret_data) {
        return Ok(MigrationOutcome::Inapplicable);
    }

    let destination_data = store
        .get(destination)
        .await
        .context(FetchDestinationSnafu {
            secret: destination.clone(),
        })?
        .and_then(|secret| secret.data)
        .unwrap_or_default();

    let copies = plan_copies(&config_map_data, &secret_data, &destination_data);
    if copies.is_empty() {
        return Ok(MigrationOutcome::UpToDate);
    }

    let mut fields = Vec::new();
    store
        .create_or_update(destination, |secret, _| {
            fields = apply_copies(secret.data.get_or_insert_default(), copies);
            Ok::<_, Infallible>(())
        })
        .await
        .context(WriteDestinationSnafu)?;

    if fields.is_empty() {
        return Ok(MigrationOutcome::UpToDate);
    }
    Ok(MigrationOutcome::Migrated { fields })
}

/// Inserts every copy whose field is still absent and returns the fields actually inserted.
///
/// The destination might have gained some of the fields since it was first read.
fn apply_copies(
    data: &mut BTreeMap<String, ByteString>,
    copies: Vec<(&'static str, ByteString)>,
) -> Vec<&'static str> {
    copies
        .into_iter()
        .filter_map(|(key, value)| match data.entry(key.to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(value);
                Some(key)
            }
            Entry::Occupied(_) => None,
        })
        .collect()
}

/// Whether both legacy resources carry at least one of the fields they are migrated for.
fn is_relevant(
    config_map_data: &BTreeMap<String, String>,
    secret_data: &BTreeMap<String, ByteString>,
) -> bool {
    let config_map_relevant = CONFIG_MAP_FIELDS
        .iter()
        .any(|(key, _)| config_map_data.get(*key).is_some_and(|value| !value.is_empty()));
    let secret_relevant = SECRET_FIELDS
        .iter()
        .any(|(key, _)| secret_data.get(*key).is_some_and(|value| !value.0.is_empty()));

    config_map_relevant && secret_relevant
}

/// Lists the destination fields to set, in a fixed order.
fn plan_copies(
    config_map_data: &BTreeMap<String, String>,
    secret_data: &BTreeMap<String, ByteString>,
    destination_data: &BTreeMap<String, ByteString>,
) -> Vec<(&'static str, ByteString)> {
    let from_config_map = CONFIG_MAP_FIELDS.iter().filter_map(|(from, to)| {
        config_map_data
            .get(*from)
            .map(|value| (*to, ByteString(value.as_bytes().to_vec())))
    });
    let from_secret = SECRET_FIELDS
        .iter()
        .filter_map(|(from, to)| secret_data.get(*from).map(|value| (*to, value.clone())));
    // Older releases stored the admin password under a different key of the destination
    let from_destination = destination_data
        .get(LEGACY_ADMIN_PASSWORD_KEY)
        .map(|value| (ADMIN_PASSWORD_KEY, value.clone()));

    from_config_map
        .chain(from_secret)
        .chain(from_destination)
        .filter(|(to, value)| !value.0.is_empty() && !destination_data.contains_key(*to))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::memory::InMemoryBackend;

    const NAMESPACE: &str = "devtroncd";
    const DESTINATION: &str = "devtron-secret";
    const LEGACY_SECRET: &str = "argocd-secret";
    const LEGACY_CONFIG_MAP: &str = "argocd-cm";

    fn legacy() -> LegacySource {
        LegacySource {
            secret: NamespacedName::new(NAMESPACE, LEGACY_SECRET),
            config_map: NamespacedName::new(NAMESPACE, LEGACY_CONFIG_MAP),
        }
    }

    fn destination() -> NamespacedName {
        NamespacedName::new(NAMESPACE, DESTINATION)
    }

    fn legacy_backend() -> InMemoryBackend {
        InMemoryBackend::new()
            .with_config_map(
                NAMESPACE,
                LEGACY_CONFIG_MAP,
                &[
                    (DEX_CONFIG_KEY, "connectors: []"),
                    (URL_KEY, "https://devtron.example"),
                ],
            )
            .with_secret(
                NAMESPACE,
                LEGACY_SECRET,
                &[
                    (LEGACY_ADMIN_PASSWORD_HASH_KEY, "legacy-hash"),
                    (ADMIN_PASSWORD_MTIME_KEY, "2021-01-01T00:00:00Z"),
                    (SERVER_SIGNATURE_KEY, "legacy-signature"),
                ],
            )
    }

    #[tokio::test]
    async fn migrates_into_missing_destination() {
        let backend = Arc::new(legacy_backend());
        let store = SecretStore::new(backend.clone());

        let outcome = migrate(&store, &legacy(), &destination()).await.unwrap();

        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                fields: vec![
                    DEX_CONFIG_KEY,
                    URL_KEY,
                    ADMIN_PASSWORD_HASH_KEY,
                    ADMIN_PASSWORD_MTIME_KEY,
                    SERVER_SIGNATURE_KEY,
                ]
            }
        );
        assert_eq!(backend.writes(), 1);

        let data = backend.secret_data(NAMESPACE, DESTINATION);
        assert_eq!(data[DEX_CONFIG_KEY], "connectors: []");
        assert_eq!(data[URL_KEY], "https://devtron.example");
        assert_eq!(data[ADMIN_PASSWORD_HASH_KEY], "legacy-hash");
        assert_eq!(data[ADMIN_PASSWORD_MTIME_KEY], "2021-01-01T00:00:00Z");
        assert_eq!(data[SERVER_SIGNATURE_KEY], "legacy-signature");
    }

    #[tokio::test]
    async fn never_overwrites_existing_fields() {
        let backend = Arc::new(legacy_backend().with_secret(
            NAMESPACE,
            DESTINATION,
            &[
                (URL_KEY, "https://current.example"),
                (SERVER_SIGNATURE_KEY, "current-signature"),
                (ADMIN_PASSWORD_KEY, "current-password"),
                (LEGACY_ADMIN_PASSWORD_KEY, "old-password"),
            ],
        ));
        let store = SecretStore::new(backend.clone());

        migrate(&store, &legacy(), &destination()).await.unwrap();

        let data = backend.secret_data(NAMESPACE, DESTINATION);
        assert_eq!(data[URL_KEY], "https://current.example");
        assert_eq!(data[SERVER_SIGNATURE_KEY], "current-signature");
        assert_eq!(data[ADMIN_PASSWORD_KEY], "current-password");
        assert_eq!(data[DEX_CONFIG_KEY], "connectors: []");
        assert_eq!(data[ADMIN_PASSWORD_HASH_KEY], "legacy-hash");
    }

    #[tokio::test]
    async fn copies_legacy_admin_password_field() {
        let backend = Arc::new(legacy_backend().with_secret(
            NAMESPACE,
            DESTINATION,
            &[(LEGACY_ADMIN_PASSWORD_KEY, "old-password")],
        ));
        let store = SecretStore::new(backend.clone());

        let outcome = migrate(&store, &legacy(), &destination()).await.unwrap();

        assert!(matches!(
            outcome,
            MigrationOutcome::Migrated { fields } if fields.contains(&ADMIN_PASSWORD_KEY)
        ));
        assert_eq!(
            backend.secret_data(NAMESPACE, DESTINATION)[ADMIN_PASSWORD_KEY],
            "old-password"
        );
    }

    #[tokio::test]
    async fn inapplicable_without_relevant_fields() {
        let backend = Arc::new(
            InMemoryBackend::new()
                .with_config_map(NAMESPACE, LEGACY_CONFIG_MAP, &[("other", "value")])
                .with_secret(NAMESPACE, LEGACY_SECRET, &[(SERVER_SIGNATURE_KEY, "signature")]),
        );
        let store = SecretStore::new(backend.clone());

        let outcome = migrate(&store, &legacy(), &destination()).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::Inapplicable);
        assert_eq!(backend.writes(), 0);
    }

    #[tokio::test]
    async fn inapplicable_without_legacy_resources() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = SecretStore::new(backend.clone());

        let outcome = migrate(&store, &legacy(), &destination()).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::Inapplicable);
        assert_eq!(backend.writes(), 0);
        assert!(backend.secret(NAMESPACE, DESTINATION).is_none());
    }

    #[tokio::test]
    async fn rerun_is_noop() {
        let backend = Arc::new(legacy_backend());
        let store = SecretStore::new(backend.clone());

        migrate(&store, &legacy(), &destination()).await.unwrap();
        let outcome = migrate(&store, &legacy(), &destination()).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::UpToDate);
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let backend = Arc::new(legacy_backend());
        backend.fail_next_writes(2);
        let store = SecretStore::new(backend.clone());

        let outcome = migrate(&store, &legacy(), &destination()).await.unwrap();

        assert!(matches!(outcome, MigrationOutcome::Migrated { .. }));
        assert_eq!(backend.writes(), 1);
        assert_eq!(
            backend.secret_data(NAMESPACE, DESTINATION)[ADMIN_PASSWORD_HASH_KEY],
            "legacy-hash"
        );
    }

    #[tokio::test]
    async fn retries_failed_reads() {
        let backend = Arc::new(legacy_backend());
        backend.fail_next_reads(2);
        let store = SecretStore::new(backend.clone());

        let outcome = migrate(&store, &legacy(), &destination()).await.unwrap();

        assert!(matches!(outcome, MigrationOutcome::Migrated { .. }));
        assert_eq!(backend.writes(), 1);
        assert_eq!(
            backend.secret_data(NAMESPACE, DESTINATION)[URL_KEY],
            "https://devtron.example"
        );
    }

    #[test]
    fn only_inserted_fields_are_reported() {
        let mut data = BTreeMap::from([(
            URL_KEY.to_owned(),
            ByteString(b"https://current.example".to_vec()),
        )]);
        let copies = vec![
            (URL_KEY, ByteString(b"https://devtron.example".to_vec())),
            (DEX_CONFIG_KEY, ByteString(b"connectors: []".to_vec())),
        ];

        let fields = apply_copies(&mut data, copies);

        assert_eq!(fields, [DEX_CONFIG_KEY]);
        assert_eq!(data[URL_KEY].0, b"https://current.example");
        assert_eq!(data[DEX_CONFIG_KEY].0, b"connectors: []");
    }

    #[tokio::test]
    async fn fails_after_three_attempts() {
        let backend = Arc::new(legacy_backend());
        backend.fail_next_writes(3);
        let store = SecretStore::new(backend.clone());

        let result = migrate(&store, &legacy(), &destination()).await;

        assert!(matches!(
            result,
            Err(Error::RetriesExhausted {
                attempts: MAX_ATTEMPTS,
                ..
            })
        ));
        assert_eq!(backend.writes(), 0);
        assert!(backend.secret(NAMESPACE, DESTINATION).is_none());
    }
}
