//! First-run credential bootstrapping.
//!
//! Makes sure the destination Secret carries an admin password hash and a server signing key.
//! Material which is already present is never replaced, so running this on every start is
//! safe.
use std::collections::BTreeMap;

use authenticator_password::HasherChain;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use k8s_openapi::ByteString;
use rand::Rng as _;
use snafu::{ResultExt as _, Snafu};

use crate::{
    backend::{self, SecretBackend},
    secret_store::{self, SecretStore},
    settings::{
        ADMIN_PASSWORD_HASH_KEY, ADMIN_PASSWORD_KEY, ADMIN_PASSWORD_MTIME_KEY,
        INITIAL_PASSWORD_LENGTH, NamespacedName, SERVER_SIGNATURE_KEY,
    },
};

/// Characters initial passwords are drawn from.
const PASSWORD_ALPHABET: &[u8; 63] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-";

/// Number of random bytes in a server signing key, before encoding.
const SIGNATURE_LENGTH: usize = 32;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read Secret {secret}"))]
    ReadSecret {
        source: backend::Error,
        secret: NamespacedName,
    },

    #[snafu(display("failed to persist initial credentials"))]
    PersistCredentials {
        source: secret_store::Error<authenticator_password::Error>,
    },
}

/// What a bootstrap run changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// A random admin password was generated.
    pub password_generated: bool,

    /// The admin password hash (and its mtime) was written.
    pub password_hashed: bool,

    /// A new server signing key was written.
    pub signature_generated: bool,
}

impl BootstrapOutcome {
    pub fn wrote_secret(&self) -> bool {
        self.password_hashed || self.signature_generated
    }
}

/// Ensures the admin password hash and the server signing key exist in `secret`.
///
/// - If the password hash is missing or empty, the plain text admin password is hashed. If
///   there is no plain text password either, a random one with [`INITIAL_PASSWORD_LENGTH`]
///   characters is generated and stored for one-time display.
/// - If the signing key is missing or empty, a new one is generated.
///
/// Both checks run on every invocation. All changes are written in a single update, and
/// nothing is written if both fields are populated.
#[tracing::instrument(skip(store, hashers), fields(k8s.secret.name = %secret))]
pub async fn initialise_settings<B>(
    store: &SecretStore<B>,
    secret: &NamespacedName,
    hashers: &HasherChain,
) -> Result<BootstrapOutcome>
where
    B: SecretBackend,
{
    let current = store
        .get(secret)
        .await
        .context(ReadSecretSnafu {
            secret: secret.clone(),
        })?
        .and_then(|secret| secret.data)
        .unwrap_or_default();

    if !needs_password(&current) && !needs_signature(&current) {
        tracing::debug!("credentials already initialised");
        return Ok(BootstrapOutcome::default());
    }

    let mut outcome = BootstrapOutcome::default();
    store
        .create_or_update(secret, |secret, _| {
            // Decide again against the freshly fetched Secret, it might have changed since
            // the read above.
            let data = secret.data.get_or_insert_default();
            initialise_data(data, hashers).map(|changes| outcome = changes)
        })
        .await
        .context(PersistCredentialsSnafu)?;

    if outcome.password_generated {
        tracing::info!(
            field = ADMIN_PASSWORD_KEY,
            "generated initial admin password"
        );
    }
    if outcome.signature_generated {
        tracing::info!(field = SERVER_SIGNATURE_KEY, "generated server signing key");
    }

    Ok(outcome)
}

fn initialise_data(
    data: &mut BTreeMap<String, ByteString>,
    hashers: &HasherChain,
) -> Result<BootstrapOutcome, authenticator_password::Error> {
    let mut outcome = BootstrapOutcome::default();

    if needs_password(data) {
        let password = match data.get(ADMIN_PASSWORD_KEY) {
            Some(existing) if !existing.0.is_empty() => {
                String::from_utf8_lossy(&existing.0).into_owned()
            }
            _ => {
                outcome.password_generated = true;
                generate_password()
            }
        };

        let hash = hashers.hash_password(&password)?;
        let mtime = jiff::Timestamp::now()
            .strftime("%Y-%m-%dT%H:%M:%SZ")
            .to_string();

        if outcome.password_generated {
            data.insert(ADMIN_PASSWORD_KEY.to_owned(), ByteString(password.into_bytes()));
        }
        data.insert(ADMIN_PASSWORD_HASH_KEY.to_owned(), ByteString(hash.into_bytes()));
        data.insert(ADMIN_PASSWORD_MTIME_KEY.to_owned(), ByteString(mtime.into_bytes()));
        outcome.password_hashed = true;
    }

    if needs_signature(data) {
        data.insert(SERVER_SIGNATURE_KEY.to_owned(), ByteString(generate_signature()));
        outcome.signature_generated = true;
    }

    Ok(outcome)
}

fn is_missing(data: &BTreeMap<String, ByteString>, key: &str) -> bool {
    data.get(key).is_none_or(|value| value.0.is_empty())
}

fn needs_password(data: &BTreeMap<String, ByteString>) -> bool {
    is_missing(data, ADMIN_PASSWORD_HASH_KEY)
}

fn needs_signature(data: &BTreeMap<String, ByteString>) -> bool {
    is_missing(data, SERVER_SIGNATURE_KEY)
}

/// Generates a random password of [`INITIAL_PASSWORD_LENGTH`] characters.
///
/// Every character is drawn uniformly from [`PASSWORD_ALPHABET`] using the thread-local
/// CSPRNG. The draw is bounded to the alphabet size, so there is no modulo bias.
pub fn generate_password() -> String {
    let mut rng = rand::rng();

    (0..INITIAL_PASSWORD_LENGTH)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

/// Generates a new server signing key, base64 encoded so it can be typed into validation
/// utilities.
pub fn generate_signature() -> Vec<u8> {
    let bytes: [u8; SIGNATURE_LENGTH] = rand::random();
    STANDARD.encode(bytes).into_bytes()
}
