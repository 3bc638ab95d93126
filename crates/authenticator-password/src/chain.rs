use std::fmt::Debug;

use snafu::ensure;

use crate::{
    Argon2PasswordHasher, BcryptPasswordHasher, DummyPasswordHasher, EmptyPasswordSnafu,
    PasswordHasher, Result,
};

/// The outcome of verifying a password against a [`HasherChain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verification {
    /// No hasher in the chain accepted the password.
    Invalid,

    /// The password matched. `stale` is set when the matching hasher is not the preferred one,
    /// in which case the password should be re-hashed and persisted.
    Valid { stale: bool },
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Valid { stale: true })
    }
}

/// An ordered, non-empty list of [`PasswordHasher`]s, newest first.
///
/// The preferred hasher (index 0) is passed to [`HasherChain::new`] and cannot be replaced
/// afterwards. It is the only hasher ever used by [`HasherChain::hash_password`]; legacy
/// hashers appended with [`HasherChain::with_legacy`] only take part in verification.
pub struct HasherChain {
    hashers: Vec<Box<dyn PasswordHasher>>,
}

impl HasherChain {
    pub fn new(preferred: impl PasswordHasher + 'static) -> Self {
        Self {
            hashers: vec![Box::new(preferred)],
        }
    }

    /// Appends a legacy hasher which is consulted after all previously added ones.
    pub fn with_legacy(mut self, legacy: impl PasswordHasher + 'static) -> Self {
        self.hashers.push(Box::new(legacy));
        self
    }

    pub fn preferred(&self) -> &dyn PasswordHasher {
        self.hashers[0].as_ref()
    }

    /// Hashes `password` with the preferred hasher.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        ensure!(!password.is_empty(), EmptyPasswordSnafu);
        self.preferred().hash_password(password)
    }

    /// Verifies `password` against `hashed_password` using every hasher in order.
    pub fn verify_password(&self, password: &str, hashed_password: &str) -> Verification {
        if password.is_empty() || hashed_password.is_empty() {
            return Verification::Invalid;
        }

        self.hashers
            .iter()
            .position(|hasher| hasher.verify_password(password, hashed_password))
            .map_or(Verification::Invalid, |index| Verification::Valid {
                stale: index != 0,
            })
    }
}

impl Default for HasherChain {
    /// bcrypt, the format the dashboard and migrated Argo CD secrets use. Argon2id hashes and
    /// plain text passwords written by older releases still verify and are reported stale.
    fn default() -> Self {
        Self::new(BcryptPasswordHasher::new())
            .with_legacy(Argon2PasswordHasher::new())
            .with_legacy(DummyPasswordHasher)
    }
}

impl Debug for HasherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HasherChain")
            .field("hashers", &self.hashers.len())
            .finish()
    }
}
