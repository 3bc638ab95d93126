use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString, rand_core::OsRng,
    },
};
use snafu::{ResultExt as _, ensure};

use crate::{Argon2HashSnafu, EmptyPasswordSnafu, PasswordHasher, Result};

/// [`PasswordHasher`] producing Argon2id PHC strings.
///
/// Verification reads the algorithm parameters from the stored hash, so hashes created with
/// different parameters keep verifying after the parameters are changed.
#[derive(Clone, Debug, Default)]
pub struct Argon2PasswordHasher {
    params: Option<Params>,
}

impl Argon2PasswordHasher {
    /// Creates a hasher using the default Argon2id parameters (19 MiB, 2 iterations).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hasher with custom cost parameters.
    pub fn with_params(params: Params) -> Self {
        Self {
            params: Some(params),
        }
    }

    fn instance(&self) -> Argon2<'static> {
        match &self.params {
            Some(params) => Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone()),
            None => Argon2::default(),
        }
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash_password(&self, password: &str) -> Result<String> {
        ensure!(!password.is_empty(), EmptyPasswordSnafu);

        let salt = SaltString::generate(&mut OsRng);
        self.instance()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .context(Argon2HashSnafu)
    }

    fn verify_password(&self, password: &str, hashed_password: &str) -> bool {
        if password.is_empty() || hashed_password.is_empty() {
            return false;
        }

        let Ok(parsed_hash) = PasswordHash::new(hashed_password) else {
            return false;
        };

        self.instance()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Cheap parameters, hashing with the defaults is slow in debug builds.
    pub(crate) fn fast_hasher() -> Argon2PasswordHasher {
        Argon2PasswordHasher::with_params(Params::new(1024, 1, 1, None).unwrap())
    }

    #[test]
    fn hash_and_verify() {
        let hasher = fast_hasher();

        let hash = hasher.hash_password("Hello, world!").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(hasher.verify_password("Hello, world!", &hash));
        assert!(!hasher.verify_password("Goodbye, world!", &hash));
    }

    #[test]
    fn polluted_hash_does_not_verify() {
        let hasher = fast_hasher();

        let hash = hasher.hash_password("Hello, world!").unwrap();
        assert!(!hasher.verify_password("Hello, world!", &format!("extradata12345{hash}")));
    }

    #[test]
    fn salts_differ() {
        let hasher = fast_hasher();

        let first = hasher.hash_password("Hello, world!").unwrap();
        let second = hasher.hash_password("Hello, world!").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn empty_password_is_rejected() {
        let hasher = fast_hasher();

        assert!(hasher.hash_password("").is_err());
        assert!(!hasher.verify_password("", ""));
    }
}
