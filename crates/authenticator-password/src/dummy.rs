use snafu::ensure;

use crate::{EmptyPasswordSnafu, PasswordHasher, Result};

/// Legacy [`PasswordHasher`] which stores passwords as-is.
///
/// Only useful as the last entry of a [`HasherChain`](crate::HasherChain), so that passwords
/// which were persisted in plain text by older releases keep working and get flagged as stale.
#[derive(Clone, Copy, Debug, Default)]
pub struct DummyPasswordHasher;

impl PasswordHasher for DummyPasswordHasher {
    fn hash_password(&self, password: &str) -> Result<String> {
        ensure!(!password.is_empty(), EmptyPasswordSnafu);
        Ok(password.to_owned())
    }

    fn verify_password(&self, password: &str, hashed_password: &str) -> bool {
        !password.is_empty() && password == hashed_password
    }
}
