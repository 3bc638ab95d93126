use snafu::{ResultExt as _, ensure};

use crate::{BcryptHashSnafu, EmptyPasswordSnafu, PasswordHasher, Result};

/// Cost used when none is configured, matching what Argo CD writes for `admin.password`.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// The preferred [`PasswordHasher`], producing bcrypt hashes.
///
/// Verification accepts the `$2a$`, `$2b$` and `$2y$` variants and reads the cost from the
/// stored hash.
#[derive(Clone, Copy, Debug)]
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    pub fn new() -> Self {
        Self::with_cost(DEFAULT_BCRYPT_COST)
    }

    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher for BcryptPasswordHasher {
    fn hash_password(&self, password: &str) -> Result<String> {
        ensure!(!password.is_empty(), EmptyPasswordSnafu);
        bcrypt::hash(password, self.cost).context(BcryptHashSnafu)
    }

    fn verify_password(&self, password: &str, hashed_password: &str) -> bool {
        if password.is_empty() || hashed_password.is_empty() {
            return false;
        }

        bcrypt::verify(password, hashed_password).unwrap_or(false)
    }
}
