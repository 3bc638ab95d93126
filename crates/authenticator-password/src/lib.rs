//! This crate implements the password hashing policy used by the authenticator.
//!
//! Passwords are hashed and verified through a [`HasherChain`], an ordered list of
//! [`PasswordHasher`]s. The first entry is the preferred hasher and is the only one ever used
//! to produce new hashes. Every other entry is a legacy hasher which is only consulted during
//! verification.
//!
//! A successful verification against a hash produced by one of the legacy hashers is reported
//! as stale, which signals the caller to re-hash the password with the preferred hasher and
//! persist the result.
//!
//! ```
//! use authenticator_password::{DummyPasswordHasher, HasherChain, Verification};
//!
//! let chain = HasherChain::new(DummyPasswordHasher);
//! let hash = chain.hash_password("Hello, world!").expect("non-empty password");
//!
//! assert_eq!(
//!     chain.verify_password("Hello, world!", &hash),
//!     Verification::Valid { stale: false }
//! );
//! ```
use snafu::Snafu;

mod argon2_hasher;
mod bcrypt_hasher;
mod chain;
mod dummy;

pub use crate::{argon2_hasher::*, bcrypt_hasher::*, chain::*, dummy::*};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("refusing to hash an empty password"))]
    EmptyPassword,

    #[snafu(display("failed to hash password using bcrypt"))]
    BcryptHash { source: ::bcrypt::BcryptError },

    #[snafu(display("failed to hash password using argon2"))]
    Argon2Hash {
        source: ::argon2::password_hash::Error,
    },
}

/// A single password hashing scheme.
///
/// Implementations must reject empty passwords when hashing and must never report a successful
/// verification for an empty password or an empty stored hash.
pub trait PasswordHasher: Send + Sync {
    /// Hashes `password`, returning the textual representation of the hash.
    fn hash_password(&self, password: &str) -> Result<String>;

    /// Returns `true` if `password` matches `hashed_password`.
    fn verify_password(&self, password: &str, hashed_password: &str) -> bool;
}
