/// Password Hashing and Verification
///
/// The orchestrator only sees the `PasswordHasher` capability; bcrypt is the
/// one scheme shipped. Hashes embed their scheme identifier (`$2b$`) and a
/// per-call random salt, so the same password never hashes the same twice.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::AppError;

/// One-way, salted password hashing
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AppError>;

    /// Never fails: an unreadable hash simply does not match
    fn verify(&self, password: &str, hash: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        hash(password, self.cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        match verify(password, hash) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash could not be parsed");
                false
            }
        }
    }
}
