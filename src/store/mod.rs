/// Credential Store
///
/// Persistence for user identities and refresh-token records. Every mutating
/// call is atomic, and uniqueness (handle, token) is enforced by the store
/// itself and reported as `StoreError::UniqueViolation`.

mod memory;
mod postgres;

pub use memory::InMemoryCredentialStore;
pub use postgres::PgCredentialStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;

/// Optional profile attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub first_name: Option<String>,
    pub phone_number: Option<String>,
    pub age: Option<i32>,
}

/// A registered user
#[derive(Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i64,
    pub handle: String,
    pub password_hash: String,
    pub profile: Profile,
    pub registered_at: DateTime<Utc>,
}

impl std::fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserIdentity")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("profile", &self.profile)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// Data for a user that has not been stored yet
#[derive(Clone)]
pub struct NewUser {
    pub handle: String,
    pub password_hash: String,
    pub profile: Profile,
}

/// A live refresh token; `token` is whatever opaque string the caller stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<UserIdentity, StoreError>;

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<UserIdentity>, StoreError>;

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserIdentity>, StoreError>;

    async fn create_refresh_token(
        &self,
        user_id: i64,
        token: &str,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_refresh_token(&self, token: &str)
        -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Returns whether a record was removed
    async fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError>;

    /// Returns how many records were removed
    async fn delete_refresh_tokens_for_user(&self, user_id: i64) -> Result<u64, StoreError>;
}
