use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{CredentialStore, NewUser, RefreshTokenRecord, UserIdentity};
use crate::error::StoreError;

#[derive(Default)]
struct Tables {
    users: HashMap<i64, UserIdentity>,
    handles: HashMap<String, i64>,
    tokens: HashMap<String, RefreshTokenRecord>,
    next_user_id: i64,
    next_token_id: i64,
}

/// Process-local credential store
///
/// All tables sit behind one lock, so each call observes and commits a
/// consistent state.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create_user(&self, user: NewUser) -> Result<UserIdentity, StoreError> {
        let mut tables = self.tables.write().await;

        if tables.handles.contains_key(&user.handle) {
            return Err(StoreError::UniqueViolation("user_profile.username".to_string()));
        }

        tables.next_user_id += 1;
        let identity = UserIdentity {
            id: tables.next_user_id,
            handle: user.handle,
            password_hash: user.password_hash,
            profile: user.profile,
            registered_at: Utc::now(),
        };
        tables.handles.insert(identity.handle.clone(), identity.id);
        tables.users.insert(identity.id, identity.clone());

        Ok(identity)
    }

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<UserIdentity>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .handles
            .get(handle)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserIdentity>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn create_refresh_token(
        &self,
        user_id: i64,
        token: &str,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let mut tables = self.tables.write().await;

        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::ForeignKey(format!("user {} does not exist", user_id)));
        }
        if tables.tokens.contains_key(token) {
            return Err(StoreError::UniqueViolation("refresh_token.token".to_string()));
        }

        tables.next_token_id += 1;
        let record = RefreshTokenRecord {
            id: tables.next_token_id,
            token: token.to_string(),
            user_id,
            created_at: Utc::now(),
        };
        tables.tokens.insert(record.token.clone(), record.clone());

        Ok(record)
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.tables.read().await.tokens.get(token).cloned())
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.tokens.remove(token).is_some())
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: i64) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.tokens.len();
        tables.tokens.retain(|_, record| record.user_id != user_id);
        Ok((before - tables.tokens.len()) as u64)
    }
}
