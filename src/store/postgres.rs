use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{CredentialStore, NewUser, Profile, RefreshTokenRecord, UserIdentity};
use crate::error::StoreError;

const USER_COLUMNS: &str =
    "id, username, hashed_password, first_name, phone_number, age, date_registered";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    hashed_password: String,
    first_name: Option<String>,
    phone_number: Option<String>,
    age: Option<i32>,
    date_registered: DateTime<Utc>,
}

impl From<UserRow> for UserIdentity {
    fn from(row: UserRow) -> Self {
        UserIdentity {
            id: row.id,
            handle: row.username,
            password_hash: row.hashed_password,
            profile: Profile {
                first_name: row.first_name,
                phone_number: row.phone_number,
                age: row.age,
            },
            registered_at: row.date_registered,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    token: String,
    user_id: i64,
    created_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshTokenRecord {
            id: row.id,
            token: row.token,
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

/// Postgres-backed credential store
///
/// Each call is one statement, so it commits atomically; uniqueness of
/// `username` and `token` comes from the table constraints.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled SQL migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {}", e)))
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn create_user(&self, user: NewUser) -> Result<UserIdentity, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO user_profile (username, hashed_password, first_name, phone_number, age)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.handle)
        .bind(&user.password_hash)
        .bind(&user.profile.first_name)
        .bind(&user.profile.phone_number)
        .bind(user.profile.age)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_user_by_handle(&self, handle: &str) -> Result<Option<UserIdentity>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM user_profile WHERE username = $1",
            USER_COLUMNS
        ))
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserIdentity>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM user_profile WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn create_refresh_token(
        &self,
        user_id: i64,
        token: &str,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            INSERT INTO refresh_token (token, user_id)
            VALUES ($1, $2)
            RETURNING id, token, user_id, created_at
            "#,
        )
        .bind(token)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "SELECT id, token, user_id, created_at FROM refresh_token WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn delete_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_refresh_tokens_for_user(&self, user_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
