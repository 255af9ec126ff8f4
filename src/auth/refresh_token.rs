/// Refresh Token Persistence
///
/// Refresh tokens are signed tokens handed to the client; the store only ever
/// sees their SHA-256 fingerprint. Every helper here fingerprints the
/// presented token before touching the store, so a leaked table cannot be
/// replayed.

use sha2::{Digest, Sha256};

use crate::error::{AppError, StoreError};
use crate::store::{CredentialStore, RefreshTokenRecord};

/// Hex-encoded SHA-256 of a refresh token
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persist a newly issued refresh token for `user_id`
///
/// A fingerprint collision means two issued tokens were identical, which the
/// random `jti` claim rules out; it is reported as an integrity failure.
pub async fn save_refresh_token(
    store: &dyn CredentialStore,
    user_id: i64,
    token: &str,
) -> Result<RefreshTokenRecord, AppError> {
    match store.create_refresh_token(user_id, &fingerprint(token)).await {
        Ok(record) => Ok(record),
        Err(StoreError::UniqueViolation(_)) => {
            tracing::error!(user_id = user_id, "Refresh token fingerprint collision");
            Err(AppError::Internal(
                "Refresh token integrity violation".to_string(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Look up the live record for a presented refresh token
pub async fn find_refresh_token(
    store: &dyn CredentialStore,
    token: &str,
) -> Result<Option<RefreshTokenRecord>, AppError> {
    Ok(store.find_refresh_token(&fingerprint(token)).await?)
}

/// Revoke a single refresh token, reporting whether it was live
pub async fn revoke_refresh_token(
    store: &dyn CredentialStore,
    token: &str,
) -> Result<bool, AppError> {
    Ok(store.delete_refresh_token(&fingerprint(token)).await?)
}

/// Revoke every refresh token a user holds
pub async fn revoke_all_user_tokens(
    store: &dyn CredentialStore,
    user_id: i64,
) -> Result<u64, AppError> {
    let revoked = store.delete_refresh_tokens_for_user(user_id).await?;
    tracing::info!(user_id = user_id, revoked = revoked, "All refresh tokens revoked for user");
    Ok(revoked)
}
