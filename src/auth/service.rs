/// Authentication Service
///
/// Orchestrates the credential lifecycle on top of the store, the password
/// hasher, the token codec and the login rate limiter.
///
/// Per refresh token the lifecycle is `absent -> active -> absent`: login
/// creates it, logout (or rotation) deletes it, refresh leaves it in place
/// unless rotation is enabled. Nothing in here retries; a failed call is
/// final for the request that made it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;

use crate::auth::claims::{AccessClaims, TokenKind};
use crate::auth::jwt::{TokenCodec, TokenError};
use crate::auth::password::{BcryptHasher, PasswordHasher};
use crate::auth::rate_limit::{key_strategy, Admission, RateLimitKey, RateLimiter};
use crate::auth::refresh_token::{
    find_refresh_token, revoke_all_user_tokens, revoke_refresh_token, save_refresh_token,
};
use crate::configuration::Settings;
use crate::error::{AppError, AuthError, StoreError};
use crate::store::{CredentialStore, NewUser, Profile, RefreshTokenRecord, UserIdentity};
use crate::validators::{
    is_valid_age, is_valid_first_name, is_valid_handle, is_valid_password, is_valid_phone_number,
    MAX_PASSWORD_LENGTH,
};

pub const TOKEN_TYPE: &str = "bearer";

/// Hashed once at startup and verified against when a handle is unknown, so
/// that both login failure paths cost one bcrypt verification.
const TIMING_DECOY_PASSWORD: &str = "timing-decoy-password";

/// A registration request
pub struct Registration {
    pub handle: String,
    pub password: String,
    pub profile: Profile,
}

/// A login request as seen by the rate limiter and the service
pub struct LoginAttempt {
    handle: String,
    password: String,
    client_ip: Option<String>,
}

impl LoginAttempt {
    pub fn new(handle: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            handle: handle.into().trim().to_string(),
            password: password.into(),
            client_ip: None,
        }
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }
}

impl fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("handle", &self.handle)
            .field("client_ip", &self.client_ip)
            .finish_non_exhaustive()
    }
}

/// Tokens returned by a successful login
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
}

/// Tokens returned by a successful refresh
///
/// `refresh_token` is only present when rotation is enabled.
#[derive(Debug, Serialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: &'static str,
}

/// Lifetimes and reuse rules for issued tokens
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub rotate_refresh_tokens: bool,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    codec: TokenCodec,
    limiter: RateLimiter,
    rate_limit_key: Arc<dyn RateLimitKey>,
    policy: TokenPolicy,
    decoy_hash: String,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
        codec: TokenCodec,
        limiter: RateLimiter,
        rate_limit_key: Arc<dyn RateLimitKey>,
        policy: TokenPolicy,
    ) -> Result<Self, AppError> {
        let decoy_hash = hasher.hash(TIMING_DECOY_PASSWORD)?;

        Ok(Self {
            store,
            hasher,
            codec,
            limiter,
            rate_limit_key,
            policy,
            decoy_hash,
        })
    }

    /// Wire the service from validated settings
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, AppError> {
        settings.validate()?;

        let codec = TokenCodec::new(&settings.jwt.secret, settings.jwt.algorithm()?);
        let policy = TokenPolicy {
            access_ttl: settings.jwt.access_token_ttl()?,
            refresh_ttl: settings.jwt.refresh_token_ttl()?,
            rotate_refresh_tokens: settings.jwt.rotate_refresh_tokens,
        };
        let limiter = RateLimiter::new(
            settings.rate_limit.max_attempts,
            settings.rate_limit.window(),
        );

        Self::new(
            store,
            Arc::new(BcryptHasher::new(settings.password.bcrypt_cost)),
            codec,
            limiter,
            key_strategy(settings.rate_limit.key),
            policy,
        )
    }

    /// Create a new identity; no tokens are issued
    pub async fn register(&self, registration: Registration) -> Result<UserIdentity, AppError> {
        let handle = is_valid_handle(&registration.handle)?;
        is_valid_password(&registration.password)?;
        let profile = Profile {
            first_name: is_valid_first_name(registration.profile.first_name.as_deref())?,
            phone_number: is_valid_phone_number(registration.profile.phone_number.as_deref())?,
            age: is_valid_age(registration.profile.age)?,
        };

        let password_hash = self.hash_password(registration.password).await?;

        let new_user = NewUser {
            handle,
            password_hash,
            profile,
        };
        match self.store.create_user(new_user).await {
            Ok(user) => {
                tracing::info!(user_id = user.id, "User registered");
                Ok(user)
            }
            Err(StoreError::UniqueViolation(_)) => Err(AuthError::DuplicateHandle.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Exchange a handle and password for an access/refresh token pair
    ///
    /// The rate limiter is consulted before the store so a denied caller
    /// learns nothing about the handle it submitted.
    pub async fn login(&self, attempt: LoginAttempt) -> Result<TokenPair, AppError> {
        let key = self.rate_limit_key.key_for(&attempt);
        if let Admission::Denied { retry_after } = self.limiter.admit(&key).await {
            return Err(AuthError::RateLimited {
                retry_after_secs: whole_seconds(retry_after),
            }
            .into());
        }

        // No stored password exceeds the bcrypt input limit, and bcrypt would
        // ignore the excess, so an oversized password is checked against the
        // decoy only and can never match.
        let oversized = attempt.password.len() > MAX_PASSWORD_LENGTH;
        let user = self.store.find_user_by_handle(&attempt.handle).await?;
        let hash = match &user {
            Some(user) if !oversized => user.password_hash.clone(),
            _ => self.decoy_hash.clone(),
        };
        let password_matches =
            self.verify_password(attempt.password, hash).await? && !oversized;

        let user = match user {
            Some(user) if password_matches => user,
            _ => {
                tracing::warn!(rate_limit_key = %key, "Login rejected");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let access_token = self.issue(&user, TokenKind::Access)?;
        let refresh_token = self.issue(&user, TokenKind::Refresh)?;
        save_refresh_token(self.store.as_ref(), user.id, &refresh_token).await?;

        tracing::info!(user_id = user.id, "User logged in");

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE,
        })
    }

    /// Mint a new access token from a live refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, AppError> {
        let record = self.resolve_refresh_token(refresh_token).await?;
        let user = self
            .store
            .find_user_by_id(record.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let access_token = self.issue(&user, TokenKind::Access)?;

        let rotated = if self.policy.rotate_refresh_tokens {
            // Losing this race to a concurrent refresh or logout invalidates the caller
            if !revoke_refresh_token(self.store.as_ref(), refresh_token).await? {
                return Err(AuthError::InvalidToken.into());
            }
            let replacement = self.issue(&user, TokenKind::Refresh)?;
            save_refresh_token(self.store.as_ref(), user.id, &replacement).await?;
            Some(replacement)
        } else {
            None
        };

        tracing::info!(
            user_id = user.id,
            rotated = rotated.is_some(),
            "Access token refreshed"
        );

        Ok(RefreshedTokens {
            access_token,
            refresh_token: rotated,
            token_type: TOKEN_TYPE,
        })
    }

    /// Revoke one refresh token
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AppError> {
        if !revoke_refresh_token(self.store.as_ref(), refresh_token).await? {
            tracing::warn!("Logout with unknown refresh token");
            return Err(AuthError::InvalidToken.into());
        }
        tracing::info!("Refresh token revoked");
        Ok(())
    }

    /// Revoke every refresh token held by the owner of `refresh_token`
    pub async fn logout_all(&self, refresh_token: &str) -> Result<u64, AppError> {
        let record = self.resolve_refresh_token(refresh_token).await?;
        revoke_all_user_tokens(self.store.as_ref(), record.user_id).await
    }

    /// Verify an access token presented on a protected request
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AppError> {
        let claims = self.codec.verify(access_token).map_err(|e| {
            match e {
                TokenError::Expired => tracing::debug!("Access token expired"),
                _ => tracing::warn!(reason = %e, "Access token rejected"),
            }
            AuthError::InvalidToken
        })?;

        if claims.kind != TokenKind::Access {
            tracing::warn!("Refresh token presented as access token");
            return Err(AuthError::InvalidToken.into());
        }
        Ok(claims)
    }

    /// Load the identity an access token was issued to
    pub async fn current_user(&self, claims: &AccessClaims) -> Result<UserIdentity, AppError> {
        self.store
            .find_user_by_handle(claims.subject())
            .await?
            .ok_or_else(|| AuthError::InvalidToken.into())
    }

    fn issue(&self, user: &UserIdentity, kind: TokenKind) -> Result<String, AppError> {
        let ttl = match kind {
            TokenKind::Access => self.policy.access_ttl,
            TokenKind::Refresh => self.policy.refresh_ttl,
        };
        self.codec.issue(&user.handle, kind, ttl)
    }

    /// Find the live record for a refresh token and check the token itself
    ///
    /// Expired tokens are removed from the store on the way out.
    async fn resolve_refresh_token(&self, token: &str) -> Result<RefreshTokenRecord, AppError> {
        let Some(record) = find_refresh_token(self.store.as_ref(), token).await? else {
            tracing::warn!("Unknown refresh token presented");
            return Err(AuthError::InvalidToken.into());
        };

        match self.codec.verify(token) {
            Ok(claims) if claims.kind == TokenKind::Refresh => Ok(record),
            Ok(_) => Err(AuthError::InvalidToken.into()),
            Err(TokenError::Expired) => {
                revoke_refresh_token(self.store.as_ref(), token).await?;
                tracing::info!(user_id = record.user_id, "Expired refresh token removed");
                Err(AuthError::InvalidToken.into())
            }
            Err(e) => {
                tracing::error!(
                    user_id = record.user_id,
                    reason = %e,
                    "Stored refresh token failed verification"
                );
                Err(AuthError::InvalidToken.into())
            }
        }
    }

    async fn hash_password(&self, password: String) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password)).await?
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        Ok(tokio::task::spawn_blocking(move || hasher.verify(&password, &hash)).await?)
    }
}

/// Round a retry delay up to whole seconds, never below one
fn whole_seconds(delay: StdDuration) -> u64 {
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    secs.max(1)
}
