/// Authentication module
///
/// Token signing/verification, password hashing, login rate limiting,
/// refresh token persistence, and the service that ties them together.

mod claims;
mod jwt;
mod password;
mod rate_limit;
mod refresh_token;
mod service;

pub use claims::{AccessClaims, TokenKind};
pub use jwt::{TokenCodec, TokenError};
pub use password::{BcryptHasher, PasswordHasher};
pub use rate_limit::{
    key_strategy, Admission, GlobalKey, PerClientKey, PerHandleKey, RateLimitKey, RateLimiter,
};
pub use refresh_token::fingerprint;
pub use service::{
    AuthService, LoginAttempt, RefreshedTokens, Registration, TokenPair, TokenPolicy, TOKEN_TYPE,
};
