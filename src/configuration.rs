use std::str::FromStr;
use std::time::Duration;

use config::ConfigError;
use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::error::ConfigError as InvalidConfig;

/// Minimum length of the HMAC signing secret in bytes
const MIN_SECRET_LENGTH: usize = 32;
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;

#[derive(Deserialize, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    pub jwt: JwtSettings,
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub password: PasswordSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub store: StoreBackend,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Which credential store the server runs against
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Deserialize, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
    }

    pub fn with_db(&self) -> PgConnectOptions {
        self.without_db().database(&self.database_name)
    }
}

/// Token signing settings
#[derive(Deserialize, Debug)]
pub struct JwtSettings {
    #[serde(deserialize_with = "deserialize_secret")]
    pub secret: SecretString,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    /// Replace the refresh token on every refresh instead of reusing it until logout
    #[serde(default)]
    pub rotate_refresh_tokens: bool,
}

impl JwtSettings {
    /// Parse the configured algorithm, accepting only the HMAC family
    pub fn algorithm(&self) -> Result<Algorithm, InvalidConfig> {
        let algorithm = Algorithm::from_str(&self.algorithm).map_err(|_| {
            InvalidConfig::InvalidValue(format!("jwt.algorithm `{}` is unknown", self.algorithm))
        })?;

        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
            _ => Err(InvalidConfig::InvalidValue(format!(
                "jwt.algorithm `{}` is not a shared-secret algorithm",
                self.algorithm
            ))),
        }
    }

    pub fn access_token_ttl(&self) -> Result<chrono::Duration, InvalidConfig> {
        positive_ttl(
            "jwt.access_token_expire_minutes",
            self.access_token_expire_minutes,
            chrono::Duration::try_minutes,
        )
    }

    pub fn refresh_token_ttl(&self) -> Result<chrono::Duration, InvalidConfig> {
        positive_ttl(
            "jwt.refresh_token_expire_days",
            self.refresh_token_expire_days,
            chrono::Duration::try_days,
        )
    }
}

fn positive_ttl(
    name: &str,
    value: i64,
    build: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration, InvalidConfig> {
    if value <= 0 {
        return Err(InvalidConfig::InvalidValue(format!("{} must be positive", name)));
    }
    build(value).ok_or_else(|| InvalidConfig::InvalidValue(format!("{} is too large", name)))
}

/// Login admission budget
#[derive(Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    pub max_attempts: u32,
    pub window_seconds: u64,
    #[serde(default)]
    pub key: RateLimitKeyKind,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// How login attempts are grouped into budgets
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKeyKind {
    /// One budget for the whole login endpoint
    #[default]
    Global,
    Handle,
    ClientIp,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PasswordSettings {
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl Settings {
    /// Reject settings the server must not start with
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.jwt.secret.expose_secret().len() < MIN_SECRET_LENGTH {
            return Err(InvalidConfig::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        self.jwt.algorithm()?;
        self.jwt.access_token_ttl()?;
        self.jwt.refresh_token_ttl()?;

        if self.rate_limit.max_attempts == 0 {
            return Err(InvalidConfig::InvalidValue(
                "rate_limit.max_attempts must be positive".to_string(),
            ));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(InvalidConfig::InvalidValue(
                "rate_limit.window_seconds must be positive".to_string(),
            ));
        }

        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.password.bcrypt_cost) {
            return Err(InvalidConfig::InvalidValue(format!(
                "password.bcrypt_cost must be within {}..={}",
                MIN_BCRYPT_COST, MAX_BCRYPT_COST
            )));
        }

        if self.application.store == StoreBackend::Postgres && self.database.is_none() {
            return Err(InvalidConfig::MissingRequired(
                "database section is required for the postgres store".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load settings from `configuration.{yaml,toml,json}` overlaid by
/// `APP_<SECTION>__<KEY>` environment variables.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
