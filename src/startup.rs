use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::configuration::{Settings, StoreBackend};
use crate::error::{AppError, ConfigError};
use crate::middleware::{JwtMiddleware, RequestLogger};
use crate::routes::{get_current_user, health_check, login, logout, logout_all, refresh, register};
use crate::store::{CredentialStore, InMemoryCredentialStore, PgCredentialStore};

/// Open the configured credential store
///
/// The Postgres backend connects eagerly and applies pending migrations
/// before the server accepts traffic.
pub async fn build_store(settings: &Settings) -> Result<Arc<dyn CredentialStore>, AppError> {
    match settings.application.store {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory credential store; data is lost on restart");
            Ok(Arc::new(InMemoryCredentialStore::new()))
        }
        StoreBackend::Postgres => {
            let database = settings.database.as_ref().ok_or_else(|| {
                ConfigError::MissingRequired("database section".to_string())
            })?;

            tracing::info!(
                host = %database.host,
                database = %database.database_name,
                "Connecting to Postgres"
            );
            let pool = PgPoolOptions::new()
                .max_connections(database.max_connections)
                .connect_with(database.with_db())
                .await?;

            let store = PgCredentialStore::new(pool);
            store.migrate().await?;
            tracing::info!("Database migrations applied");
            Ok(Arc::new(store))
        }
    }
}

pub fn run(
    listener: TcpListener,
    auth_service: web::Data<AuthService>,
) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(auth_service.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout))
                    .route("/logout_all", web::post().to(logout_all))
                    // Protected routes (require a valid access token)
                    .service(
                        web::resource("/me")
                            .wrap(JwtMiddleware::new(auth_service.clone()))
                            .route(web::get().to(get_current_user)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
