use actix_web::web;
use phone_auth::auth::AuthService;
use phone_auth::configuration::get_configuration;
use phone_auth::startup::{build_store, run};
use phone_auth::telemetry::init_telemetry;
use std::net::TcpListener;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry("info");

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    if let Err(e) = configuration.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Configuration error",
        ));
    }
    tracing::info!(
        store = ?configuration.application.store,
        rate_limit_key = ?configuration.rate_limit.key,
        "Configuration loaded successfully"
    );

    let store = build_store(&configuration).await.map_err(|e| {
        tracing::error!("Failed to open credential store: {}", e);
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Store error")
    })?;

    let auth_service = AuthService::from_settings(&configuration, store).map_err(|e| {
        tracing::error!("Failed to build authentication service: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, "Startup error")
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, web::Data::new(auth_service))?.await
}
