use std::net::TcpListener;
use std::sync::Arc;

use authkeeper::auth::{PasswordHasher, TokenSigner};
use authkeeper::configuration::get_configuration;
use authkeeper::identity::CompositeVerifier;
use authkeeper::repository::{AccountRepository, PgAccountRepository};
use authkeeper::session::SessionService;
use authkeeper::startup::run;
use authkeeper::sweeper::spawn_sweeper;
use authkeeper::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(startup_error(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    tracing::info!(
        host = %configuration.database.host,
        database = %configuration.database.database_name,
        "Connecting to database"
    );
    let pg = PgAccountRepository::connect(&configuration.database)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    pg.migrate().await.map_err(|e| {
        tracing::error!("Failed to apply migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, "Database migration error")
    })?;
    tracing::info!("Database ready");

    let verifier = CompositeVerifier::from_settings(&configuration.social).map_err(|e| {
        tracing::error!("Failed to initialize identity verifiers: {}", e);
        startup_error(std::io::ErrorKind::Other, "Identity verifier error")
    })?;

    let repository: Arc<dyn AccountRepository> = Arc::new(pg);
    let signer = TokenSigner::new(&configuration.jwt);
    let sessions = SessionService::new(
        repository.clone(),
        Arc::new(verifier),
        PasswordHasher::new(configuration.password.bcrypt_cost),
        signer.clone(),
    );

    let _sweeper = spawn_sweeper(repository, configuration.sweeper.interval_seconds);

    let address = configuration.application.address();
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(
        listener,
        sessions,
        signer,
        configuration.application.allowed_origins,
    )?
    .await
}
