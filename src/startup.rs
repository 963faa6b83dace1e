use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::header;
use actix_web::{error::JsonPayloadError, middleware::Logger, web, App, HttpRequest, HttpServer};
use std::net::TcpListener;

use crate::auth::TokenSigner;
use crate::error::{AppError, ValidationError};
use crate::logger::RequestLogger;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    apple_login, get_current_user, google_login, health_check, login, refresh, register,
};
use crate::session::SessionService;

/// Malformed or incomplete JSON bodies become a structured 400
fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    tracing::debug!(error = %err, "Rejected request body");
    AppError::from(ValidationError::InvalidFormat("request body")).into()
}

/// Browser clients call the API cross-origin with bearer tokens
fn cors(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(300)
}

pub fn run(
    listener: TcpListener,
    sessions: SessionService,
    signer: TokenSigner,
    allowed_origins: Vec<String>,
) -> Result<Server, std::io::Error> {
    let sessions = web::Data::new(sessions);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(cors(&allowed_origins))
            .wrap(Logger::default())
            .wrap(RequestLogger)
            // Shared state
            .app_data(sessions.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .route("/health", web::get().to(health_check))
            .service(
                web::scope("/api/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/google", web::post().to(google_login))
                    .route("/apple", web::post().to(apple_login))
                    .route("/refresh", web::post().to(refresh))
                    // Protected routes (require a bearer access token)
                    .service(
                        web::resource("/me")
                            .wrap(JwtMiddleware::new(signer.clone()))
                            .route(web::get().to(get_current_user)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
