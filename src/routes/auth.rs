/// Authentication Routes
///
/// Thin HTTP adapters over `SessionService`: shape validation in, `TokenPair`
/// or `UserProfile` out. Status codes come from the `AppError` mapping.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::{AppError, ErrorContext, ValidationError};
use crate::middleware::AuthenticatedUser;
use crate::session::SessionService;
use crate::validators::{is_valid_email, is_valid_name, is_valid_password, is_valid_token};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of both social login endpoints
#[derive(Deserialize)]
pub struct SocialLoginRequest {
    pub id_token: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Runs a session operation, logging failures under the given context
async fn traced<T, F>(context: ErrorContext, operation: F) -> Result<T, AppError>
where
    F: std::future::Future<Output = Result<T, AppError>>,
{
    operation.await.map_err(|e| {
        context.log_error(&e);
        e
    })
}

/// POST /api/auth/register
///
/// # Errors
/// - 400: invalid email, password length or name
/// - 409: email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    is_valid_password(&form.password)?;
    let name = is_valid_name(&form.name)?;

    let context = ErrorContext::new("user_registration");
    let pair = traced(context, sessions.register(&email, &form.password, &name)).await?;

    Ok(HttpResponse::Created().json(pair))
}

/// POST /api/auth/login
///
/// Unknown email and wrong password produce the same 401.
pub async fn login(
    form: web::Json<LoginRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&form.email)?;
    if form.password.is_empty() {
        return Err(ValidationError::EmptyField("password").into());
    }

    let context = ErrorContext::new("user_login");
    let pair = traced(context, sessions.login(&email, &form.password)).await?;

    Ok(HttpResponse::Ok().json(pair))
}

/// POST /api/auth/google
pub async fn google_login(
    form: web::Json<SocialLoginRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let id_token = is_valid_token("id_token", &form.id_token)?;

    let context = ErrorContext::new("google_login");
    let pair = traced(context, sessions.google_login(&id_token)).await?;

    Ok(HttpResponse::Ok().json(pair))
}

/// POST /api/auth/apple
pub async fn apple_login(
    form: web::Json<SocialLoginRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let id_token = is_valid_token("id_token", &form.id_token)?;

    let context = ErrorContext::new("apple_login");
    let pair = traced(context, sessions.apple_login(&id_token)).await?;

    Ok(HttpResponse::Ok().json(pair))
}

/// POST /api/auth/refresh
///
/// The presented refresh token is revoked; a second use returns 401.
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let refresh_token = is_valid_token("refresh_token", &form.refresh_token)?;

    let context = ErrorContext::new("token_refresh");
    let pair = traced(context, sessions.refresh(&refresh_token)).await?;

    Ok(HttpResponse::Ok().json(pair))
}

/// GET /api/auth/me
///
/// **Requires a valid access token**; the user is injected by `JwtMiddleware`.
pub async fn get_current_user(
    user: web::ReqData<AuthenticatedUser>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("current_user");
    let profile = traced(context, sessions.current_user(user.user_id)).await?;

    Ok(HttpResponse::Ok().json(profile))
}
