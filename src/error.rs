/// Error Handling Module
///
/// Unified error handling for the authentication service:
/// 1. Domain-specific error types (validation, authentication)
/// 2. A single `AppError` used for control flow inside the service
/// 3. HTTP response mapping with structured, detail-free bodies
/// 4. Structured error logging with a correlating error id

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};

use crate::auth::HashError;
use crate::identity::IdentityError;
use crate::repository::RepositoryError;

// ============================================================================
// 1. DOMAIN-SPECIFIC ERROR TYPES
// ============================================================================

/// Request-shape validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is empty")]
    EmptyField(&'static str),
    #[error("{0} is too short (minimum {1} characters)")]
    TooShort(&'static str, usize),
    #[error("{0} is too long (maximum {1} characters)")]
    TooLong(&'static str, usize),
    #[error("{0} has invalid format")]
    InvalidFormat(&'static str),
    #[error("{0} contains suspicious content")]
    SuspiciousContent(&'static str),
}

/// Authentication outcomes surfaced to callers.
///
/// `InvalidCredentials` deliberately covers unknown email, wrong password and
/// password-less accounts alike. `InvalidToken` covers every access, refresh
/// and identity token failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("email already registered")]
    EmailAlreadyExists,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("missing authentication token")]
    MissingToken,
}

// ============================================================================
// 2. UNIFIED APPLICATION ERROR TYPE
// ============================================================================

/// Central error type that all service errors map to
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Hashing(#[from] HashError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Authentication kind carried by this error, if any
    pub fn auth_kind(&self) -> Option<AuthError> {
        match self {
            AppError::Auth(kind) => Some(*kind),
            _ => None,
        }
    }

    fn is_client_fault(&self) -> bool {
        matches!(self, AppError::Validation(_) | AppError::Auth(_))
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response body for HTTP responses
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Unique error ID, also attached to the log line
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: &str, status: StatusCode) -> Self {
        Self {
            error_id,
            message,
            code: code.to_string(),
            status: status.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Converts errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, error_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, error_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, error_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),
            AppError::Auth(e) => {
                let code = match e {
                    AuthError::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
                    AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
                    AuthError::InvalidToken => "TOKEN_INVALID",
                    AuthError::MissingToken => "MISSING_TOKEN",
                };
                (ResponseError::status_code(self), code, e.to_string())
            }
            // Storage, identity-provider and hashing failures never leak detail
            AppError::Repository(_)
            | AppError::Identity(_)
            | AppError::Hashing(_)
            | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "internal server error".to_string(),
            ),
        };

        let body = ErrorResponse::new(error_id.to_string(), message, code, status);
        (status, body)
    }

    fn log_error(&self, error_id: &str) {
        if self.is_client_fault() {
            tracing::warn!(error_id = error_id, error = %self, "Request rejected");
        } else {
            tracing::error!(error_id = error_id, error = %self, "Request failed");
        }
    }
}

/// Actix-web integration
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let error_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&error_id);

        let (status, body) = <Self as ErrorHandler>::error_response(self, &error_id);
        HttpResponse::build(status).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::EmailAlreadyExists) => StatusCode::CONFLICT,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT
// ============================================================================

/// Per-operation context attached to log lines
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub operation: &'static str,
}

impl ErrorContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            operation,
        }
    }

    pub fn log_error(&self, error: &AppError) {
        if error.is_client_fault() {
            tracing::warn!(
                request_id = %self.request_id,
                operation = self.operation,
                error = %error,
                "Operation rejected"
            );
        } else {
            tracing::error!(
                request_id = %self.request_id,
                operation = self.operation,
                error = %error,
                "Operation failed"
            );
        }
    }
}
