mod auth;
mod health_check;

pub use auth::{apple_login, get_current_user, google_login, login, refresh, register};
pub use health_check::health_check;
