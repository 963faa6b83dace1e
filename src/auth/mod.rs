/// Authentication primitives
///
/// Password hashing, access-token signing and validation, and refresh
/// secret generation.

mod claims;
mod jwt;
mod password;
mod refresh_token;

pub use claims::Claims;
pub use jwt::TokenSigner;
pub use password::{HashError, PasswordHasher};
pub use refresh_token::{fingerprint, generate_refresh_secret};
