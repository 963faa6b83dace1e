/// Account Repository Contract
///
/// Persistence for users, provider links and refresh-token records. Lookups
/// return `Ok(None)` (or an empty `Vec`) for "not found"; only storage
/// failures are errors.
///
/// Uniqueness and single-use guarantees live here, not in the session
/// service:
/// - `users.email` is unique (empty email exempt)
/// - `(provider, provider_subject)` is unique, as is `(user_id, provider)`
/// - `revoke_refresh_record` is an atomic conditional update

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AuthProvider, AuthProviderLink, RefreshTokenRecord, User};

mod memory;
mod postgres;

pub use memory::InMemoryAccountRepository;
pub use postgres::PgAccountRepository;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// A unique constraint rejected the write; carries the constraint name
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<(), RepositoryError>;
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;
    /// Never matches an empty email
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    async fn update_user(&self, user: &User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProviderLinkRepository: Send + Sync {
    async fn create_provider_link(&self, link: &AuthProviderLink) -> Result<(), RepositoryError>;
    async fn get_link_by_provider_subject(
        &self,
        provider: AuthProvider,
        subject: &str,
    ) -> Result<Option<AuthProviderLink>, RepositoryError>;
    async fn get_links_by_user(&self, user_id: Uuid)
        -> Result<Vec<AuthProviderLink>, RepositoryError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn create_refresh_record(&self, record: &RefreshTokenRecord)
        -> Result<(), RepositoryError>;
    /// Looks the record up by the fingerprint of the presented secret
    async fn get_refresh_record_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError>;
    /// Returns `true` only for the caller that flipped `revoked` to true
    async fn revoke_refresh_record(&self, id: Uuid) -> Result<bool, RepositoryError>;
    /// Returns how many records were revoked
    async fn revoke_all_refresh_records_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<u64, RepositoryError>;
    /// Returns how many records were deleted
    async fn delete_expired_refresh_records(&self) -> Result<u64, RepositoryError>;
}

/// The full contract consumed by the session service
pub trait AccountRepository:
    UserRepository + ProviderLinkRepository + RefreshTokenRepository
{
}

impl<T> AccountRepository for T where
    T: UserRepository + ProviderLinkRepository + RefreshTokenRepository
{
}
