use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgDatabaseError, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ProviderLinkRepository, RefreshTokenRepository, RepositoryError, UserRepository};
use crate::auth::fingerprint;
use crate::configuration::DatabaseSettings;
use crate::models::{AuthProvider, AuthProviderLink, RefreshTokenRecord, User};

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                let constraint = db_err
                    .try_downcast_ref::<PgDatabaseError>()
                    .and_then(|e| e.constraint())
                    .unwrap_or("unique")
                    .to_string();
                return RepositoryError::Conflict(constraint);
            }
        }
        RepositoryError::Storage(err.to_string())
    }
}

/// Postgres-backed account store.
///
/// Empty emails are stored as NULL so the unique index ignores them.
#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool for the configured database
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.connection_string())
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("migration failed: {}", e)))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: Option<String>,
    name: String,
    password_hash: Option<String>,
    avatar_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email.unwrap_or_default(),
            name: row.name,
            password_hash: row.password_hash,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    provider_subject: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LinkRow> for AuthProviderLink {
    type Error = RepositoryError;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider.parse().map_err(RepositoryError::Storage)?,
            provider_subject: row.provider_subject,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    expires_at: DateTime<Utc>,
    revoked: bool,
    created_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            revoked: row.revoked,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl UserRepository for PgAccountRepository {
    async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, password_hash, avatar_url, created_at, updated_at)
            VALUES ($1, NULLIF($2, ''), $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.avatar_url)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, password_hash, avatar_url, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        if email.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email, name, password_hash, avatar_url, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn update_user(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE users
            SET email = NULLIF($2, ''), name = $3, password_hash = $4, avatar_url = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.avatar_url)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProviderLinkRepository for PgAccountRepository {
    async fn create_provider_link(&self, link: &AuthProviderLink) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO auth_providers (id, user_id, provider, provider_subject, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(link.id)
        .bind(link.user_id)
        .bind(link.provider.as_str())
        .bind(&link.provider_subject)
        .bind(link.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_link_by_provider_subject(
        &self,
        provider: AuthProvider,
        subject: &str,
    ) -> Result<Option<AuthProviderLink>, RepositoryError> {
        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT id, user_id, provider, provider_subject, created_at
            FROM auth_providers
            WHERE provider = $1 AND provider_subject = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AuthProviderLink::try_from).transpose()
    }

    async fn get_links_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AuthProviderLink>, RepositoryError> {
        let rows = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT id, user_id, provider, provider_subject, created_at
            FROM auth_providers
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuthProviderLink::try_from).collect()
    }
}

#[async_trait]
impl RefreshTokenRepository for PgAccountRepository {
    async fn create_refresh_record(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, revoked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.revoked)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_refresh_record_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, user_id, token_hash, expires_at, revoked, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(fingerprint(secret))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn revoke_refresh_record(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $1
            WHERE id = $2 AND revoked = FALSE
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_refresh_records_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $1
            WHERE user_id = $2 AND revoked = FALSE
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_refresh_records(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
