use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{ProviderLinkRepository, RefreshTokenRepository, RepositoryError, UserRepository};
use crate::auth::fingerprint;
use crate::models::{AuthProvider, AuthProviderLink, RefreshTokenRecord, User};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    links: HashMap<Uuid, AuthProviderLink>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
}

/// Process-local account store.
///
/// Enforces the same unique constraints and conditional revoke as the
/// Postgres schema. Used by tests and database-less local runs.
#[derive(Default)]
pub struct InMemoryAccountRepository {
    state: Mutex<State>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Storage("account store lock poisoned".to_string()))
    }

    pub fn user_count(&self) -> usize {
        self.state().map(|s| s.users.len()).unwrap_or(0)
    }

    pub fn refresh_record_count(&self) -> usize {
        self.state().map(|s| s.refresh_tokens.len()).unwrap_or(0)
    }
}

#[async_trait]
impl UserRepository for InMemoryAccountRepository {
    async fn create_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if state.users.contains_key(&user.id) {
            return Err(RepositoryError::Conflict("users_pkey".to_string()));
        }
        if !user.email.is_empty() && state.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict("users_email_key".to_string()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        if email.is_empty() {
            return Ok(None);
        }
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if !user.email.is_empty()
            && state
                .users
                .values()
                .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(RepositoryError::Conflict("users_email_key".to_string()));
        }
        if let Some(existing) = state.users.get_mut(&user.id) {
            *existing = user.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderLinkRepository for InMemoryAccountRepository {
    async fn create_provider_link(&self, link: &AuthProviderLink) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        for existing in state.links.values() {
            if existing.provider == link.provider
                && existing.provider_subject == link.provider_subject
            {
                return Err(RepositoryError::Conflict(
                    "auth_providers_provider_subject_key".to_string(),
                ));
            }
            if existing.provider == link.provider && existing.user_id == link.user_id {
                return Err(RepositoryError::Conflict(
                    "auth_providers_user_provider_key".to_string(),
                ));
            }
        }
        state.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn get_link_by_provider_subject(
        &self,
        provider: AuthProvider,
        subject: &str,
    ) -> Result<Option<AuthProviderLink>, RepositoryError> {
        Ok(self
            .state()?
            .links
            .values()
            .find(|l| l.provider == provider && l.provider_subject == subject)
            .cloned())
    }

    async fn get_links_by_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AuthProviderLink>, RepositoryError> {
        let mut links: Vec<AuthProviderLink> = self
            .state()?
            .links
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.created_at);
        Ok(links)
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryAccountRepository {
    async fn create_refresh_record(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state()?;
        if state
            .refresh_tokens
            .values()
            .any(|r| r.token_hash == record.token_hash)
        {
            return Err(RepositoryError::Conflict(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }
        state.refresh_tokens.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_refresh_record_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<RefreshTokenRecord>, RepositoryError> {
        let token_hash = fingerprint(secret);
        Ok(self
            .state()?
            .refresh_tokens
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_record(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.state()?;
        match state.refresh_tokens.get_mut(&id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_records_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let mut revoked = 0;
        for record in state.refresh_tokens.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired_refresh_records(&self) -> Result<u64, RepositoryError> {
        let mut state = self.state()?;
        let now = Utc::now();
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, r| r.expires_at >= now);
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}
