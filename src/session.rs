/// Session Service
///
/// Coordinates hashing, identity verification, the account repository and
/// token signing to implement register, login, social login and refresh.
///
/// # Account linking
/// A social login resolves its user by, in order:
/// 1. the `(provider, subject)` link
/// 2. an existing user with the verified email (merge)
/// 3. a brand-new password-less user
///
/// # Refresh rotation
/// The presented record is revoked before anything new is issued. A failure
/// after revocation leaves the caller without a usable refresh token.
///
/// Nothing is cached between calls; every operation re-reads the repository.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{PasswordHasher, TokenSigner};
use crate::error::{AppError, AuthError};
use crate::identity::{IdentityError, SocialVerifier, VerifiedIdentity};
use crate::models::{AuthProvider, AuthProviderLink, RefreshTokenRecord, TokenPair, User, UserProfile};
use crate::repository::{AccountRepository, RepositoryError};

#[derive(Clone)]
pub struct SessionService {
    repository: Arc<dyn AccountRepository>,
    verifier: Arc<dyn SocialVerifier>,
    hasher: PasswordHasher,
    signer: TokenSigner,
}

impl SessionService {
    pub fn new(
        repository: Arc<dyn AccountRepository>,
        verifier: Arc<dyn SocialVerifier>,
        hasher: PasswordHasher,
        signer: TokenSigner,
    ) -> Self {
        Self {
            repository,
            verifier,
            hasher,
            signer,
        }
    }

    /// Create a password account and sign it in
    ///
    /// # Errors
    /// - `EmailAlreadyExists` if the email is taken, including when a
    ///   concurrent registration wins the unique constraint
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<TokenPair, AppError> {
        if self.repository.get_user_by_email(email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists.into());
        }

        let password_hash = self.hash_password(password).await?;
        let user = User::new(email.to_string(), name.to_string(), Some(password_hash));

        match self.repository.create_user(&user).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(constraint)) => {
                tracing::info!(constraint = %constraint, "Registration lost email uniqueness race");
                return Err(AuthError::EmailAlreadyExists.into());
            }
            Err(e) => return Err(e.into()),
        }

        let link = AuthProviderLink::new(user.id, AuthProvider::Email, user.email.clone());
        self.repository.create_provider_link(&link).await?;

        tracing::info!(user_id = %user.id, "User registered");
        self.issue_tokens(&user).await
    }

    /// Password login.
    ///
    /// Unknown email, password-less account and wrong password all fail with
    /// the same `InvalidCredentials`.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let user = self
            .repository
            .get_user_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let password_hash = user
            .password_hash
            .clone()
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.verify_password(password, password_hash).await? {
            return Err(AuthError::InvalidCredentials.into());
        }

        tracing::info!(user_id = %user.id, "User logged in");
        self.issue_tokens(&user).await
    }

    pub async fn google_login(&self, id_token: &str) -> Result<TokenPair, AppError> {
        let identity = self.verifier.verify_google(id_token).await;
        self.social_login(AuthProvider::Google, identity).await
    }

    pub async fn apple_login(&self, id_token: &str) -> Result<TokenPair, AppError> {
        let identity = self.verifier.verify_apple(id_token).await;
        self.social_login(AuthProvider::Apple, identity).await
    }

    /// Redeem a refresh secret for a new pair, revoking it.
    ///
    /// Unknown, revoked, expired and concurrently-redeemed secrets are all
    /// `InvalidToken`, as is a user deleted since issuance.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let record = self
            .repository
            .get_refresh_record_by_secret(refresh_token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if !record.is_usable(Utc::now()) {
            tracing::info!(user_id = %record.user_id, revoked = record.revoked, "Stale refresh token presented");
            return Err(AuthError::InvalidToken.into());
        }

        if !self.repository.revoke_refresh_record(record.id).await? {
            tracing::warn!(user_id = %record.user_id, "Refresh token replay lost the revoke race");
            return Err(AuthError::InvalidToken.into());
        }

        let user = self
            .repository
            .get_user_by_id(record.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        tracing::info!(user_id = %user.id, "Refresh token rotated");
        self.issue_tokens(&user).await
    }

    /// Profile of the user behind a verified access token
    pub async fn current_user(&self, user_id: Uuid) -> Result<UserProfile, AppError> {
        let user = self
            .repository
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let providers = self
            .repository
            .get_links_by_user(user_id)
            .await?
            .into_iter()
            .map(|link| link.provider)
            .collect();

        Ok(UserProfile { user, providers })
    }

    /// Revoke every outstanding refresh token of a user; returns the count
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, AppError> {
        let revoked = self
            .repository
            .revoke_all_refresh_records_for_user(user_id)
            .await?;
        tracing::info!(user_id = %user_id, revoked, "Revoked all sessions");
        Ok(revoked)
    }

    async fn social_login(
        &self,
        provider: AuthProvider,
        identity: Result<VerifiedIdentity, IdentityError>,
    ) -> Result<TokenPair, AppError> {
        let identity = match identity {
            Ok(identity) => identity,
            Err(IdentityError::Rejected(reason)) => {
                tracing::info!(provider = %provider, reason = %reason, "Identity token rejected");
                return Err(AuthError::InvalidToken.into());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(link) = self
            .repository
            .get_link_by_provider_subject(provider, &identity.subject)
            .await?
        {
            let user = self
                .repository
                .get_user_by_id(link.user_id)
                .await?
                .ok_or(AuthError::InvalidToken)?;
            tracing::info!(user_id = %user.id, provider = %provider, "Returning social login");
            return self.issue_tokens(&user).await;
        }

        let user = self.resolve_social_user(&identity).await?;
        let user = self.link_provider(provider, &identity.subject, user).await?;

        self.issue_tokens(&user).await
    }

    /// Existing user with the verified email, or a new password-less one
    async fn resolve_social_user(&self, identity: &VerifiedIdentity) -> Result<User, AppError> {
        if let Some(mut user) = self.repository.get_user_by_email(&identity.email).await? {
            if user.avatar_url.is_none() && identity.picture.is_some() {
                user.avatar_url = identity.picture.clone();
                user.updated_at = Utc::now();
                self.repository.update_user(&user).await?;
            }
            tracing::info!(user_id = %user.id, "Merging social identity into existing account");
            return Ok(user);
        }

        let mut user = User::new(identity.email.clone(), identity.name.clone(), None);
        user.avatar_url = identity.picture.clone();

        match self.repository.create_user(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, "Created account from social identity");
                Ok(user)
            }
            // A concurrent login created the account first
            Err(RepositoryError::Conflict(_)) => Ok(self
                .repository
                .get_user_by_email(&identity.email)
                .await?
                .ok_or(AuthError::InvalidToken)?),
            Err(e) => Err(e.into()),
        }
    }

    async fn link_provider(
        &self,
        provider: AuthProvider,
        subject: &str,
        user: User,
    ) -> Result<User, AppError> {
        let link = AuthProviderLink::new(user.id, provider, subject.to_string());

        match self.repository.create_provider_link(&link).await {
            Ok(()) => Ok(user),
            Err(RepositoryError::Conflict(constraint)) => {
                // Either a concurrent login linked the same subject, or the
                // account already carries a different identity of this provider
                let existing = self
                    .repository
                    .get_link_by_provider_subject(provider, subject)
                    .await?;
                match existing {
                    Some(existing) if existing.user_id == user.id => Ok(user),
                    _ => {
                        tracing::warn!(
                            user_id = %user.id,
                            provider = %provider,
                            constraint = %constraint,
                            "Provider link conflict"
                        );
                        Err(AuthError::InvalidToken.into())
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The only place a `TokenPair` is minted
    async fn issue_tokens(&self, user: &User) -> Result<TokenPair, AppError> {
        let (access_token, expires_at) = self.signer.issue_access_token(user.id, &user.email)?;
        let (refresh_token, refresh_expires_at) = self.signer.issue_refresh_secret();

        let record = RefreshTokenRecord::new(user.id, &refresh_token, refresh_expires_at);
        self.repository.create_refresh_record(&record).await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at: expires_at.timestamp(),
        })
    }

    async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let hasher = self.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
            .map_err(AppError::from)
    }

    async fn verify_password(&self, password: &str, password_hash: String) -> Result<bool, AppError> {
        let hasher = self.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &password_hash))
            .await
            .map_err(|e| AppError::Internal(format!("verification task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::JwtSettings;
    use crate::repository::{
        InMemoryAccountRepository, ProviderLinkRepository, RefreshTokenRepository,
        UserRepository,
    };
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashMap;

    /// Accepts tokens of the form registered with `insert`
    #[derive(Default)]
    struct StubVerifier {
        tokens: HashMap<String, VerifiedIdentity>,
        unavailable: bool,
    }

    impl StubVerifier {
        fn insert(mut self, token: &str, subject: &str, email: &str) -> Self {
            self.tokens.insert(
                token.to_string(),
                VerifiedIdentity {
                    subject: subject.to_string(),
                    email: email.to_string(),
                    name: "Social".to_string(),
                    picture: Some(format!("https://cdn.example/{}", subject)),
                },
            );
            self
        }

        fn lookup(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
            if self.unavailable {
                return Err(IdentityError::Unavailable("keys down".into()));
            }
            self.tokens
                .get(id_token)
                .cloned()
                .ok_or_else(|| IdentityError::Rejected("unknown token".into()))
        }
    }

    #[async_trait]
    impl SocialVerifier for StubVerifier {
        async fn verify_google(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
            self.lookup(id_token)
        }

        async fn verify_apple(&self, id_token: &str) -> Result<VerifiedIdentity, IdentityError> {
            self.lookup(id_token)
        }
    }

    fn signer() -> TokenSigner {
        TokenSigner::new(&JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        })
    }

    fn service_with(verifier: StubVerifier) -> (SessionService, Arc<InMemoryAccountRepository>) {
        let repository = Arc::new(InMemoryAccountRepository::new());
        let service = SessionService::new(
            repository.clone(),
            Arc::new(verifier),
            PasswordHasher::new(4),
            signer(),
        );
        (service, repository)
    }

    fn service() -> (SessionService, Arc<InMemoryAccountRepository>) {
        service_with(StubVerifier::default())
    }

    fn kind(result: Result<TokenPair, AppError>) -> Option<AuthError> {
        result.err().and_then(|e| e.auth_kind())
    }

    #[tokio::test]
    async fn register_issues_verifiable_tokens() {
        let (service, repo) = service();

        let pair = service
            .register("alice@example.com", "password123", "Alice")
            .await
            .expect("registration should succeed");

        let claims = signer().verify_access_token(&pair.access_token).unwrap();
        assert_eq!(claims.email, "alice@example.com");
        assert_eq!(claims.exp, pair.expires_at);

        let user = repo.get_user_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(claims.user_id(), Ok(user.id));
        assert_ne!(user.password_hash.as_deref(), Some("password123"));

        let links = repo.get_links_by_user(user.id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].provider, AuthProvider::Email);
        assert_eq!(links[0].provider_subject, "alice@example.com");
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected_without_side_effects() {
        let (service, repo) = service();
        service.register("alice@example.com", "password123", "Alice").await.unwrap();

        let result = service.register("alice@example.com", "other-pass", "Imposter").await;

        assert_eq!(kind(result), Some(AuthError::EmailAlreadyExists));
        assert_eq!(repo.user_count(), 1);
        assert_eq!(repo.refresh_record_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_registration_yields_one_account() {
        let (service, repo) = service();

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service.register("race@example.com", "password123", "Racer").await
                })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert_eq!(e.auth_kind(), Some(AuthError::EmailAlreadyExists)),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(repo.user_count(), 1);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let verifier = StubVerifier::default().insert("g-token", "g-sub", "social@example.com");
        let (service, _repo) = service_with(verifier);
        service.register("alice@example.com", "password123", "Alice").await.unwrap();
        service.google_login("g-token").await.unwrap();

        let wrong_password = service.login("alice@example.com", "password124").await;
        let unknown_email = service.login("nobody@example.com", "password123").await;
        let social_only = service.login("social@example.com", "password123").await;

        for result in [wrong_password, unknown_email, social_only] {
            let err = result.expect_err("login should fail");
            assert_eq!(err.auth_kind(), Some(AuthError::InvalidCredentials));
            assert_eq!(err.to_string(), "invalid email or password");
        }
    }

    #[tokio::test]
    async fn login_with_correct_password_succeeds() {
        let (service, _repo) = service();
        service.register("alice@example.com", "password123", "Alice").await.unwrap();

        let pair = service.login("alice@example.com", "password123").await.unwrap();
        let claims = signer().verify_access_token(&pair.access_token).unwrap();
        assert_eq!(claims.email, "alice@example.com");
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_reuse() {
        let (service, repo) = service();
        let original = service
            .register("alice@example.com", "password123", "Alice")
            .await
            .unwrap();

        let rotated = service.refresh(&original.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, original.refresh_token);

        let old_record = repo
            .get_refresh_record_by_secret(&original.refresh_token)
            .await
            .unwrap()
            .unwrap();
        assert!(old_record.revoked);

        let replay = service.refresh(&original.refresh_token).await;
        assert_eq!(kind(replay), Some(AuthError::InvalidToken));

        assert!(service.refresh(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_rejects_unknown_and_expired_secrets() {
        let (service, repo) = service();
        let pair = service
            .register("alice@example.com", "password123", "Alice")
            .await
            .unwrap();
        let user_id = signer()
            .verify_access_token(&pair.access_token)
            .unwrap()
            .user_id()
            .unwrap();

        let expired = RefreshTokenRecord::new(user_id, "expired-secret", Utc::now() - Duration::seconds(1));
        repo.create_refresh_record(&expired).await.unwrap();

        assert_eq!(kind(service.refresh("expired-secret").await), Some(AuthError::InvalidToken));
        assert_eq!(kind(service.refresh("never-issued").await), Some(AuthError::InvalidToken));
        assert_eq!(kind(service.refresh("").await), Some(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn concurrent_refresh_has_single_winner() {
        let (service, _repo) = service();
        let pair = service
            .register("alice@example.com", "password123", "Alice")
            .await
            .unwrap();

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let secret = pair.refresh_token.clone();
                tokio::spawn(async move { service.refresh(&secret).await })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert_eq!(e.auth_kind(), Some(AuthError::InvalidToken)),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn refresh_for_vanished_user_is_invalid_and_fail_closed() {
        let (service, repo) = service();
        let ghost = Uuid::new_v4();
        let record = RefreshTokenRecord::new(ghost, "ghost-secret", Utc::now() + Duration::hours(1));
        repo.create_refresh_record(&record).await.unwrap();

        assert_eq!(kind(service.refresh("ghost-secret").await), Some(AuthError::InvalidToken));

        let stored = repo.get_refresh_record_by_secret("ghost-secret").await.unwrap().unwrap();
        assert!(stored.revoked);
    }

    #[tokio::test]
    async fn social_login_is_idempotent_per_subject() {
        let verifier = StubVerifier::default()
            .insert("token-a", "g-sub", "g@example.com")
            .insert("token-b", "g-sub", "g@example.com");
        let (service, repo) = service_with(verifier);

        let first = service.google_login("token-a").await.unwrap();
        let second = service.google_login("token-b").await.unwrap();

        let first_id = signer().verify_access_token(&first.access_token).unwrap().user_id();
        let second_id = signer().verify_access_token(&second.access_token).unwrap().user_id();
        assert_eq!(first_id, second_id);
        assert_eq!(repo.user_count(), 1);

        let user = repo.get_user_by_id(first_id.unwrap()).await.unwrap().unwrap();
        assert!(user.password_hash.is_none());
        assert_eq!(user.avatar_url.as_deref(), Some("https://cdn.example/g-sub"));
    }

    #[tokio::test]
    async fn social_login_merges_into_password_account() {
        let verifier = StubVerifier::default().insert("g-token", "g-sub", "alice@example.com");
        let (service, repo) = service_with(verifier);
        service.register("alice@example.com", "password123", "Alice").await.unwrap();

        let pair = service.google_login("g-token").await.unwrap();

        assert_eq!(repo.user_count(), 1);
        let user = repo.get_user_by_email("alice@example.com").await.unwrap().unwrap();
        let claims = signer().verify_access_token(&pair.access_token).unwrap();
        assert_eq!(claims.user_id(), Ok(user.id));

        let mut providers: Vec<_> = repo
            .get_links_by_user(user.id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.provider)
            .collect();
        providers.sort_by_key(|p| p.as_str());
        assert_eq!(providers, vec![AuthProvider::Email, AuthProvider::Google]);

        assert_eq!(user.name, "Alice");
        assert_eq!(user.avatar_url.as_deref(), Some("https://cdn.example/g-sub"));
        assert!(service.login("alice@example.com", "password123").await.is_ok());
    }

    #[tokio::test]
    async fn apple_logins_without_email_stay_separate() {
        let verifier = StubVerifier::default()
            .insert("apple-1", "a-sub-1", "")
            .insert("apple-2", "a-sub-2", "");
        let (service, repo) = service_with(verifier);

        service.apple_login("apple-1").await.unwrap();
        service.apple_login("apple-2").await.unwrap();
        service.apple_login("apple-1").await.unwrap();

        assert_eq!(repo.user_count(), 2);
    }

    #[tokio::test]
    async fn rejected_identity_token_is_invalid_token() {
        let (service, repo) = service();

        assert_eq!(kind(service.google_login("forged").await), Some(AuthError::InvalidToken));
        assert_eq!(kind(service.apple_login("forged").await), Some(AuthError::InvalidToken));
        assert_eq!(repo.user_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_provider_is_internal() {
        let verifier = StubVerifier {
            unavailable: true,
            ..StubVerifier::default()
        };
        let (service, _repo) = service_with(verifier);

        let err = service.google_login("anything").await.unwrap_err();
        assert!(matches!(err, AppError::Identity(IdentityError::Unavailable(_))));
    }

    #[tokio::test]
    async fn second_identity_of_same_provider_is_rejected() {
        let verifier = StubVerifier::default()
            .insert("first", "g-sub-1", "alice@example.com")
            .insert("second", "g-sub-2", "alice@example.com");
        let (service, repo) = service_with(verifier);

        service.google_login("first").await.unwrap();
        let result = service.google_login("second").await;

        assert_eq!(kind(result), Some(AuthError::InvalidToken));
        assert_eq!(repo.user_count(), 1);
    }

    #[tokio::test]
    async fn current_user_lists_providers() {
        let (service, _repo) = service();
        let pair = service.register("alice@example.com", "password123", "Alice").await.unwrap();
        let user_id = signer().verify_access_token(&pair.access_token).unwrap().user_id().unwrap();

        let profile = service.current_user(user_id).await.unwrap();
        assert_eq!(profile.user.email, "alice@example.com");
        assert_eq!(profile.providers, vec![AuthProvider::Email]);

        let missing = service.current_user(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(missing.auth_kind(), Some(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn revoke_all_sessions_invalidates_every_refresh_token() {
        let (service, _repo) = service();
        let first = service.register("alice@example.com", "password123", "Alice").await.unwrap();
        let second = service.login("alice@example.com", "password123").await.unwrap();
        let user_id = signer().verify_access_token(&first.access_token).unwrap().user_id().unwrap();

        assert_eq!(service.revoke_all_sessions(user_id).await.unwrap(), 2);
        assert_eq!(kind(service.refresh(&first.refresh_token).await), Some(AuthError::InvalidToken));
        assert_eq!(kind(service.refresh(&second.refresh_token).await), Some(AuthError::InvalidToken));
    }
}
