#![allow(dead_code)]

use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Arc;

use authkeeper::auth::{PasswordHasher, TokenSigner};
use authkeeper::configuration::JwtSettings;
use authkeeper::identity::{AppleVerifier, CompositeVerifier, GoogleVerifier, KeySource};
use authkeeper::repository::InMemoryAccountRepository;
use authkeeper::session::SessionService;
use authkeeper::startup::run;

pub const GOOGLE_CLIENT_ID: &str = "test-web-client.apps.googleusercontent.com";
pub const APPLE_CLIENT_ID: &str = "com.example.birthdays";
pub const TEST_KID: &str = "integration-key";

const PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/id_token_signing.pem");
const PUBLIC_PEM: &[u8] = include_bytes!("../fixtures/id_token_signing.pub.pem");

pub struct TestApp {
    pub address: String,
    pub signer: TokenSigner,
    pub repository: Arc<InMemoryAccountRepository>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn register(&self, email: &str, password: &str, name: &str) -> reqwest::Response {
        self.post_json(
            "/api/auth/register",
            &json!({ "email": email, "password": password, "name": name }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post_json(
            "/api/auth/login",
            &json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.post_json(
            "/api/auth/refresh",
            &json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    pub async fn me(&self, access_token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(&format!("{}/api/auth/me", self.address));
        if let Some(token) = access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        request.send().await.expect("Failed to execute request.")
    }
}

fn test_keys() -> KeySource {
    let key = DecodingKey::from_rsa_pem(PUBLIC_PEM).expect("Invalid public key fixture");
    KeySource::with_static_key(TEST_KID, key)
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "integration-secret-key-at-least-32-bytes".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604800,
        issuer: "authkeeper-test".to_string(),
    }
}

/// Spawn the real server on a random port, backed by the in-memory store
pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let repository = Arc::new(InMemoryAccountRepository::new());
    let verifier = CompositeVerifier::new(
        GoogleVerifier::new(GOOGLE_CLIENT_ID, test_keys()),
        AppleVerifier::new(APPLE_CLIENT_ID, test_keys()),
    );
    let signer = TokenSigner::new(&jwt_settings());
    let sessions = SessionService::new(
        repository.clone(),
        Arc::new(verifier),
        PasswordHasher::new(4),
        signer.clone(),
    );

    let server = run(listener, sessions, signer.clone(), Vec::new()).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        signer,
        repository,
        client: reqwest::Client::new(),
    }
}

/// Sign an identity token with the fixture key
pub fn sign_id_token(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    let key = EncodingKey::from_rsa_pem(PRIVATE_PEM).expect("Invalid private key fixture");
    encode(&header, claims, &key).expect("Failed to sign identity token")
}

pub fn google_id_token(subject: &str, email: &str, name: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    sign_id_token(&json!({
        "iss": "https://accounts.google.com",
        "aud": GOOGLE_CLIENT_ID,
        "sub": subject,
        "email": email,
        "email_verified": true,
        "name": name,
        "iat": now,
        "exp": now + 3600,
    }))
}

pub fn apple_id_token(subject: &str, email: Option<&str>) -> String {
    let now = chrono::Utc::now().timestamp();
    let mut claims = json!({
        "iss": "https://appleid.apple.com",
        "aud": APPLE_CLIENT_ID,
        "sub": subject,
        "iat": now,
        "exp": now + 600,
    });
    if let Some(email) = email {
        claims["email"] = json!(email);
    }
    sign_id_token(&claims)
}
