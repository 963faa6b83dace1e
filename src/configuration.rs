use config::ConfigError;

const MIN_JWT_SECRET_LENGTH: usize = 32;
const MAX_TOKEN_EXPIRY_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub password: PasswordSettings,
    #[serde(default)]
    pub social: SocialSettings,
    #[serde(default)]
    pub sweeper: SweeperSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Browser origins allowed by CORS; empty or `*` allows any origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT authentication settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64, // seconds (900 = 15 minutes)
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64, // seconds (604800 = 7 days)
    pub issuer: String,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct PasswordSettings {
    pub bcrypt_cost: u32,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

/// Third-party identity provider settings
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SocialSettings {
    pub google_client_id: String,
    pub apple_client_id: String,
    pub jwks_cache_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
}

impl Default for SocialSettings {
    fn default() -> Self {
        Self {
            google_client_id: String::new(),
            apple_client_id: String::new(),
            jwks_cache_ttl_seconds: 300,
            http_timeout_seconds: 5,
        }
    }
}

/// Expired refresh-token cleanup; an interval of 0 disables it
#[derive(serde::Deserialize, Clone, Debug)]
pub struct SweeperSettings {
    pub interval_seconds: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> u32 {
    5
}

fn default_access_token_expiry() -> i64 {
    900
}

fn default_refresh_token_expiry() -> i64 {
    604800
}

impl Settings {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "jwt.secret must be at least {} bytes",
                MIN_JWT_SECRET_LENGTH
            )));
        }
        if self.jwt.access_token_expiry <= 0 || self.jwt.refresh_token_expiry <= 0 {
            return Err(ConfigError::Message(
                "jwt token expiries must be positive".to_string(),
            ));
        }
        if self.jwt.access_token_expiry > MAX_TOKEN_EXPIRY_SECONDS
            || self.jwt.refresh_token_expiry > MAX_TOKEN_EXPIRY_SECONDS
        {
            return Err(ConfigError::Message(format!(
                "jwt token expiries must not exceed {} seconds",
                MAX_TOKEN_EXPIRY_SECONDS
            )));
        }
        Ok(self)
    }
}

/// Load settings from `configuration.yaml` (optional) and `APP__*` variables
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    settings.try_deserialize::<Settings>()?.validate()
}
