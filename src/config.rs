use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub application: ApplicationSettings,
    pub idempotency: IdempotencySettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Where idempotency records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyBackend {
    Postgres,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencySettings {
    pub backend: IdempotencyBackend,
    #[serde(default = "default_redis_key_prefix")]
    pub redis_key_prefix: String,
    /// Responses larger than this are returned to the caller but not cached.
    #[serde(default = "default_max_cached_body_bytes")]
    pub max_cached_body_bytes: usize,
    #[serde(default = "default_true")]
    pub sweeper_enabled: bool,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            backend: IdempotencyBackend::Postgres,
            redis_key_prefix: default_redis_key_prefix(),
            max_cached_body_bytes: default_max_cached_body_bytes(),
            sweeper_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// Header carrying the caller id resolved by the upstream auth gateway.
    #[serde(default = "default_caller_header")]
    pub caller_header: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            caller_header: default_caller_header(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_redis_key_prefix() -> String {
    "idem".to_string()
}

fn default_max_cached_body_bytes() -> usize {
    1024 * 1024
}

fn default_caller_header() -> String {
    "x-authenticated-user".to_string()
}

fn default_true() -> bool {
    true
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
