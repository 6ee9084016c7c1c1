use innkeep_core::rate_limit::RateLimitRule;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_group_id() -> String { "innkeep-sync".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Outbound marketplace sync and retry queue tuning.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    pub retry_interval_seconds: u64,
    pub initial_retry_delay_seconds: u64,
    pub backoff_base: u32,
    pub backoff_unit_seconds: u64,
    pub max_backoff_seconds: u64,
    pub max_retries: u32,
    pub inter_item_delay_ms: u64,
    pub batch_size: usize,
    pub credential_refresh_window_seconds: u64,
    /// Base64 of the 32-byte AES-256-GCM key that seals marketplace credentials.
    pub credential_key: String,
    #[serde(default)]
    pub platform_base_urls: HashMap<String, String>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `INNKEEP__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("INNKEEP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file_deserializes() {
        let s = config::Config::builder()
            .add_source(config::File::with_name(concat!(env!("CARGO_MANIFEST_DIR"), "/../config/default")))
            .build()
            .unwrap();
        let cfg: Config = s.try_deserialize().unwrap();

        assert_eq!(cfg.sync.max_retries, 5);
        assert_eq!(
            cfg.rate_limits.get("token_verification").copied(),
            Some(RateLimitRule::new(10, 60))
        );
        assert!(!cfg.rate_limits.contains_key("unknown_operation"));
    }
}
