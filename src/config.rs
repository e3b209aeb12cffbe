use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "data/logs".to_string(),
        }
    }
}

/// OpenAI-compatible vision endpoint used for OCR of cards and policies
#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    /// Leave empty to disable OCR flows (users are sent to manual entry)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_vision_api_base")]
    pub api_base: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    #[serde(default = "default_vision_timeout_sec")]
    pub timeout_sec: u64,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    /// Seconds the circuit stays open before a trial request is allowed
    #[serde(default = "default_circuit_breaker_reset_sec")]
    pub circuit_breaker_reset_sec: u64,
}

fn default_vision_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_vision_timeout_sec() -> u64 {
    30
}

fn default_circuit_breaker_threshold() -> u32 {
    3
}

fn default_circuit_breaker_reset_sec() -> u64 {
    60
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_vision_api_base(),
            model: default_vision_model(),
            timeout_sec: default_vision_timeout_sec(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_reset_sec: default_circuit_breaker_reset_sec(),
        }
    }
}

impl VisionConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_signed_url_ttl_sec")]
    pub signed_url_ttl_sec: u64,
}

fn default_storage_root() -> String {
    "data/storage".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}

fn default_signed_url_ttl_sec() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
            public_base_url: default_public_base_url(),
            signing_secret: String::new(),
            signed_url_ttl_sec: default_signed_url_ttl_sec(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlowsConfig {
    /// Quiet period before a burst of vehicle photos is acknowledged (default: 2000 ms)
    #[serde(default = "default_photo_batch_window_ms")]
    pub photo_batch_window_ms: u64,
    /// Idle conversation state older than this is expired (default: 30 minutes)
    #[serde(default = "default_state_ttl_minutes")]
    pub state_ttl_minutes: u64,
    /// How often the expiry sweep runs (default: 60 seconds)
    #[serde(default = "default_sweep_interval_sec")]
    pub sweep_interval_sec: u64,
    #[serde(default = "default_max_vehicle_photos")]
    pub max_vehicle_photos: usize,
}

fn default_photo_batch_window_ms() -> u64 {
    2000
}

fn default_state_ttl_minutes() -> u64 {
    30
}

fn default_sweep_interval_sec() -> u64 {
    60
}

fn default_max_vehicle_photos() -> usize {
    20
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            photo_batch_window_ms: default_photo_batch_window_ms(),
            state_ttl_minutes: default_state_ttl_minutes(),
            sweep_interval_sec: default_sweep_interval_sec(),
            max_vehicle_photos: default_max_vehicle_photos(),
        }
    }
}

impl FlowsConfig {
    pub fn photo_batch_window(&self) -> Duration {
        Duration::from_millis(self.photo_batch_window_ms)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_sec.max(1))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("POLIZA").separator("__"));

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn log_level(&self) -> tracing::Level {
        match self.logging.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "info" => tracing::Level::INFO,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_for_optional_sections() {
        let config = parse(
            r#"
            [telegram]
            bot_token = "123:abc"

            [database]
            url = "sqlite::memory:"
            "#,
        );

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.flows.photo_batch_window(), Duration::from_secs(2));
        assert_eq!(config.flows.state_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.flows.max_vehicle_photos, 20);
        assert!(!config.vision.is_configured());
        assert_eq!(config.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_vision_configured_only_with_key() {
        let mut vision = VisionConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!vision.is_configured());

        vision.api_key = Some("sk-live".to_string());
        assert!(vision.is_configured());
    }
}
