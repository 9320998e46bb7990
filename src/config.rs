//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__PORT, APP_LIVE__MODEL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! Section and field are joined with a double underscore because field names
//! such as `api_key` already contain single underscores.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Placeholder shown instead of the API key when configuration is echoed back.
pub const REDACTED: &str = "********";

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub business: BusinessConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection settings for the hosted real-time speech service.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the bidirectional live API
/// - `api_key`: Appended as the `key` query parameter; usually set via `GEMINI_API_KEY`
/// - `model`: Model that handles the conversation (must support native audio)
/// - `voice`: Prebuilt synthesized voice used for every reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
}

/// Audio format settings.
///
/// The live API takes 16 kHz input and produces 24 kHz output; changing these
/// only makes sense against a service that negotiates other rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Samples per captured microphone frame
    pub frame_size: usize,
    /// Channel count of inbound model audio
    pub channels: u16,
}

/// The repair shop the assistant answers for. Everything here ends up in the
/// system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConfig {
    pub name: String,
    /// Phone fallback offered when the assistant is unavailable
    pub phone: String,
    pub address: String,
    pub hours: String,
    pub services: Vec<ServiceOffering>,
}

/// One line of the price list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub name: String,
    pub price: String,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_sessions`: Maximum number of live calls across all browser connections
/// - `max_ledger_records`: Leads (and, separately, appointments) kept in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub max_ledger_records: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveConfig {
                endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                api_key: String::new(),
                model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                voice: "Puck".to_string(),
            },
            audio: AudioConfig {
                input_sample_rate: 16000,
                output_sample_rate: 24000,
                frame_size: 4096,
                channels: 1,
            },
            business: BusinessConfig {
                name: "ByteFix Computer Repair".to_string(),
                phone: "(555) 013-2040".to_string(),
                address: "128 Market Street".to_string(),
                hours: "Monday to Saturday, 9am to 6pm".to_string(),
                services: default_services(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                max_ledger_records: 1000,
            },
        }
    }
}

fn default_services() -> Vec<ServiceOffering> {
    [
        ("Diagnostics", "$49"),
        ("Virus and malware removal", "$99"),
        ("Laptop screen replacement", "from $149"),
        ("Data recovery", "from $199"),
        ("SSD upgrade and OS migration", "$129 plus parts"),
        ("Custom PC build", "$150 labor"),
    ]
    .into_iter()
    .map(|(name, price)| ServiceOffering {
        name: name.to_string(),
        price: price.to_string(),
    })
    .collect()
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and GEMINI_API_KEY
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_LIVE__VOICE=Kore`: Override the synthesized voice
    /// - `GEMINI_API_KEY=...`: The live service API key
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// An empty API key is allowed: the server still starts and every call
    /// attempt fails over to the phone fallback.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.live.endpoint.is_empty() {
            return Err(anyhow::anyhow!("Live endpoint cannot be empty"));
        }

        if self.live.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Live model cannot be empty"));
        }

        if self.live.voice.trim().is_empty() {
            return Err(anyhow::anyhow!("Live voice cannot be empty"));
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.audio.frame_size == 0 {
            return Err(anyhow::anyhow!("Audio frame size must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.max_ledger_records == 0 {
            return Err(anyhow::anyhow!("Max ledger records must be greater than 0"));
        }

        Ok(())
    }

    /// Copy of this configuration that is safe to return to clients.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.live.api_key.is_empty() {
            config.live.api_key = REDACTED.to_string();
        }
        config
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only the fields present in the JSON are touched, so `{"live": {"voice": "Kore"}}`
    /// changes just the voice. The result is validated before returning.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(live) = partial_config.get("live") {
            if let Some(endpoint) = live.get("endpoint").and_then(|v| v.as_str()) {
                self.live.endpoint = endpoint.to_string();
            }
            if let Some(key) = live.get("api_key").and_then(|v| v.as_str()) {
                // Echoing back the redacted placeholder must not wipe the real key
                if key != REDACTED {
                    self.live.api_key = key.to_string();
                }
            }
            if let Some(model) = live.get("model").and_then(|v| v.as_str()) {
                self.live.model = model.to_string();
            }
            if let Some(voice) = live.get("voice").and_then(|v| v.as_str()) {
                self.live.voice = voice.to_string();
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("input_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.input_sample_rate = u32::try_from(rate)
                    .map_err(|_| anyhow::anyhow!("Input sample rate {} is out of range", rate))?;
            }
            if let Some(rate) = audio.get("output_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.output_sample_rate = u32::try_from(rate)
                    .map_err(|_| anyhow::anyhow!("Output sample rate {} is out of range", rate))?;
            }
            if let Some(frame_size) = audio.get("frame_size").and_then(|v| v.as_u64()) {
                self.audio.frame_size = usize::try_from(frame_size)
                    .map_err(|_| anyhow::anyhow!("Frame size {} is out of range", frame_size))?;
            }
            if let Some(channels) = audio.get("channels").and_then(|v| v.as_u64()) {
                self.audio.channels = u16::try_from(channels)
                    .map_err(|_| anyhow::anyhow!("Channel count {} is out of range", channels))?;
            }
        }

        if let Some(business) = partial_config.get("business") {
            if let Some(name) = business.get("name").and_then(|v| v.as_str()) {
                self.business.name = name.to_string();
            }
            if let Some(phone) = business.get("phone").and_then(|v| v.as_str()) {
                self.business.phone = phone.to_string();
            }
            if let Some(address) = business.get("address").and_then(|v| v.as_str()) {
                self.business.address = address.to_string();
            }
            if let Some(hours) = business.get("hours").and_then(|v| v.as_str()) {
                self.business.hours = hours.to_string();
            }
            if let Some(services) = business.get("services") {
                self.business.services = serde_json::from_value(services.clone())?;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance.get("max_concurrent_sessions").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_sessions = usize::try_from(sessions)
                    .map_err(|_| anyhow::anyhow!("Max concurrent sessions {} is out of range", sessions))?;
            }
            if let Some(records) = performance.get("max_ledger_records").and_then(|v| v.as_u64()) {
                self.performance.max_ledger_records = usize::try_from(records)
                    .map_err(|_| anyhow::anyhow!("Max ledger records {} is out of range", records))?;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.output_sample_rate, 24000);
        assert_eq!(config.audio.frame_size, 4096);
        assert!(!config.business.services.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.frame_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.live.voice = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "live": {"voice": "Kore"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.live.voice, "Kore");
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"audio": {"input_sample_rate": 0}}"#).is_err());
        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert!(config.update_from_json("{not json").is_err());
    }

    #[test]
    fn test_config_update_rejects_overflowing_numbers() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"input_sample_rate": 4294983296, "channels": 65537}}"#;
        assert!(config.update_from_json(json).is_err());
        assert!(config.update_from_json(r#"{"audio": {"channels": 65537}}"#).is_err());
        assert!(config
            .update_from_json(r#"{"audio": {"output_sample_rate": 4294967297}}"#)
            .is_err());

        assert_eq!(config.audio.input_sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
    }

    #[test]
    fn test_ledger_retention_update() {
        let mut config = AppConfig::default();
        assert_eq!(config.performance.max_ledger_records, 1000);

        config
            .update_from_json(r#"{"performance": {"max_ledger_records": 25}}"#)
            .unwrap();
        assert_eq!(config.performance.max_ledger_records, 25);
        assert!(config
            .update_from_json(r#"{"performance": {"max_ledger_records": 0}}"#)
            .is_err());
    }

    #[test]
    fn test_update_services() {
        let mut config = AppConfig::default();
        let json = r#"{"business": {"services": [{"name": "Tune-up", "price": "$59"}]}}"#;
        config.update_from_json(json).unwrap();
        assert_eq!(
            config.business.services,
            vec![ServiceOffering { name: "Tune-up".to_string(), price: "$59".to_string() }]
        );
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = AppConfig::default();
        config.live.api_key = "secret-key".to_string();

        let shown = config.redacted();
        assert_eq!(shown.live.api_key, REDACTED);

        // Sending the placeholder back keeps the real key
        config.update_from_json(r#"{"live": {"api_key": "********"}}"#).unwrap();
        assert_eq!(config.live.api_key, "secret-key");
    }
}
