//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! departure-board.toml file, with environment variables taking precedence for
//! endpoints and credentials. It provides a centralized way to configure the
//! broker, the transit API, the display, and the boards shown on it.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default location of the configuration file, relative to the working directory.
pub const CONFIG_PATH: &str = "departure-board.toml";

/// Configuration that cannot be run as given.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("unknown time zone {0:?}")]
    Timezone(String),

    #[error("boards need {needed} slots but the display has {available}")]
    TooManySlots { needed: usize, available: usize },

    #[error("board {0:?} has no stop codes")]
    NoStops(String),

    /// Timers cannot tick with a zero period
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Application configuration loaded from departure-board.toml
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// MQTT broker the clock listens on
    pub broker: BrokerConfig,
    /// OV API endpoint and refresh cadence
    pub api: ApiConfig,
    /// Physical display settings
    pub display: DisplayConfig,
    /// Boards, laid out on consecutive slots in this order
    pub boards: Vec<BoardConfig>,
}

/// MQTT connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic prefix of the AWTRIX clock (its MQTT prefix setting)
    pub prefix: String,
}

/// Transit API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base URL, e.g. `http://v0.ovapi.nl`
    pub url: String,
    /// Seconds between snapshot fetches
    pub refresh_secs: u64,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Display configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Number of custom apps (slots) on the clock
    pub slots: usize,
    /// Milliseconds between render ticks
    pub render_interval_ms: u64,
    /// IANA zone the API's naive timestamps are expressed in
    pub timezone: String,
}

/// One logical board
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoardConfig {
    /// Label used in log lines
    pub name: String,
    /// Timing point codes whose departures are merged on this board
    pub stop_codes: Vec<String>,
    /// Departures sooner than this are hidden (you cannot make it anyway)
    pub cutoff_minutes: f64,
    /// Departures shown, which is also the number of slots the board takes
    pub max_items: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            broker: BrokerConfig {
                host: "localhost".to_string(),
                port: 1883,
                client_id: "departure-board".to_string(),
                username: None,
                password: None,
                prefix: "clock".to_string(),
            },
            api: ApiConfig {
                url: "http://v0.ovapi.nl".to_string(),
                refresh_secs: 5,
                timeout_secs: 10,
            },
            display: DisplayConfig {
                slots: 6,
                render_interval_ms: 250,
                timezone: "Europe/Amsterdam".to_string(),
            },
            boards: vec![
                BoardConfig {
                    name: "centraal".to_string(),
                    // Elandstraat West and Monstersestraat, towards the centre
                    stop_codes: vec!["32009203".to_string(), "32009511".to_string()],
                    cutoff_minutes: 8.0,
                    max_items: 4,
                },
                BoardConfig {
                    name: "hollands-spoor".to_string(),
                    // Loosduinseweg, towards the centre
                    stop_codes: vec!["32009587".to_string()],
                    cutoff_minutes: 7.0,
                    max_items: 2,
                },
            ],
        }
    }
}

impl Config {
    /// Load configuration from departure-board.toml, then apply environment overrides
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        let mut config = Self::load_from_path(CONFIG_PATH);
        config.apply_env(|key| env::var(key).ok());
        config
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    log::info!(
                        "Loaded configuration with {} boards from {}",
                        config.boards.len(),
                        path.as_ref().display()
                    );
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config file format: {}", e);
                    log::warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found, using default configuration");
                Self::default()
            }
        }
    }

    /// Override endpoints and credentials from the environment.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MQTT_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("MQTT_BROKER_PORT") {
            match port.parse() {
                Ok(port) => self.broker.port = port,
                Err(_) => log::warn!("Ignoring invalid MQTT_BROKER_PORT {port:?}"),
            }
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.broker.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.broker.password = Some(password);
        }
        if let Some(prefix) = lookup("MQTT_PREFIX") {
            self.broker.prefix = prefix;
        }
        if let Some(url) = lookup("OV_API_URL") {
            self.api.url = url;
        }
    }

    /// Check the boards fit the display and the time zone is known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timezone()?;

        let intervals = [
            ("api.refresh_secs", self.api.refresh_secs),
            ("api.timeout_secs", self.api.timeout_secs),
            ("display.render_interval_ms", self.display.render_interval_ms),
        ];
        if let Some((name, _)) = intervals.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroInterval(name));
        }

        if let Some(board) = self.boards.iter().find(|b| b.stop_codes.is_empty()) {
            return Err(ConfigError::NoStops(board.name.clone()));
        }

        let needed: usize = self.boards.iter().map(|b| b.max_items).sum();
        if needed > self.display.slots {
            return Err(ConfigError::TooManySlots {
                needed,
                available: self.display.slots,
            });
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.display
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.display.timezone.clone()))
    }

    /// Union of every board's stop codes, first occurrence wins the order.
    pub fn all_stop_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        for code in self.boards.iter().flat_map(|b| &b.stop_codes) {
            if !codes.contains(code) {
                codes.push(code.clone());
            }
        }
        codes
    }

    /// First slot of each board, in configuration order.
    pub fn board_offsets(&self) -> Vec<usize> {
        self.boards
            .iter()
            .scan(0, |next, board| {
                let start = *next;
                *next += board.max_items;
                Some(start)
            })
            .collect()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.api.refresh_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.display.render_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.display.slots, 6);
        assert_eq!(config.display.render_interval_ms, 250);
        assert_eq!(config.api.refresh_secs, 5);
        assert_eq!(config.boards.len(), 2);
        assert_eq!(config.board_offsets(), [0, 4]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.broker.prefix, parsed.broker.prefix);
        assert_eq!(config.boards[1].stop_codes, parsed.boards[1].stop_codes);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        // Should fallback to default
        assert_eq!(config.broker.prefix, "clock");
    }

    #[test]
    fn test_load_from_file() {
        let file = NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            r#"
                [broker]
                host = "broker.local"
                port = 1884
                client_id = "hall"
                prefix = "hallway"

                [api]
                url = "http://localhost:8080"
                refresh_secs = 10
                timeout_secs = 3

                [display]
                slots = 3
                render_interval_ms = 500
                timezone = "Europe/Brussels"

                [[boards]]
                name = "north"
                stop_codes = ["1000"]
                cutoff_minutes = 2.0
                max_items = 3
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(file.path());
        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.username, None);
        assert_eq!(config.display.slots, 3);
        assert_eq!(config.boards[0].cutoff_minutes, 2.0);
        assert_eq!(config.render_interval(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MQTT_BROKER_HOST", "mqtt.example"),
            ("MQTT_BROKER_PORT", "not-a-port"),
            ("MQTT_USERNAME", "clock"),
            ("MQTT_PASSWORD", "secret"),
            ("OV_API_URL", "http://ovapi.test"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.broker.host, "mqtt.example");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.username.as_deref(), Some("clock"));
        assert_eq!(config.broker.password.as_deref(), Some("secret"));
        assert_eq!(config.broker.prefix, "clock");
        assert_eq!(config.api.url, "http://ovapi.test");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.display.slots = 5;
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooManySlots {
                needed: 6,
                available: 5
            })
        );

        let mut config = Config::default();
        config.display.timezone = "Mars/Olympus".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Timezone(_))));

        let mut config = Config::default();
        config.boards[1].stop_codes.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::NoStops("hollands-spoor".to_string()))
        );

        let mut config = Config::default();
        config.display.render_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("display.render_interval_ms"))
        );

        let mut config = Config::default();
        config.api.refresh_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("api.refresh_secs"))
        );
    }

    #[test]
    fn test_all_stop_codes_deduplicates() {
        let mut config = Config::default();
        config.boards[1].stop_codes.push("32009203".to_string());
        assert_eq!(
            config.all_stop_codes(),
            ["32009203", "32009511", "32009587"]
        );
    }
}
