//! Room Controller configuration.
//!
//! Configuration is loaded from `RC_*` environment variables. The auth secret
//! is redacted in Debug output.

use crate::actors::registry::RegistrySettings;
use crate::actors::room::RoomSettings;
use crate::engine::TransportListenConfig;

use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use thiserror::Error;

/// Default WebSocket signaling bind address.
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:4443";

/// Default health and metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

pub const DEFAULT_RTC_MIN_PORT: u16 = 40_000;
pub const DEFAULT_RTC_MAX_PORT: u16 = 49_999;

pub const DEFAULT_MAX_ROOMS: usize = 1000;
pub const DEFAULT_MAX_PEERS_PER_ROOM: usize = 50;
pub const DEFAULT_CHAT_HISTORY_LIMIT: usize = 200;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rc";

/// Minimum auth secret length for HMAC-SHA256 (32 bytes).
pub const MIN_AUTH_SECRET_LENGTH: usize = 32;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Room Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// HS256 secret for identity tokens.
    pub auth_secret: SecretString,

    /// WebSocket signaling bind address (default: "0.0.0.0:4443").
    pub signaling_bind_address: String,

    /// Health and metrics bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance, used in logs.
    pub instance_id: String,

    /// Media engine workers (default: available parallelism).
    pub engine_workers: usize,

    pub listen_ip: IpAddr,

    /// Address announced in ICE candidates instead of `listen_ip`.
    pub announced_ip: Option<String>,

    pub rtc_min_port: u16,
    pub rtc_max_port: u16,

    pub max_rooms: usize,
    pub max_peers_per_room: usize,

    /// Chat messages retained per room.
    pub chat_history_limit: usize,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("auth_secret", &"[REDACTED]")
            .field("signaling_bind_address", &self.signaling_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("engine_workers", &self.engine_workers)
            .field("listen_ip", &self.listen_ip)
            .field("announced_ip", &self.announced_ip)
            .field("rtc_min_port", &self.rtc_min_port)
            .field("rtc_max_port", &self.rtc_max_port)
            .field("max_rooms", &self.max_rooms)
            .field("max_peers_per_room", &self.max_peers_per_room)
            .field("chat_history_limit", &self.chat_history_limit)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse `name` if set, otherwise use `default`.
fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

fn default_engine_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let auth_secret = SecretString::from(
            vars.get("RC_AUTH_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("RC_AUTH_SECRET".to_string()))?
                .clone(),
        );
        if auth_secret.expose_secret().len() < MIN_AUTH_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "RC_AUTH_SECRET must be at least {MIN_AUTH_SECRET_LENGTH} bytes"
            )));
        }

        let signaling_bind_address = vars
            .get("RC_SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let engine_workers = parse_or(vars, "RC_ENGINE_WORKERS", default_engine_workers())?;
        if engine_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_ENGINE_WORKERS must be at least 1".to_string(),
            ));
        }

        let listen_ip = parse_or(vars, "RC_LISTEN_IP", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let announced_ip = vars
            .get("RC_ANNOUNCED_IP")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let rtc_min_port = parse_or(vars, "RC_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_or(vars, "RC_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "RC_RTC_MIN_PORT ({rtc_min_port}) exceeds RC_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let max_rooms = parse_or(vars, "RC_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let max_peers_per_room = parse_or(vars, "RC_MAX_PEERS_PER_ROOM", DEFAULT_MAX_PEERS_PER_ROOM)?;
        let chat_history_limit = parse_or(vars, "RC_CHAT_HISTORY_LIMIT", DEFAULT_CHAT_HISTORY_LIMIT)?;
        let log_format = parse_or(vars, "RC_LOG_FORMAT", LogFormat::Text)?;

        // Generate instance ID
        let instance_id = vars.get("RC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            auth_secret,
            signaling_bind_address,
            health_bind_address,
            instance_id,
            engine_workers,
            listen_ip,
            announced_ip,
            rtc_min_port,
            rtc_max_port,
            max_rooms,
            max_peers_per_room,
            chat_history_limit,
            log_format,
        })
    }

    #[must_use]
    pub fn listen_config(&self) -> TransportListenConfig {
        TransportListenConfig {
            listen_ip: self.listen_ip,
            announced_ip: self.announced_ip.clone(),
            port_min: self.rtc_min_port,
            port_max: self.rtc_max_port,
        }
    }

    #[must_use]
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            max_rooms: self.max_rooms,
            room: RoomSettings {
                max_peers: self.max_peers_per_room,
                chat_history_limit: self.chat_history_limit,
                listen: self.listen_config(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &str = "config-test-secret-0123456789abcdef";

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([("RC_AUTH_SECRET".to_string(), SECRET.to_string())])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.auth_secret.expose_secret(), SECRET);
        assert_eq!(config.signaling_bind_address, DEFAULT_SIGNALING_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert!(config.engine_workers >= 1);
        assert_eq!(config.listen_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(config.announced_ip.is_none());
        assert_eq!(config.rtc_min_port, DEFAULT_RTC_MIN_PORT);
        assert_eq!(config.rtc_max_port, DEFAULT_RTC_MAX_PORT);
        assert_eq!(config.max_rooms, DEFAULT_MAX_ROOMS);
        assert_eq!(config.max_peers_per_room, DEFAULT_MAX_PEERS_PER_ROOM);
        assert_eq!(config.chat_history_limit, DEFAULT_CHAT_HISTORY_LIMIT);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.instance_id.starts_with("rc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("RC_SIGNALING_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string());
        vars.insert("RC_HEALTH_BIND_ADDRESS".to_string(), "127.0.0.1:9001".to_string());
        vars.insert("RC_INSTANCE_ID".to_string(), "rc-custom-001".to_string());
        vars.insert("RC_ENGINE_WORKERS".to_string(), "3".to_string());
        vars.insert("RC_LISTEN_IP".to_string(), "10.0.0.5".to_string());
        vars.insert("RC_ANNOUNCED_IP".to_string(), "203.0.113.7".to_string());
        vars.insert("RC_RTC_MIN_PORT".to_string(), "50000".to_string());
        vars.insert("RC_RTC_MAX_PORT".to_string(), "50100".to_string());
        vars.insert("RC_MAX_ROOMS".to_string(), "12".to_string());
        vars.insert("RC_MAX_PEERS_PER_ROOM".to_string(), "6".to_string());
        vars.insert("RC_CHAT_HISTORY_LIMIT".to_string(), "25".to_string());
        vars.insert("RC_LOG_FORMAT".to_string(), "JSON".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.signaling_bind_address, "127.0.0.1:9000");
        assert_eq!(config.health_bind_address, "127.0.0.1:9001");
        assert_eq!(config.instance_id, "rc-custom-001");
        assert_eq!(config.engine_workers, 3);
        assert_eq!(config.announced_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(config.log_format, LogFormat::Json);

        let settings = config.registry_settings();
        assert_eq!(settings.max_rooms, 12);
        assert_eq!(settings.room.max_peers, 6);
        assert_eq!(settings.room.chat_history_limit, 25);
        assert_eq!(settings.room.listen.listen_ip.to_string(), "10.0.0.5");
        assert_eq!(settings.room.listen.port_min, 50_000);
        assert_eq!(settings.room.listen.port_max, 50_100);
    }

    #[test]
    fn test_from_vars_missing_auth_secret() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "RC_AUTH_SECRET"));
    }

    #[test]
    fn test_short_auth_secret_is_rejected() {
        let vars = HashMap::from([("RC_AUTH_SECRET".to_string(), "short".to_string())]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (name, value) in [
            ("RC_ENGINE_WORKERS", "0"),
            ("RC_ENGINE_WORKERS", "many"),
            ("RC_LISTEN_IP", "not-an-ip"),
            ("RC_RTC_MIN_PORT", "70000"),
            ("RC_MAX_ROOMS", "-1"),
            ("RC_LOG_FORMAT", "xml"),
        ] {
            let mut vars = base_vars();
            vars.insert(name.to_string(), value.to_string());
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_inverted_port_range_is_rejected() {
        let mut vars = base_vars();
        vars.insert("RC_RTC_MIN_PORT".to_string(), "45000".to_string());
        vars.insert("RC_RTC_MAX_PORT".to_string(), "44000".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains(SECRET));
    }
}
