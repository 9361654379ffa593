//! Mesh Coordinator configuration.
//!
//! Configuration is loaded from environment variables. Every variable has a
//! default, so an empty environment yields a runnable coordinator.

use crate::coordinator::CoordinatorSettings;
use crate::room_state::RoomSettings;

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum number of concurrent rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default maximum participants per room. Mesh links grow as N², so this stays small.
pub const DEFAULT_MAX_PARTICIPANTS_PER_ROOM: usize = 16;

/// Default bound on how long a link may stay in `Negotiating`.
pub const DEFAULT_NEGOTIATION_TIMEOUT_SECONDS: u64 = 30;

/// Default interval between negotiation-timeout sweeps.
pub const DEFAULT_LINK_SWEEP_INTERVAL_MS: u64 = 1000;

/// Default per-participant delivery mailbox size.
pub const DEFAULT_DELIVERY_BUFFER: usize = 256;

/// Default bound on waiting for rooms to close at shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;

/// Default coordinator instance ID prefix.
pub const DEFAULT_COORDINATOR_ID_PREFIX: &str = "mesh";

/// Mesh Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Signaling WebSocket bind address (default: "0.0.0.0:8080").
    pub signaling_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub coordinator_id: String,

    /// Maximum concurrent rooms.
    pub max_rooms: usize,

    /// Maximum participants in one room.
    pub max_participants_per_room: usize,

    /// Links negotiating longer than this move to `Failed`.
    pub negotiation_timeout: Duration,

    /// How often each room sweeps for timed-out negotiations.
    pub link_sweep_interval: Duration,

    /// Per-participant delivery mailbox size.
    pub delivery_buffer: usize,

    /// How long shutdown waits for rooms to close.
    pub shutdown_timeout: Duration,

    /// Emit logs as JSON lines.
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_bind_address = vars
            .get("MESH_SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("MESH_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_rooms = parse_positive(vars, "MESH_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;

        let max_participants_per_room = parse_positive(
            vars,
            "MESH_MAX_PARTICIPANTS_PER_ROOM",
            DEFAULT_MAX_PARTICIPANTS_PER_ROOM,
        )?;

        let negotiation_timeout = Duration::from_secs(parse_positive(
            vars,
            "MESH_NEGOTIATION_TIMEOUT_SECONDS",
            DEFAULT_NEGOTIATION_TIMEOUT_SECONDS,
        )?);

        let link_sweep_interval = Duration::from_millis(parse_positive(
            vars,
            "MESH_LINK_SWEEP_INTERVAL_MS",
            DEFAULT_LINK_SWEEP_INTERVAL_MS,
        )?);

        let delivery_buffer =
            parse_positive(vars, "MESH_DELIVERY_BUFFER", DEFAULT_DELIVERY_BUFFER)?;

        let shutdown_timeout = Duration::from_secs(parse_positive(
            vars,
            "MESH_SHUTDOWN_TIMEOUT_SECONDS",
            DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
        )?);

        let log_json = match vars.get("MESH_LOG_JSON").map(String::as_str) {
            None | Some("" | "0" | "false") => false,
            Some("1" | "true") => true,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "MESH_LOG_JSON must be true or false, got '{other}'"
                )))
            }
        };

        // Generate coordinator instance ID
        let coordinator_id = vars
            .get("MESH_COORDINATOR_ID")
            .cloned()
            .unwrap_or_else(|| {
                let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
                let uuid_suffix = uuid::Uuid::new_v4().to_string();
                let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
                format!("{DEFAULT_COORDINATOR_ID_PREFIX}-{hostname}-{short_suffix}")
            });

        Ok(Config {
            signaling_bind_address,
            health_bind_address,
            coordinator_id,
            max_rooms,
            max_participants_per_room,
            negotiation_timeout,
            link_sweep_interval,
            delivery_buffer,
            shutdown_timeout,
            log_json,
        })
    }

    /// Per-room limits and timings derived from this configuration.
    #[must_use]
    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            max_participants: self.max_participants_per_room,
            negotiation_timeout: self.negotiation_timeout,
            sweep_interval: self.link_sweep_interval,
            delivery_buffer: self.delivery_buffer,
        }
    }

    /// Coordinator-wide settings derived from this configuration.
    #[must_use]
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            coordinator_id: self.coordinator_id.clone(),
            max_rooms: self.max_rooms,
            shutdown_timeout: self.shutdown_timeout,
            room: self.room_settings(),
        }
    }
}

/// Parse an optional numeric variable that must be greater than zero.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name} must be a number, got '{raw}'")))?;

    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(
            config.signaling_bind_address,
            DEFAULT_SIGNALING_BIND_ADDRESS
        );
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_rooms, DEFAULT_MAX_ROOMS);
        assert_eq!(
            config.max_participants_per_room,
            DEFAULT_MAX_PARTICIPANTS_PER_ROOM
        );
        assert_eq!(
            config.negotiation_timeout,
            Duration::from_secs(DEFAULT_NEGOTIATION_TIMEOUT_SECONDS)
        );
        assert_eq!(
            config.link_sweep_interval,
            Duration::from_millis(DEFAULT_LINK_SWEEP_INTERVAL_MS)
        );
        assert_eq!(config.delivery_buffer, DEFAULT_DELIVERY_BUFFER);
        assert_eq!(
            config.shutdown_timeout,
            Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS)
        );
        assert!(!config.log_json);
        // Coordinator ID should be auto-generated
        assert!(config.coordinator_id.starts_with("mesh-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            (
                "MESH_SIGNALING_BIND_ADDRESS".to_string(),
                "127.0.0.1:9000".to_string(),
            ),
            (
                "MESH_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9001".to_string(),
            ),
            ("MESH_COORDINATOR_ID".to_string(), "mesh-custom-001".to_string()),
            ("MESH_MAX_ROOMS".to_string(), "50".to_string()),
            ("MESH_MAX_PARTICIPANTS_PER_ROOM".to_string(), "4".to_string()),
            ("MESH_NEGOTIATION_TIMEOUT_SECONDS".to_string(), "10".to_string()),
            ("MESH_LINK_SWEEP_INTERVAL_MS".to_string(), "250".to_string()),
            ("MESH_DELIVERY_BUFFER".to_string(), "64".to_string()),
            ("MESH_LOG_JSON".to_string(), "true".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.signaling_bind_address, "127.0.0.1:9000");
        assert_eq!(config.health_bind_address, "127.0.0.1:9001");
        assert_eq!(config.coordinator_id, "mesh-custom-001");
        assert_eq!(config.max_rooms, 50);
        assert_eq!(config.max_participants_per_room, 4);
        assert_eq!(config.negotiation_timeout, Duration::from_secs(10));
        assert_eq!(config.link_sweep_interval, Duration::from_millis(250));
        assert_eq!(config.delivery_buffer, 64);
        assert!(config.log_json);

        let settings = config.room_settings();
        assert_eq!(settings.max_participants, 4);
        assert_eq!(settings.negotiation_timeout, Duration::from_secs(10));
        assert_eq!(settings.sweep_interval, Duration::from_millis(250));
        assert_eq!(settings.delivery_buffer, 64);

        let coordinator = config.coordinator_settings();
        assert_eq!(coordinator.coordinator_id, "mesh-custom-001");
        assert_eq!(coordinator.max_rooms, 50);
        assert_eq!(coordinator.room, settings);
    }

    #[test]
    fn test_from_vars_rejects_non_numeric() {
        let vars = HashMap::from([("MESH_MAX_ROOMS".to_string(), "lots".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("MESH_MAX_ROOMS")));
    }

    #[test]
    fn test_from_vars_rejects_zero_timeout() {
        let vars = HashMap::from([(
            "MESH_NEGOTIATION_TIMEOUT_SECONDS".to_string(),
            "0".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_vars_rejects_bad_log_flag() {
        let vars = HashMap::from([("MESH_LOG_JSON".to_string(), "maybe".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
