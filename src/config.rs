// src/config.rs
// Environment-driven configuration for the game server
//
// Every option has a development default; unparsable values fall back to the
// default with a warning instead of aborting startup.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::maze::MazeOptions;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value}")]
    OutOfRange {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// HTTP / WebSocket listener
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_interval: Duration,
    pub event_bus_capacity: usize,
    pub player_stale_timeout: Duration,
}

/// Spawn transaction limits
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnConfig {
    /// Ceiling on concurrently live spawned objects
    pub max_objects: usize,
    /// Requested positions below this height are raised to it
    pub min_height: f32,
    pub transaction_timeout: Duration,
    pub sweep_interval: Duration,
}

/// Pickup validation
#[derive(Debug, Clone, PartialEq)]
pub struct PickupConfig {
    pub range: f32,
    pub latency_tolerance: f32,
    /// Delay between pickup commit and world removal
    pub despawn_delay: Duration,
}

impl PickupConfig {
    pub fn max_distance(&self) -> f32 {
        self.range + self.latency_tolerance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub server: ServerConfig,
    pub maze: MazeOptions,
    pub spawn: SpawnConfig,
    pub pickup: PickupConfig,
    pub inventory_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 4321,
                tick_interval: Duration::from_millis(100),
                event_bus_capacity: 1024,
                player_stale_timeout: Duration::from_secs(120),
            },
            maze: MazeOptions::new(15, 12345, 0.05),
            spawn: SpawnConfig {
                max_objects: 64,
                min_height: 0.0,
                transaction_timeout: Duration::from_secs(10),
                sweep_interval: Duration::from_secs(5),
            },
            pickup: PickupConfig {
                range: 3.0,
                latency_tolerance: 1.0,
                despawn_delay: Duration::from_millis(500),
            },
            inventory_capacity: 1,
        }
    }
}

impl GameConfig {
    /// Load from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key);

        let config = Self {
            server: ServerConfig {
                host: get("HTTP_HOST").unwrap_or(defaults.server.host),
                port: parse_or(&get, "HTTP_PORT", defaults.server.port),
                tick_interval: millis_or(&get, "TICK_INTERVAL_MS", defaults.server.tick_interval),
                event_bus_capacity: parse_or(&get, "EVENT_BUS_CAPACITY", defaults.server.event_bus_capacity),
                player_stale_timeout: Duration::from_secs(parse_or(
                    &get,
                    "PLAYER_STALE_TIMEOUT_SECS",
                    defaults.server.player_stale_timeout.as_secs(),
                )),
            },
            maze: MazeOptions {
                size: parse_or(&get, "MAZE_SIZE", defaults.maze.size),
                seed: parse_or(&get, "MAZE_SEED", defaults.maze.seed),
                room_rate: parse_or(&get, "MAZE_ROOM_RATE", defaults.maze.room_rate),
                open_entrance: parse_or(&get, "MAZE_OPEN_ENTRANCE", defaults.maze.open_entrance),
            },
            spawn: SpawnConfig {
                max_objects: parse_or(&get, "SPAWN_MAX_OBJECTS", defaults.spawn.max_objects),
                min_height: parse_or(&get, "SPAWN_MIN_HEIGHT", defaults.spawn.min_height),
                transaction_timeout: millis_or(
                    &get,
                    "SPAWN_TRANSACTION_TIMEOUT_MS",
                    defaults.spawn.transaction_timeout,
                ),
                sweep_interval: millis_or(&get, "SPAWN_SWEEP_INTERVAL_MS", defaults.spawn.sweep_interval),
            },
            pickup: PickupConfig {
                range: parse_or(&get, "PICKUP_RANGE", defaults.pickup.range),
                latency_tolerance: parse_or(&get, "PICKUP_LATENCY_TOLERANCE", defaults.pickup.latency_tolerance),
                despawn_delay: millis_or(&get, "PICKUP_DESPAWN_DELAY_MS", defaults.pickup.despawn_delay),
            },
            inventory_capacity: parse_or(&get, "INVENTORY_CAPACITY", defaults.inventory_capacity),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inventory_capacity == 0 {
            return Err(out_of_range("INVENTORY_CAPACITY", "at least 1", self.inventory_capacity));
        }
        if self.spawn.max_objects == 0 {
            return Err(out_of_range("SPAWN_MAX_OBJECTS", "at least 1", self.spawn.max_objects));
        }
        if self.server.event_bus_capacity == 0 {
            return Err(out_of_range("EVENT_BUS_CAPACITY", "at least 1", self.server.event_bus_capacity));
        }
        if !(self.pickup.range >= 0.0 && self.pickup.latency_tolerance >= 0.0) {
            return Err(out_of_range(
                "PICKUP_RANGE",
                "non-negative (with PICKUP_LATENCY_TOLERANCE)",
                self.pickup.max_distance(),
            ));
        }
        if self.server.tick_interval.is_zero() || self.spawn.sweep_interval.is_zero() {
            return Err(out_of_range(
                "TICK_INTERVAL_MS",
                "non-zero (with SPAWN_SWEEP_INTERVAL_MS)",
                self.server.tick_interval.as_millis(),
            ));
        }
        Ok(())
    }
}

fn out_of_range(key: &'static str, expected: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::OutOfRange {
        key,
        expected,
        value: value.to_string(),
    }
}

fn parse_or<T, F>(get: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key = %key, value = %raw, default = ?default, "Unparsable config value, using default");
            default
        }),
        None => default,
    }
}

fn millis_or<F>(get: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_millis(parse_or(get, key, default.as_millis() as u64))
}
