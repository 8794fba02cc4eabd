use serde::Deserialize;
use std::env;
use uuid::Uuid;

use marquee_core::{RoomLayout, SeatPos};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub reservation: ReservationRules,
    #[serde(default)]
    pub screenings: Vec<ScreeningSeed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redis,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationRules {
    /// How long a raw seat lock lives before it lapses.
    pub lock_ttl_seconds: u64,
    /// How long a PENDING_PAYMENT order keeps its seats.
    pub order_window_seconds: u64,
    /// Background sweep cadence.
    pub sweep_interval_seconds: u64,
}

/// A screening seeded from configuration. The catalog proper lives in
/// another system; this engine only needs ids and room geometry.
#[derive(Debug, Deserialize, Clone)]
pub struct ScreeningSeed {
    pub id: Uuid,
    pub rows: i32,
    pub cols: i32,
    #[serde(default)]
    pub blocked: Vec<SeatPos>,
}

impl ScreeningSeed {
    pub fn layout(&self) -> RoomLayout {
        RoomLayout::with_blocked(self.rows, self.cols, self.blocked.clone())
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of MARQUEE)
            // Eg.. `MARQUEE__SERVER__PORT=9000` would set the server port
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
