use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::{HOUR_MS, Ms};
use crate::registry::{Room, default_rooms};

/// Process configuration, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Shortest reservation accepted.
    pub min_duration_ms: Ms,
    pub sweep_interval: Duration,
    /// Log appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub rooms: Vec<Room>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            min_duration_ms: HOUR_MS,
            sweep_interval: Duration::from_secs(1),
            compact_threshold: 1000,
            metrics_port: None,
            rooms: default_rooms(),
        }
    }
}

impl Config {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to defaults;
    /// a malformed room list is an error.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let defaults = Self::default();
        let parsed = |key: &str| get(key).and_then(|s| s.parse::<u64>().ok());

        let rooms = match get("ROOMBOOK_ROOMS") {
            Some(json) => serde_json::from_str::<Vec<Room>>(&json).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("ROOMBOOK_ROOMS: {e}"))
            })?,
            None => defaults.rooms,
        };

        let min_duration_ms = parsed("ROOMBOOK_MIN_DURATION_MS")
            .filter(|&ms| ms > 0)
            .map_or(defaults.min_duration_ms, |ms| ms as Ms);

        Ok(Self {
            data_dir: get("ROOMBOOK_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            min_duration_ms,
            sweep_interval: parsed("ROOMBOOK_SWEEP_INTERVAL_MS")
                .filter(|&ms| ms > 0)
                .map_or(defaults.sweep_interval, Duration::from_millis),
            compact_threshold: parsed("ROOMBOOK_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: get("ROOMBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            rooms,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}
