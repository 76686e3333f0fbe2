use std::fmt;
use std::str::FromStr;

use crate::tracker::TrackerDefaults;

/// Which [`EventBackend`](crate::backend::EventBackend) implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process broadcast fan-out.
    Memory,
    /// Redis PUBLISH / PSUBSCRIBE (requires the `redis` feature).
    Redis,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            other => Err(format!("unknown event bus backend '{other}'")),
        }
    }
}

/// Event bus configuration loaded once at startup.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub backend: BackendKind,
    /// Prepended to every event type to form the backend channel name.
    pub channel_prefix: String,
    /// Broadcast buffer size of the memory backend.
    pub capacity: usize,
    /// Connection URL of the Redis backend.
    pub redis_url: String,
    pub default_region: String,
    pub default_retention_days: u32,
}

const DEFAULT_CHANNEL_PREFIX: &str = "events:";
const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

impl EventBusConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                  |
    /// |--------------------------------|--------------------------|
    /// | `EVENT_BUS_BACKEND`            | `memory`                 |
    /// | `EVENT_CHANNEL_PREFIX`         | `events:`                |
    /// | `EVENT_BUS_CAPACITY`           | `1024`                   |
    /// | `REDIS_URL`                    | `redis://127.0.0.1:6379` |
    /// | `EVENT_DEFAULT_REGION`         | `us-east-1`              |
    /// | `EVENT_DEFAULT_RETENTION_DAYS` | `365`                    |
    ///
    /// # Panics
    ///
    /// Panics if a variable is set to an unparsable value.
    pub fn from_env() -> Self {
        let defaults = TrackerDefaults::default();

        let backend: BackendKind = std::env::var("EVENT_BUS_BACKEND")
            .unwrap_or_else(|_| "memory".into())
            .parse()
            .unwrap_or_else(|e| panic!("EVENT_BUS_BACKEND: {e}"));

        let channel_prefix =
            std::env::var("EVENT_CHANNEL_PREFIX").unwrap_or_else(|_| DEFAULT_CHANNEL_PREFIX.into());

        let capacity: usize = std::env::var("EVENT_BUS_CAPACITY")
            .unwrap_or_else(|_| DEFAULT_CAPACITY.to_string())
            .parse()
            .expect("EVENT_BUS_CAPACITY must be a valid usize");
        assert!(capacity > 0, "EVENT_BUS_CAPACITY must be positive");

        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.into());

        let default_region =
            std::env::var("EVENT_DEFAULT_REGION").unwrap_or_else(|_| defaults.region.clone());

        let default_retention_days: u32 = std::env::var("EVENT_DEFAULT_RETENTION_DAYS")
            .unwrap_or_else(|_| defaults.retention_days.to_string())
            .parse()
            .expect("EVENT_DEFAULT_RETENTION_DAYS must be a valid u32");

        Self {
            backend,
            channel_prefix,
            capacity,
            redis_url,
            default_region,
            default_retention_days,
        }
    }

    pub fn tracker_defaults(&self) -> TrackerDefaults {
        TrackerDefaults {
            region: self.default_region.clone(),
            retention_days: self.default_retention_days,
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        let defaults = TrackerDefaults::default();
        Self {
            backend: BackendKind::Memory,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            capacity: DEFAULT_CAPACITY,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            default_region: defaults.region,
            default_retention_days: defaults.retention_days,
        }
    }
}
