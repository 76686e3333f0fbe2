use std::time::Duration;

use eventgate_core::topic::{TopicAllowList, DEFAULT_TOPIC_PREFIXES};
use eventgate_events::EventBusConfig;

use crate::auth::jwt::JwtConfig;

/// Hard ceiling for the long-poll timeout, in seconds.
pub const POLL_TIMEOUT_CEILING_SECS: u64 = 60;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `90`). Must exceed the
    /// maximum long-poll timeout.
    pub request_timeout_secs: u64,
    /// Time allowed for connections to drain on shutdown (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// JWT validation settings.
    pub jwt: JwtConfig,
    /// WebSocket and long-poll settings.
    pub gateway: GatewayConfig,
    /// Event bus backend settings.
    pub event_bus: EventBusConfig,
}

/// Transport settings shared by the WebSocket gateway and the long-poll endpoint.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Taxonomy prefixes clients may subscribe under.
    pub topics: TopicAllowList,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_size: usize,
    /// Inactivity window after which a WebSocket is closed.
    pub idle_timeout_secs: u64,
    pub poll_default_timeout_secs: u64,
    pub poll_max_timeout_secs: u64,
    /// Events buffered per poll request before `has_more` is set.
    pub poll_max_events: usize,
}

impl GatewayConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Server ping cadence: three pings per idle window, at least one second
    /// apart. A live client's automatic Pong counts as inbound traffic, so
    /// only peers that stop answering reach the idle timeout.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs((self.idle_timeout_secs / 3).max(1))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            topics: TopicAllowList::default(),
            outbound_queue_size: 256,
            idle_timeout_secs: 90,
            poll_default_timeout_secs: 30,
            poll_max_timeout_secs: POLL_TIMEOUT_CEILING_SECS,
            poll_max_events: 100,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

impl GatewayConfig {
    /// Load transport settings from environment variables.
    ///
    /// | Env Var                     | Default                           |
    /// |-----------------------------|-----------------------------------|
    /// | `TOPIC_ALLOWLIST`           | `account,contact,lead,deal,...`   |
    /// | `WS_OUTBOUND_QUEUE_SIZE`    | `256`                             |
    /// | `WS_IDLE_TIMEOUT_SECS`      | `90`                              |
    /// | `POLL_DEFAULT_TIMEOUT_SECS` | `30`                              |
    /// | `POLL_MAX_TIMEOUT_SECS`     | `60` (capped at 60)               |
    /// | `POLL_MAX_EVENTS`           | `100`                             |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let topics = match std::env::var("TOPIC_ALLOWLIST") {
            Ok(csv) => TopicAllowList::new(csv.split(',')),
            Err(_) => TopicAllowList::new(DEFAULT_TOPIC_PREFIXES.iter().copied()),
        };
        assert!(
            !topics.prefixes().is_empty(),
            "TOPIC_ALLOWLIST must name at least one prefix"
        );

        let outbound_queue_size = env_parse("WS_OUTBOUND_QUEUE_SIZE", defaults.outbound_queue_size);
        assert!(outbound_queue_size > 0, "WS_OUTBOUND_QUEUE_SIZE must be positive");

        let poll_max_timeout_secs = env_parse("POLL_MAX_TIMEOUT_SECS", defaults.poll_max_timeout_secs)
            .min(POLL_TIMEOUT_CEILING_SECS);
        let poll_default_timeout_secs =
            env_parse("POLL_DEFAULT_TIMEOUT_SECS", defaults.poll_default_timeout_secs)
                .min(poll_max_timeout_secs);

        Self {
            topics,
            outbound_queue_size,
            idle_timeout_secs: env_parse("WS_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            poll_default_timeout_secs,
            poll_max_timeout_secs,
            poll_max_events: env_parse("POLL_MAX_EVENTS", defaults.poll_max_events).max(1),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `90`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                    |
    ///
    /// See [`JwtConfig::from_env`], [`GatewayConfig::from_env`] and
    /// [`EventBusConfig::from_env`] for the remaining variables.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_parse("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let gateway = GatewayConfig::from_env();

        let request_timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", 90);
        assert!(
            request_timeout_secs > gateway.poll_max_timeout_secs,
            "REQUEST_TIMEOUT_SECS must exceed POLL_MAX_TIMEOUT_SECS"
        );

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs: env_parse("SHUTDOWN_TIMEOUT_SECS", 10),
            jwt: JwtConfig::from_env(),
            gateway,
            event_bus: EventBusConfig::from_env(),
        }
    }
}
