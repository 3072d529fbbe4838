use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the server, the broker, the peer client and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server binds to and the client connects to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Configuration settings for the broker.
///
/// Push tasks sleep a random interval between the two bounds after every
/// `new_sensor_data` event.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub push_interval_min_ms: u64,
    pub push_interval_max_ms: u64,
}

/// Configuration settings for the peer client.
///
/// Controls the status query timeout and the bounded reconnect policy.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub query_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl ClientSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Exponential backoff capped at `backoff_max_ms`:
    /// attempt 1: base, attempt 2: base * 2, attempt n: min(base * 2^(n-1), max).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = Duration::from_millis(self.backoff_base_ms).saturating_mul(multiplier);
        std::cmp::min(delay, Duration::from_millis(self.backoff_max_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub push_interval_min_ms: Option<u64>,
    pub push_interval_max_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub query_timeout_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            client: ClientSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            push_interval_min_ms: 1000,
            push_interval_max_ms: 10_000,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5000,
            max_reconnect_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 5000,
        }
    }
}
