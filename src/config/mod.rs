mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, ClientSettings, LoggingSettings, ServerSettings, Settings};

/// Environment variable prefix, e.g. `SENSORSUB_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "SENSORSUB";

/// Loads the configuration from `config/default` (optional) and environment
/// variables, then merges what was found onto the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let broker = partial.broker;
    let client = partial.client;
    let logging = partial.logging;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            max_connections: broker
                .as_ref()
                .and_then(|b| b.max_connections)
                .unwrap_or(default.broker.max_connections),
            push_interval_min_ms: broker
                .as_ref()
                .and_then(|b| b.push_interval_min_ms)
                .unwrap_or(default.broker.push_interval_min_ms),
            push_interval_max_ms: broker
                .as_ref()
                .and_then(|b| b.push_interval_max_ms)
                .unwrap_or(default.broker.push_interval_max_ms),
        },
        client: ClientSettings {
            query_timeout_ms: client
                .as_ref()
                .and_then(|c| c.query_timeout_ms)
                .unwrap_or(default.client.query_timeout_ms),
            max_reconnect_attempts: client
                .as_ref()
                .and_then(|c| c.max_reconnect_attempts)
                .unwrap_or(default.client.max_reconnect_attempts),
            backoff_base_ms: client
                .as_ref()
                .and_then(|c| c.backoff_base_ms)
                .unwrap_or(default.client.backoff_base_ms),
            backoff_max_ms: client
                .as_ref()
                .and_then(|c| c.backoff_max_ms)
                .unwrap_or(default.client.backoff_max_ms),
        },
        logging: LoggingSettings {
            level: logging
                .and_then(|l| l.level)
                .unwrap_or(default.logging.level),
        },
    }
}

#[cfg(test)]
mod tests;
