use std::env;
use std::fs;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use super::load_config;
use super::settings::{ClientSettings, Settings};

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8765);
    assert_eq!(settings.server.url(), "ws://127.0.0.1:8765");
    assert_eq!(settings.broker.max_connections, 1000);
    assert_eq!(settings.broker.push_interval_min_ms, 1000);
    assert_eq!(settings.broker.push_interval_max_ms, 10_000);
    assert_eq!(settings.client.max_reconnect_attempts, 5);
    assert_eq!(settings.logging.level, "info");
}

#[test]
fn backoff_doubles_and_caps() {
    let client = ClientSettings {
        backoff_base_ms: 100,
        backoff_max_ms: 350,
        ..ClientSettings::default()
    };
    assert_eq!(client.backoff_for_attempt(0), Duration::ZERO);
    assert_eq!(client.backoff_for_attempt(1), Duration::from_millis(100));
    assert_eq!(client.backoff_for_attempt(2), Duration::from_millis(200));
    assert_eq!(client.backoff_for_attempt(3), Duration::from_millis(350));
    assert_eq!(client.backoff_for_attempt(40), Duration::from_millis(350));
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config picks up config/default.toml relative to the working directory.
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        max_connections = 10
        push_interval_min_ms = 50

        [client]
        query_timeout_ms = 250
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.broker.max_connections, 10);
    assert_eq!(cfg.broker.push_interval_min_ms, 50);
    assert_eq!(cfg.broker.push_interval_max_ms, 10_000);
    assert_eq!(cfg.client.query_timeout_ms, 250);
    assert_eq!(cfg.client.backoff_base_ms, 100);
}

#[test]
#[serial]
fn load_config_from_env_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    let cfg = temp_env::with_vars(
        [
            ("SENSORSUB_SERVER__PORT", Some("9100")),
            ("SENSORSUB_CLIENT__MAX_RECONNECT_ATTEMPTS", Some("2")),
            ("SENSORSUB_LOGGING__LEVEL", Some("debug")),
        ],
        load_config,
    );
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.port, 9100);
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.client.max_reconnect_attempts, 2);
    assert_eq!(cfg.logging.level, "debug");
}
