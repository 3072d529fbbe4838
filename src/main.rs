//! CLI for SensorSub
//!
//! Subcommands:
//! - `server`: run the broker's WebSocket server
//! - `client`: connect, query a sensor, print its pushes for a while, disconnect

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sensorsub::Broker;
use sensorsub::client::{Client, WsConnector};
use sensorsub::config::{Settings, load_config};
use sensorsub::transport::start_websocket_server;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sensorsub")]
enum Command {
    /// Start the broker
    Server,
    /// Run the example client against a running broker
    Client {
        /// Broker URL (defaults to the configured server address)
        #[arg(long)]
        url: Option<String>,
        /// Sensor to query and subscribe to
        #[arg(long, default_value = "ABC")]
        sensor: String,
        /// How long to print pushes before disconnecting
        #[arg(long, default_value_t = 60)]
        duration_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    sensorsub::utils::logging::init(&settings.logging.level);

    match cmd {
        Command::Server => {
            if let Err(e) = run_server(settings).await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client {
            url,
            sensor,
            duration_secs,
        } => {
            let url = url.unwrap_or_else(|| settings.server.url());
            if let Err(e) = run_client(&url, &sensor, duration_secs, settings).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server(settings: Settings) -> sensorsub::Result<()> {
    let addr = settings.server.addr();
    let broker = Arc::new(Broker::new(settings.broker));

    tokio::select! {
        result = start_websocket_server(&addr, broker) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_client(
    url: &str,
    sensor: &str,
    duration_secs: u64,
    settings: Settings,
) -> sensorsub::Result<()> {
    let client = Client::with_connector(Arc::new(WsConnector::new(url)), settings.client);
    client.connect().await?;

    let present = client.sensor_connected(sensor).await?;
    println!("{sensor} connected: {present}");

    client
        .register_callback(
            sensor,
            |sensor_id: &str, readings: &str, tag: &u32| println!("{sensor_id} {readings} {tag}"),
            42,
        )
        .await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    client.disconnect().await
}
