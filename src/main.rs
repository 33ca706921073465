pub mod agent;
pub mod config;
pub mod gpio;
pub mod link;
pub mod session;

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::agent::DeviceAgent;
use crate::config::AgentConfig;
use crate::gpio::{DebouncedButton, StatusLed};
use crate::link::{NmcliStation, TransportLink};
use crate::session::MqttSession;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AgentConfig::load(config_path)?;

    info!(
        hostname = %config.network.hostname,
        broker = %config.broker.host,
        "Initializing device agent"
    );

    let button = DebouncedButton::new(
        config.pins.button,
        Duration::from_millis(config.pins.debounce_ms),
    )?;
    let led = StatusLed::new(config.pins.led, config.pins.led_active_low)?;

    let link = TransportLink::new(
        NmcliStation::new(),
        config.network.clone(),
        config.timing.link_poll(),
    );
    let session = MqttSession::new(
        config.broker.clone(),
        config.topics.clone(),
        config.timing.poll_window(),
    );

    let agent = DeviceAgent::new(
        link,
        session,
        button,
        led,
        config.topics.clone(),
        (
            config.broker.username.clone(),
            config.broker.password.clone(),
        ),
        config.timing.clone(),
    );

    // Runs for the process lifetime; only power loss or a fault ends it.
    agent.run().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
