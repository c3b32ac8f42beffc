//! ==============================================================================
//! main.rs - farm station entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the station together and runs it until SIGINT/SIGTERM.
//!
//! responsibilities:
//!     - load configuration (explicit path argument, or config/station.toml)
//!     - set up structured logging
//!     - pick the hardware provider (rppal on feature="hardware", mock otherwise)
//!     - connect the management-plane transport (fatal if it fails)
//!     - start the sensor pollers, the status server and the publisher
//!     - on shutdown: cancel every loop, let the last send finish, disconnect
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                        StationRuntime                        │
//!     │  ┌──────────┐   ┌────────────┐   ┌────────────────────────┐  │
//!     │  │ pollers  │──▶│ StateStore │◀──│ patch dispatcher       │  │
//!     │  │ gps/accel│   └─────┬──────┘   │ (transport / POST twin)│  │
//!     │  │ env/dig. │         │          └────────────────────────┘  │
//!     │  └──────────┘         ▼                                      │
//!     │              ┌────────────────┐      ┌──────────────────┐    │
//!     │              │   publisher    │─────▶│ mqtt / http sink │    │
//!     │              └────────────────┘      └──────────────────┘    │
//!     └──────────────────────────────────────────────────────────────┘
//!
//! ==============================================================================

mod config;
mod derived;
mod devices;
mod domain;
mod hal;
mod nmea;
mod patch;
mod pollers;
mod publisher;
mod runtime;
mod server;
mod store;
mod telemetry;
mod transport;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, reload, EnvFilter};

use config::StationConfig;
use publisher::Publisher;
use runtime::StationRuntime;
use transport::StationTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: logging, RUST_LOG wins over the config file's level
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================================");
    info!("  Farm Station v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================================");

    // step 2: configuration
    let config = match std::env::args().nth(1) {
        Some(path) => StationConfig::load(&path)
            .with_context(|| format!("cannot start with config {path}"))?,
        None => StationConfig::load_or_default(),
    };
    if !from_env {
        filter_handle.reload(EnvFilter::new(&config.logging.level))?;
    }
    config.log_summary();

    // step 3: hardware and shared state
    let hal = Arc::new(hal::Hal::new(
        config.sensors.clone(),
        config.actuators.clone(),
    ));
    let runtime = StationRuntime::new(config, hal);
    let cancel = runtime.cancel_token();

    // step 4: transport; without a sink there is nothing to do
    let sink = StationTransport::connect(
        &runtime.config().transport,
        runtime.patch_handler(),
        &cancel,
    )
    .await
    .context("failed to connect telemetry transport")?;

    // step 5: pollers and status server
    runtime.start_pollers()?;

    if runtime.config().server.enabled {
        let server_runtime = runtime.clone();
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_server(server_runtime, server_cancel).await {
                error!("status server error: {e:#}");
            }
        });
    }

    // step 6: publisher until a shutdown signal
    let publisher = Publisher::new(
        runtime.store(),
        sink,
        runtime.config().logging.show_sensor_data,
    );
    let publisher = tokio::spawn(publisher.run(cancel.clone()));

    let mut sigterm = signal(SignalKind::terminate())?;
    let exit_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    warn!(signal = exit_reason, "shutting down");
    runtime.shutdown();

    match publisher.await {
        Ok(sink) => sink.close().await,
        Err(e) => error!("publisher task failed: {e}"),
    }
    info!("station stopped");
    Ok(())
}
