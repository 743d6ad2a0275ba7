//! wheels-host: control-host side of the robot link.
//!
//! Connects to the remote host's sensor servers and orchestrator, serves the
//! actuator command channels once the orchestrator asks for them, runs the
//! boot greeting and drives the fixed-rate control loop, taking motor pulses
//! from the stdin drive console, until Ctrl-C.

use std::error::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::config::load_config;
use common::{CommandSink, DriveCommand, LogDisplay, RigConfig};
use control::{spawn_console, ControlLoop, ControlRequest, SensorView};
use link::LocalHost;

const DEFAULT_CONFIG: &str = "configs/rig.toml";

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let explicit = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')))
        .cloned();

    let (config, source) = match explicit {
        Some(path) => (load_config(&path)?, path),
        None if Path::new(DEFAULT_CONFIG).exists() => (load_config(DEFAULT_CONFIG)?, DEFAULT_CONFIG.to_string()),
        None => (RigConfig::default(), "built-in defaults".to_string()),
    };

    init_tracing(&config.logging.level);
    info!("wheels-host v{}", env!("CARGO_PKG_VERSION"));
    info!("configuration: {}", source);
    info!(
        "remote host {}, orchestrator port {}, retry every {} ms",
        config.remote.host, config.orchestrator.port, config.orchestrator.retry_ms
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let (requests_tx, requests_rx) = mpsc::channel();

    let mut host = LocalHost::new(config.clone());
    {
        let _guard = runtime.enter();
        host.start();
    }

    let views = host
        .sensors()
        .iter()
        .map(|s| SensorView {
            kind: s.kind(),
            connected: s.connected_flag(),
            latest: s.latest_cell(),
            frame: s.frame_slot(),
        })
        .collect();
    let drive: Arc<dyn CommandSink<DriveCommand>> = host.bank();
    let control = ControlLoop::new(&config.control, views, drive, Arc::new(LogDisplay), requests_rx)
        .spawn(Arc::clone(&shutdown_flag))?;
    // Detached: the console blocks on stdin and ends with the process.
    spawn_console(requests_tx.clone(), config.control.drive_duty)?;

    info!("running, press Ctrl-C to stop");
    runtime.block_on(tokio::signal::ctrl_c())?;
    info!("Ctrl-C received, shutting down");

    if requests_tx.send(ControlRequest::Stop).is_err() {
        warn!("control loop already gone, drive not stopped");
    }
    shutdown_flag.store(true, Ordering::Relaxed);
    match control.join() {
        Ok(stats) => info!(
            "control loop: {} ticks, {} late, {} motor pulses",
            stats.ticks, stats.late_ticks, stats.pulses
        ),
        Err(_) => error!("control loop panicked"),
    }

    let recorder = runtime.block_on(host.shutdown());
    if let Some(path) = &config.logging.event_log {
        let rows = recorder.save_to_csv(path)?;
        info!("wrote {} link events to {}", rows, path);
    }
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
