//! Stand-in for the remote robot host.
//!
//! Serves synthetic sensor streams and the orchestrator endpoint, then
//! starts actuator clients against the control host once every sensor
//! client has reported in. Ports come from the same rig config as the
//! control host.
//!
//! Usage: remote_sim [config.toml] [--control-host <addr>]

use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use common::config::load_config;
use common::status::{STATUS_ACTUATOR_CONNECTED, STATUS_BOOT_SUCCESS, STATUS_CONNECTED};
use common::{ActuatorKind, ModuleStatus, OrchestratorState, OrchestratorStatus, RigConfig, SensorKind};

const ORCHESTRATOR_NAME: &str = "raspberry";
const ACTUATOR_RETRY: Duration = Duration::from_secs(2);

/// Orchestrator bookkeeping shared by every simulated module.
struct Hub {
    outbound: broadcast::Sender<String>,
    booted: Mutex<HashSet<String>>,
    sensor_clients: Mutex<HashSet<String>>,
    actuator_clients: Mutex<HashSet<String>>,
    actuators_launched: AtomicBool,
}

impl Hub {
    fn new() -> Self {
        let (outbound, _) = broadcast::channel(64);
        Self {
            outbound,
            booted: Mutex::new(HashSet::new()),
            sensor_clients: Mutex::new(HashSet::new()),
            actuator_clients: Mutex::new(HashSet::new()),
            actuators_launched: AtomicBool::new(false),
        }
    }

    fn broadcast_state(&self, state: OrchestratorState) {
        match OrchestratorStatus::new(ORCHESTRATOR_NAME, &state).to_json() {
            Ok(json) => {
                info!("[Orchestrator] broadcasting {}", json);
                let _ = self.outbound.send(json);
            }
            Err(e) => error!("[Orchestrator] failed to encode state: {}", e),
        }
    }

    /// Returns true when this message completed the sensor client set.
    fn on_module_status(&self, status: &ModuleStatus) -> bool {
        match status.status.as_str() {
            STATUS_BOOT_SUCCESS => {
                let mut booted = self.booted.lock().unwrap_or_else(PoisonError::into_inner);
                booted.insert(status.module.clone());
                info!("[Orchestrator] boot success: {} ({})", status.module, booted.len());
                false
            }
            STATUS_CONNECTED => {
                let known = SensorKind::ALL.iter().any(|k| k.module_name() == status.module);
                if !known {
                    warn!("[Orchestrator] unknown sensor client {}", status.module);
                    return false;
                }
                let mut clients = self.sensor_clients.lock().unwrap_or_else(PoisonError::into_inner);
                clients.insert(status.module.clone());
                info!(
                    "[Orchestrator] sensor client connected: {} ({}/{})",
                    status.module,
                    clients.len(),
                    SensorKind::ALL.len()
                );
                clients.len() == SensorKind::ALL.len()
            }
            STATUS_ACTUATOR_CONNECTED => {
                let complete = {
                    let mut clients = self.actuator_clients.lock().unwrap_or_else(PoisonError::into_inner);
                    clients.insert(status.module.clone());
                    info!(
                        "[Orchestrator] actuator client connected: {} ({}/{})",
                        status.module,
                        clients.len(),
                        ActuatorKind::ALL.len()
                    );
                    clients.len() == ActuatorKind::ALL.len()
                };
                if complete {
                    self.broadcast_state(OrchestratorState::AllActuatorsConnected);
                }
                false
            }
            other => {
                debug!("[Orchestrator] ignoring status {} from {}", other, status.module);
                false
            }
        }
    }
}

fn sensor_payload(kind: SensorKind, tick: u64, rng: &mut impl Rng) -> String {
    let name = kind.module_name().trim_end_matches("_client");
    match kind {
        SensorKind::Ultrasonic => {
            let distance = 60.0 + 40.0 * (tick as f64 * 0.2).sin() + rng.gen_range(-1.0..1.0);
            format!(r#"{{"sensor":"{}","distance":{:.2}}}"#, name, distance)
        }
        SensorKind::Infrared => format!(r#"{{"sensor":"{}","value":{}}}"#, name, rng.gen_range(0..8)),
        SensorKind::LightLeft | SensorKind::LightRight => {
            let value = 2.5 + (tick as f64 * 0.1).cos() + rng.gen_range(-0.1..0.1);
            format!(r#"{{"sensor":"{}","value":{:.3}}}"#, name, value)
        }
        SensorKind::Camera => {
            let mut frame = vec![0xff, 0xd8, 0xff, 0xe0];
            frame.extend((0..512).map(|_| rng.gen::<u8>()));
            frame.extend([0xff, 0xd9]);
            let image = base64::engine::general_purpose::STANDARD.encode(frame);
            format!(r#"{{"sensor":"{}","image":"{}"}}"#, name, image)
        }
    }
}

async fn run_sensor_server(kind: SensorKind, port: u16, period: Duration) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("[Sensor:{}] serving on port {}", kind, port);
    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(async move {
            let mut ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("[Sensor:{}] handshake with {} failed: {}", kind, peer, e);
                    return;
                }
            };
            info!("[Sensor:{}] client {} connected", kind, peer);
            let mut ticker = tokio::time::interval(period);
            let mut tick = 0u64;
            loop {
                ticker.tick().await;
                let payload = sensor_payload(kind, tick, &mut rand::thread_rng());
                if ws.send(Message::text(payload)).await.is_err() {
                    break;
                }
                tick += 1;
            }
            info!("[Sensor:{}] client {} disconnected", kind, peer);
        });
    }
}

async fn serve_orchestrator_client(
    stream: TcpStream,
    hub: Arc<Hub>,
    config: Arc<RigConfig>,
    control_host: Arc<str>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("[Orchestrator] handshake failed: {}", e);
            return;
        }
    };
    info!("[Orchestrator] client connected");
    let (mut sink, mut stream) = ws.split();
    let mut outbound = hub.outbound.subscribe();

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Ok(text) => {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let status: ModuleStatus = match serde_json::from_str(&text) {
                        Ok(status) => status,
                        Err(_) => {
                            warn!("[Orchestrator] could not parse message: {}", text);
                            continue;
                        }
                    };
                    if hub.on_module_status(&status) && !hub.actuators_launched.swap(true, Ordering::AcqRel) {
                        info!("[Orchestrator] all sensor clients connected, launching actuator clients");
                        launch_actuator_clients(&hub, &config, &control_host);
                        hub.broadcast_state(OrchestratorState::ActuatorClientsStarted);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[Orchestrator] client error: {}", e);
                    break;
                }
            },
        }
    }
    info!("[Orchestrator] client disconnected");
}

async fn run_orchestrator(
    port: u16,
    hub: Arc<Hub>,
    config: Arc<RigConfig>,
    control_host: Arc<str>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("[Orchestrator] listening on port {}", port);
    for kind in SensorKind::ALL {
        hub.on_module_status(&ModuleStatus {
            module: kind.module_name().trim_end_matches("_client").to_string(),
            status: STATUS_BOOT_SUCCESS.to_string(),
        });
    }
    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(serve_orchestrator_client(
            stream,
            Arc::clone(&hub),
            Arc::clone(&config),
            Arc::clone(&control_host),
        ));
    }
}

fn launch_actuator_clients(hub: &Arc<Hub>, config: &RigConfig, control_host: &str) {
    for kind in ActuatorKind::ALL {
        let url = format!("ws://{}:{}{}", control_host, config.actuators.port(kind), kind.route());
        tokio::spawn(run_actuator_client(kind, url, Arc::clone(hub)));
    }
}

/// Connect to one command server, retrying until it accepts, then log every
/// command received.
async fn run_actuator_client(kind: ActuatorKind, url: String, hub: Arc<Hub>) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                info!("[Actuator:{}] connected to {}", kind, url);
                hub.on_module_status(&ModuleStatus {
                    module: kind.client_name().to_string(),
                    status: STATUS_ACTUATOR_CONNECTED.to_string(),
                });
                while let Some(msg) = ws.next().await {
                    match msg {
                        Ok(Message::Text(text)) => info!("[Actuator:{}] command: {}", kind, text),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("[Actuator:{}] error: {}", kind, e);
                            break;
                        }
                    }
                }
                hub.actuator_clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(kind.client_name());
                warn!("[Actuator:{}] disconnected", kind);
            }
            Err(e) => debug!("[Actuator:{}] connect to {} failed: {}", kind, url, e),
        }
        tokio::time::sleep(ACTUATOR_RETRY).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let control_host: Arc<str> = args
        .iter()
        .position(|a| a == "--control-host")
        .and_then(|i| args.get(i + 1))
        .map_or("127.0.0.1", String::as_str)
        .into();
    let config = match args.get(1).filter(|a| !a.starts_with("--")) {
        Some(path) => load_config(path)?,
        None => RigConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    info!("remote simulator, actuator clients will target {}", control_host);

    let config = Arc::new(config);
    let hub = Arc::new(Hub::new());
    let mut tasks = tokio::task::JoinSet::new();
    for kind in SensorKind::ALL {
        let period = if kind.is_camera() {
            Duration::from_millis(500)
        } else {
            Duration::from_millis(200)
        };
        tasks.spawn(run_sensor_server(kind, config.sensors.port(kind), period));
    }
    tasks.spawn(run_orchestrator(
        config.orchestrator.port,
        Arc::clone(&hub),
        Arc::clone(&config),
        Arc::clone(&control_host),
    ));

    tokio::select! {
        res = tasks.join_next() => {
            if let Some(Ok(Err(e))) = res {
                error!("server failed: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
