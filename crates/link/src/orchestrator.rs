//! Coordination session with the remote orchestrator.
//!
//! The link connects out to the orchestrator and never gives up: after every
//! close or failed attempt it waits a fixed back-off and tries again. While
//! connected it forwards sensor-connected milestones as status messages and
//! reacts to the orchestrator's state broadcasts:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!      ▲               │              │
//!      └──── back-off ◄┴──────────────┘ (close / error)
//! ```
//!
//! `actuator_clients_started` opens the local actuator servers exactly once;
//! `all_actuators_connected` marks the rig ready.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use common::{LinkDiagnostics, ModuleStatus, OrchestratorState, OrchestratorStatus, SensorKind, SharedFlag};

use crate::actuator::ActuatorBank;
use crate::events::{EventBus, LinkEvent};
use crate::wait_for_shutdown;

/// Connect attempts kept for inspection; older ones are discarded.
pub const RECENT_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct OrchestratorLink {
    url: String,
    retry: Duration,
    bank: Arc<ActuatorBank>,
    bus: EventBus,
    session: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    alive: SharedFlag,
    state: watch::Sender<LinkState>,
    activated: AtomicBool,
    ready: SharedFlag,
    attempt_count: AtomicU64,
    recent_attempts: Mutex<VecDeque<Instant>>,
    diagnostics: LinkDiagnostics,
}

impl OrchestratorLink {
    pub fn new(url: impl Into<String>, retry: Duration, bank: Arc<ActuatorBank>, bus: EventBus) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            url: url.into(),
            retry,
            bank,
            bus,
            session: Mutex::new(None),
            alive: SharedFlag::new(false),
            state,
            activated: AtomicBool::new(false),
            ready: SharedFlag::new(false),
            attempt_count: AtomicU64::new(0),
            recent_attempts: Mutex::new(VecDeque::with_capacity(RECENT_ATTEMPTS)),
            diagnostics: LinkDiagnostics::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Set once the orchestrator reports every actuator client attached.
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub fn actuators_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    /// Connect attempts made since the link was created.
    pub fn attempt_count(&self) -> u64 {
        self.attempt_count.load(Ordering::Relaxed)
    }

    /// Start times of the last `RECENT_ATTEMPTS` connect attempts, oldest first.
    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.recent_attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn record_attempt(&self) {
        self.attempt_count.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent_attempts.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == RECENT_ATTEMPTS {
            recent.pop_front();
        }
        recent.push_back(Instant::now());
    }

    pub fn diagnostics(&self) -> &LinkDiagnostics {
        &self.diagnostics
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    /// Send a status message now, or drop it if no session is open.
    pub fn send_status(&self, status: &ModuleStatus) -> bool {
        let json = match status.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("[OrchestratorLink] failed to encode status: {}", e);
                return false;
            }
        };
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match session.as_ref() {
            Some(tx) if self.alive.get() && tx.send(Message::text(json.clone())).is_ok() => {
                info!("[OrchestratorLink] sent: {}", json);
                true
            }
            _ => {
                self.diagnostics.record_dropped();
                warn!("[OrchestratorLink] not connected, dropping: {}", json);
                false
            }
        }
    }

    pub fn notify_sensor_connected(&self, kind: SensorKind) -> bool {
        info!("[OrchestratorLink] sensor client connected: {}", kind.module_name());
        self.send_status(&ModuleStatus::connected(kind.module_name()))
    }

    /// Interpret one inbound message. Malformed input is logged and ignored.
    pub async fn handle_message(&self, text: &str) -> Option<OrchestratorState> {
        debug!("[OrchestratorLink] received: {}", text);
        let status = match OrchestratorStatus::parse(text) {
            Ok(status) => status,
            Err(e) => {
                self.diagnostics.record_parse_error();
                warn!("[OrchestratorLink] failed to parse orchestrator message: {} ({})", text, e);
                return None;
            }
        };

        let state = status.state();
        match &state {
            OrchestratorState::ActuatorClientsStarted => {
                info!("[OrchestratorLink] remote actuator clients started, starting actuator servers");
                self.activate_actuators().await;
            }
            OrchestratorState::AllActuatorsConnected => {
                self.ready.set(true);
                info!("[OrchestratorLink] all actuators connected, system ready");
            }
            OrchestratorState::Other(other) => {
                warn!("[OrchestratorLink] ignoring unknown orchestrator state: {}", other);
            }
        }
        self.bus.publish(LinkEvent::OrchestratorState(state.clone()));
        Some(state)
    }

    /// Initialize every actuator server, once. A repeated start signal is
    /// ignored; a failed start releases the guard so the next signal retries.
    pub async fn activate_actuators(&self) -> bool {
        if self.activated.swap(true, Ordering::AcqRel) {
            info!("[OrchestratorLink] actuator servers already started, ignoring");
            return false;
        }
        match self.bank.initialize_all().await {
            Ok(_) => true,
            Err(e) => {
                self.activated.store(false, Ordering::Release);
                error!("[OrchestratorLink] {}", e);
                false
            }
        }
    }

    /// Spawn the connection loop and the sensor-event forwarder.
    ///
    /// The bus subscription is taken before returning, so sensor links
    /// started afterwards cannot race past the forwarder.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let events = self.bus.subscribe();
        vec![
            tokio::spawn(Arc::clone(self).run(shutdown.clone())),
            tokio::spawn(Arc::clone(self).forward_sensor_events(events, shutdown)),
        ]
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.set_state(LinkState::Connecting);
            self.record_attempt();
            info!("[OrchestratorLink] connecting to orchestrator at {}", self.url);

            let connected = tokio::select! {
                res = connect_async(self.url.as_str()) => res,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };
            let stopping = match connected {
                Ok((ws, _)) => self.serve(ws, &mut shutdown).await,
                Err(e) => {
                    self.diagnostics.record_transport_error();
                    error!("[OrchestratorLink] connection failed: {}", e);
                    false
                }
            };
            self.on_closed();
            if stopping {
                break;
            }

            warn!("[OrchestratorLink] disconnected, retrying in {:?}", self.retry);
            tokio::select! {
                _ = tokio::time::sleep(self.retry) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
        self.set_state(LinkState::Disconnected);
        debug!("[OrchestratorLink] stopped");
    }

    /// Pump one open session until it closes. Returns true on shutdown.
    async fn serve(
        &self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut outbound) = mpsc::unbounded_channel();
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.alive.set(true);
        self.set_state(LinkState::Connected);
        info!("[OrchestratorLink] connected to orchestrator");
        self.bus.publish(LinkEvent::OrchestratorConnected);

        loop {
            tokio::select! {
                Some(msg) = outbound.recv() => {
                    if let Err(e) = sink.send(msg).await {
                        self.diagnostics.record_transport_error();
                        error!("[OrchestratorLink] send failed: {}", e);
                        return false;
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_message(&text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.diagnostics.record_transport_error();
                        error!("[OrchestratorLink] error: {}", e);
                        return false;
                    }
                },
                _ = wait_for_shutdown(shutdown) => {
                    let _ = sink.send(Message::Close(None)).await;
                    info!("[OrchestratorLink] connection closed on shutdown");
                    return true;
                }
            }
        }
    }

    fn on_closed(&self) {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).take();
        if self.alive.replace(false) {
            warn!("[OrchestratorLink] connection closed");
            self.bus.publish(LinkEvent::OrchestratorDisconnected);
        }
        self.set_state(LinkState::Disconnected);
    }

    async fn forward_sensor_events(
        self: Arc<Self>,
        mut events: broadcast::Receiver<LinkEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                ev = events.recv() => ev,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };
            match event {
                Ok(LinkEvent::SensorConnected(kind)) => {
                    self.notify_sensor_connected(kind);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[OrchestratorLink] event forwarder lagged, {} events lost", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::ActuatorsConfig;

    fn ephemeral_bank(bus: &EventBus) -> Arc<ActuatorBank> {
        let config = ActuatorsConfig {
            bind_host: "127.0.0.1".into(),
            motor_port: 0,
            led_port: 0,
            servo_port: 0,
            speaker_port: 0,
            led_count: 8,
        };
        Arc::new(ActuatorBank::new(&config, bus))
    }

    fn link() -> OrchestratorLink {
        let bus = EventBus::default();
        let bank = ephemeral_bank(&bus);
        OrchestratorLink::new("ws://127.0.0.1:1", Duration::from_millis(50), bank, bus)
    }

    #[tokio::test]
    async fn test_status_dropped_while_disconnected() {
        let link = link();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.notify_sensor_connected(SensorKind::Camera));
        assert_eq!(link.diagnostics().dropped_messages(), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_ignored() {
        let link = link();
        assert_eq!(link.handle_message("{broken").await, None);
        assert_eq!(link.diagnostics().parse_errors(), 1);

        let state = link.handle_message(r#"{"orchestrator":"pi","status":"warming_up"}"#).await;
        assert_eq!(state, Some(OrchestratorState::Other("warming_up".into())));
        assert!(!link.actuators_activated());
        assert!(!link.is_ready());
    }

    #[tokio::test]
    async fn test_start_signal_initializes_bank_once() {
        let link = link();
        let msg = r#"{"orchestrator":"pi","status":"actuator_clients_started"}"#;
        assert_eq!(link.handle_message(msg).await, Some(OrchestratorState::ActuatorClientsStarted));
        assert!(link.actuators_activated());
        assert!(link.bank.all_listening());
        let addrs: Vec<_> = link.bank.channels().map(|c| c.local_addr()).collect();

        link.handle_message(msg).await;
        let again: Vec<_> = link.bank.channels().map(|c| c.local_addr()).collect();
        assert_eq!(addrs, again);
        link.bank.shutdown();
    }

    #[tokio::test]
    async fn test_attempt_history_is_bounded() {
        let bus = EventBus::default();
        let bank = ephemeral_bank(&bus);
        let link = Arc::new(OrchestratorLink::new(
            "ws://127.0.0.1:1",
            Duration::from_millis(1),
            bank,
            bus,
        ));
        let (stop, shutdown) = watch::channel(false);
        let tasks = link.spawn(shutdown);

        for _ in 0..500 {
            if link.attempt_count() > 2 * RECENT_ATTEMPTS as u64 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.send_replace(true);
        for task in tasks {
            task.await.unwrap();
        }

        assert!(link.attempt_count() > 2 * RECENT_ATTEMPTS as u64);
        let recent = link.connect_attempts();
        assert_eq!(recent.len(), RECENT_ATTEMPTS);
        assert!(recent.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn test_all_actuators_connected_sets_ready() {
        let link = link();
        link.handle_message(r#"{"orchestrator":"pi","status":"all_actuators_connected"}"#)
            .await;
        assert!(link.is_ready());
        assert!(!link.actuators_activated());
    }
}
