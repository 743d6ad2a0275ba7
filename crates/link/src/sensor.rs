//! Outbound sensor sessions.
//!
//! A `SensorLink` connects to one remote sensor endpoint and keeps the most
//! recent decoded reading in shared cells that the control loop polls. The
//! session callbacks live on `SensorState` and carry no transport types, so
//! the state rules can be exercised without a socket.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use common::{
    decode_reading, FrameSlot, LinkDiagnostics, ReconnectPolicy, SensorKind, SensorReading, SensorValue,
    SharedFlag, SharedValue,
};

use crate::events::{EventBus, LinkEvent};
use crate::wait_for_shutdown;

/// State shared between a sensor session task and its readers.
#[derive(Debug)]
pub struct SensorState {
    kind: SensorKind,
    connected: SharedFlag,
    latest: SharedValue<SensorValue>,
    frame: FrameSlot,
    diagnostics: LinkDiagnostics,
}

impl SensorState {
    pub fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            connected: SharedFlag::new(false),
            latest: SharedValue::new(),
            frame: FrameSlot::new(),
            diagnostics: LinkDiagnostics::default(),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn latest(&self) -> Option<SensorValue> {
        self.latest.get()
    }

    pub fn connected_flag(&self) -> SharedFlag {
        self.connected.clone()
    }

    pub fn latest_cell(&self) -> SharedValue<SensorValue> {
        self.latest.clone()
    }

    pub fn frame_slot(&self) -> FrameSlot {
        self.frame.clone()
    }

    pub fn diagnostics(&self) -> &LinkDiagnostics {
        &self.diagnostics
    }

    /// Session opened: raise the flag and notify subscribers once.
    pub fn on_open(&self, bus: &EventBus) {
        self.connected.set(true);
        info!("[SensorLink:{}] connected", self.kind);
        bus.publish(LinkEvent::SensorConnected(self.kind));
    }

    /// Decode one payload. On failure the previous state is kept and one
    /// parse error is recorded.
    pub fn on_message(&self, payload: &str) {
        match decode_reading(self.kind, payload) {
            Ok(SensorReading::Scalar(value)) => self.latest.set(value),
            Ok(SensorReading::Frame(bytes)) => self.frame.store(bytes),
            Err(e) => {
                self.diagnostics.record_parse_error();
                warn!("[SensorLink:{}] failed to parse message: {} ({})", self.kind, payload, e);
            }
        }
    }

    pub fn on_close(&self, bus: &EventBus) {
        if self.connected.replace(false) {
            warn!("[SensorLink:{}] connection closed", self.kind);
            bus.publish(LinkEvent::SensorDisconnected(self.kind));
        }
    }

    pub fn on_error(&self, err: &dyn std::fmt::Display) {
        self.diagnostics.record_transport_error();
        error!("[SensorLink:{}] transport error: {}", self.kind, err);
    }
}

pub struct SensorLink {
    url: String,
    policy: ReconnectPolicy,
    state: Arc<SensorState>,
}

impl SensorLink {
    pub fn new(kind: SensorKind, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            state: Arc::new(SensorState::new(kind)),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.state.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> Arc<SensorState> {
        Arc::clone(&self.state)
    }

    /// Start the session task. It ends when the link closes (policy `None`)
    /// or when shutdown is signalled.
    pub fn spawn(&self, bus: EventBus, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let url = self.url.clone();
        let policy = self.policy;
        let state = Arc::clone(&self.state);
        tokio::spawn(run_session_loop(url, policy, state, bus, shutdown))
    }
}

async fn run_session_loop(
    url: String,
    policy: ReconnectPolicy,
    state: Arc<SensorState>,
    bus: EventBus,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let finished = run_session(&url, &state, &bus, shutdown.clone()).await;
        state.on_close(&bus);
        if finished {
            break;
        }

        let Some(interval) = policy.interval() else {
            debug!("[SensorLink:{}] reconnect disabled, link stays down", state.kind);
            break;
        };
        info!("[SensorLink:{}] reconnecting in {:?}", state.kind, interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
}

/// One connect + read cycle. Returns true when it ended because of shutdown.
async fn run_session(
    url: &str,
    state: &SensorState,
    bus: &EventBus,
    mut shutdown: watch::Receiver<bool>,
) -> bool {
    debug!("[SensorLink:{}] connecting to {}", state.kind, url);
    let connected = tokio::select! {
        res = connect_async(url) => res,
        _ = wait_for_shutdown(&mut shutdown) => return true,
    };
    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            state.on_error(&e);
            return false;
        }
    };
    state.on_open(bus);

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => state.on_message(&text),
                Some(Ok(Message::Binary(bytes))) => {
                    debug!("[SensorLink:{}] ignoring {} byte binary message", state.kind, bytes.len());
                }
                Some(Ok(Message::Close(_))) | None => return false,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    state.on_error(&e);
                    return false;
                }
            },
            _ = wait_for_shutdown(&mut shutdown) => {
                let _ = sink.send(Message::Close(None)).await;
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_reading_updates_latest_only() {
        let state = SensorState::new(SensorKind::LightLeft);
        state.on_message(r#"{"sensor":"light","value":12.5}"#);
        assert_eq!(state.latest(), Some(SensorValue::Float(12.5)));
        assert!(!state.is_connected());
        assert_eq!(state.diagnostics().parse_errors(), 0);
    }

    #[tokio::test]
    async fn test_malformed_reading_keeps_state_and_counts_once() {
        let bus = EventBus::default();
        let state = SensorState::new(SensorKind::Infrared);
        state.on_open(&bus);
        state.on_message(r#"{"sensor":"infrared","value":3}"#);

        state.on_message(r#"{"sensor":"infrared","value":3.7}"#);
        assert_eq!(state.latest(), Some(SensorValue::Integer(3)));
        assert!(state.is_connected());
        assert_eq!(state.diagnostics().parse_errors(), 1);

        state.on_message("not json at all");
        assert_eq!(state.latest(), Some(SensorValue::Integer(3)));
        assert_eq!(state.diagnostics().parse_errors(), 2);
    }

    #[tokio::test]
    async fn test_open_notifies_and_close_does_not_repeat() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let state = SensorState::new(SensorKind::Ultrasonic);

        state.on_open(&bus);
        assert!(state.is_connected());
        assert_eq!(rx.recv().await.unwrap(), LinkEvent::SensorConnected(SensorKind::Ultrasonic));

        state.on_close(&bus);
        state.on_close(&bus);
        assert!(!state.is_connected());
        assert_eq!(rx.recv().await.unwrap(), LinkEvent::SensorDisconnected(SensorKind::Ultrasonic));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_camera_frame_goes_to_slot() {
        let state = SensorState::new(SensorKind::Camera);
        state.on_message(r#"{"sensor":"picam","image":"AAEC"}"#);
        assert_eq!(state.latest(), None);
        assert_eq!(state.frame_slot().take(), Some(vec![0, 1, 2]));
    }

    #[tokio::test]
    async fn test_error_is_counted_without_touching_flags() {
        let state = SensorState::new(SensorKind::LightRight);
        state.on_error(&"connection refused");
        assert_eq!(state.diagnostics().transport_errors(), 1);
        assert!(!state.is_connected());
    }
}
