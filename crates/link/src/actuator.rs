//! Inbound command servers for the remote actuator clients.
//!
//! Each `CommandChannel` listens on one port and accepts WebSocket clients on
//! one route. It is output-only: commands are broadcast to every attached
//! client and anything the client sends back is just logged. Every attached
//! session gets its own bounded FIFO queue drained by a writer task, so
//! `broadcast` never blocks and preserves send order per channel. A session
//! that stops reading loses commands once its queue is full.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use common::command::CommandSink;
use common::config::ActuatorsConfig;
use common::{
    ActuatorCommand, ActuatorKind, Color, DriveCommand, IlluminationCommand, LinkDiagnostics, PanTiltCommand,
    SharedFlag, SoundCommand,
};

use crate::error::{LinkError, Result};
use crate::events::{EventBus, LinkEvent};

/// Pause after a failed `accept` so a persistent error cannot spin the task.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Commands queued per session before further ones are dropped.
pub const SESSION_QUEUE_DEPTH: usize = 256;

#[derive(Default)]
struct Sessions {
    /// Cleared by `shutdown`; handshakes finishing afterwards are refused.
    open: bool,
    senders: HashMap<u64, mpsc::Sender<Message>>,
}

struct ChannelInner {
    kind: ActuatorKind,
    connected: SharedFlag,
    initialized: AtomicBool,
    sessions: Mutex<Sessions>,
    next_session: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    diagnostics: LinkDiagnostics,
    bus: EventBus,
}

impl ChannelInner {
    /// Register a session, or `None` if the channel was shut down meanwhile.
    fn attach(&self) -> Option<(u64, mpsc::Receiver<Message>)> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            if !sessions.open {
                return None;
            }
            sessions.senders.insert(id, tx);
            self.connected.set(true);
        }
        info!("[CommandChannel:{}] actuator client connected (session {})", self.kind, id);
        self.bus.publish(LinkEvent::ActuatorAttached(self.kind));
        Some((id, rx))
    }

    fn detach(&self, id: u64) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .remove(&id);
        // Last detach wins; in practice there is a single client per channel.
        self.connected.set(false);
        warn!("[CommandChannel:{}] actuator client disconnected (session {})", self.kind, id);
        self.bus.publish(LinkEvent::ActuatorDetached(self.kind));
    }
}

pub struct CommandChannel {
    bind_addr: String,
    inner: Arc<ChannelInner>,
}

impl CommandChannel {
    pub fn new(kind: ActuatorKind, bind_addr: impl Into<String>, bus: EventBus) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            inner: Arc::new(ChannelInner {
                kind,
                connected: SharedFlag::new(false),
                initialized: AtomicBool::new(false),
                sessions: Mutex::new(Sessions::default()),
                next_session: AtomicU64::new(1),
                local_addr: Mutex::new(None),
                listener_task: Mutex::new(None),
                diagnostics: LinkDiagnostics::default(),
                bus,
            }),
        }
    }

    pub fn kind(&self) -> ActuatorKind {
        self.inner.kind
    }

    pub fn route(&self) -> &'static str {
        self.inner.kind.route()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    pub fn connected_flag(&self) -> SharedFlag {
        self.inner.connected.clone()
    }

    pub fn session_count(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .senders
            .len()
    }

    /// Bound address once listening. Useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_listening(&self) -> bool {
        self.local_addr().is_some()
    }

    pub fn diagnostics(&self) -> &LinkDiagnostics {
        &self.inner.diagnostics
    }

    /// Bind the listen socket and start accepting clients.
    ///
    /// Returns `Ok(true)` when this call bound the socket and `Ok(false)` when
    /// the channel was already initialized. A bind failure leaves the channel
    /// uninitialized so a later call can retry.
    pub async fn initialize(&self) -> Result<bool> {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            debug!("[CommandChannel:{}] already initialized", self.inner.kind);
            return Ok(false);
        }

        let (listener, addr) = match bind(&self.bind_addr).await {
            Ok(bound) => bound,
            Err(e) => {
                self.inner.initialized.store(false, Ordering::Release);
                error!("[CommandChannel:{}] failed to bind {}: {}", self.inner.kind, self.bind_addr, e);
                return Err(e);
            }
        };

        *self.inner.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
        self.inner.sessions.lock().unwrap_or_else(PoisonError::into_inner).open = true;
        info!(
            "[CommandChannel:{}] initialized and listening at ws://{}{}",
            self.inner.kind,
            addr,
            self.route()
        );
        self.inner.bus.publish(LinkEvent::ActuatorListening(self.inner.kind));

        let handle = tokio::spawn(accept_loop(listener, Arc::clone(&self.inner)));
        *self.inner.listener_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(true)
    }

    /// Queue `json` for every attached client. Returns how many sessions it
    /// was queued to; with nobody attached this does nothing and returns 0.
    /// A session whose queue is full misses this command.
    pub fn broadcast(&self, json: &str) -> usize {
        let sessions = self.inner.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.senders.is_empty() {
            debug!("[CommandChannel:{}] no client attached, skipping: {}", self.inner.kind, json);
            return 0;
        }
        let mut sent = 0;
        for (id, tx) in &sessions.senders {
            match tx.try_send(Message::text(json.to_owned())) {
                Ok(()) => sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.diagnostics.record_dropped();
                    debug!("[CommandChannel:{}] session {} queue full, dropping command", self.inner.kind, id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        debug!("[CommandChannel:{}] broadcast to {}: {}", self.inner.kind, sent, json);
        sent
    }

    /// Stop listening and close every attached session.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .inner
            .listener_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        let drained: Vec<_> = {
            let mut sessions = self.inner.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions.open = false;
            sessions.senders.drain().collect()
        };
        // A full queue gets no close frame; dropping the sender still ends
        // the writer once the backlog is flushed.
        for (_, tx) in drained {
            let _ = tx.try_send(Message::Close(None));
        }
        if self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("[CommandChannel:{}] server stopped", self.inner.kind);
        }
        self.inner.initialized.store(false, Ordering::Release);
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn bind(addr: &str) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

async fn accept_loop(listener: TcpListener, inner: Arc<ChannelInner>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(serve_client(stream, peer, Arc::clone(&inner)));
            }
            Err(e) => {
                inner.diagnostics.record_transport_error();
                warn!("[CommandChannel:{}] accept failed: {}", inner.kind, e);
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

async fn serve_client(stream: TcpStream, peer: SocketAddr, inner: Arc<ChannelInner>) {
    let route = inner.kind.route();
    let check_route = move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        if req.uri().path() == route {
            return Ok(resp);
        }
        let mut reject = ErrorResponse::new(Some(format!("unknown route {}", req.uri().path())));
        *reject.status_mut() = StatusCode::NOT_FOUND;
        Err(reject)
    };

    let mut ws = match accept_hdr_async(stream, check_route).await {
        Ok(ws) => ws,
        Err(e) => {
            inner.diagnostics.record_transport_error();
            warn!("[CommandChannel:{}] handshake with {} failed: {}", inner.kind, peer, e);
            return;
        }
    };

    let (id, mut outbound) = match inner.attach() {
        Some(session) => session,
        None => {
            debug!("[CommandChannel:{}] channel closed, refusing {}", inner.kind, peer);
            let _ = ws.close(None).await;
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    let writer = async {
        while let Some(msg) = outbound.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                debug!("[CommandChannel:{}] send to session {} failed: {}", inner.kind, id, e);
                break;
            }
            if closing {
                break;
            }
        }
    };

    let reader = async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!("[CommandChannel:{}] received: {}", inner.kind, text);
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    inner.diagnostics.record_transport_error();
                    error!("[CommandChannel:{}] session {} error: {}", inner.kind, id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }
    inner.detach(id);
}

/// A command channel specialised to one command type.
pub struct ActuatorServer<C> {
    channel: CommandChannel,
    _command: PhantomData<fn(&C)>,
}

impl<C: ActuatorCommand> ActuatorServer<C> {
    pub fn new(bind_addr: impl Into<String>, bus: EventBus) -> Self {
        Self {
            channel: CommandChannel::new(C::KIND, bind_addr, bus),
            _command: PhantomData,
        }
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub async fn initialize(&self) -> Result<bool> {
        self.channel.initialize().await
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn send(&self, command: &C) -> usize {
        match command.to_json() {
            Ok(json) => self.channel.broadcast(&json),
            Err(e) => {
                error!("[ActuatorServer:{}] failed to encode command: {}", C::KIND, e);
                0
            }
        }
    }
}

impl<C: ActuatorCommand> CommandSink<C> for ActuatorServer<C> {
    fn send_command(&self, command: &C) -> usize {
        self.send(command)
    }
}

pub type IlluminationServer = ActuatorServer<IlluminationCommand>;
pub type DriveServer = ActuatorServer<DriveCommand>;
pub type PanTiltServer = ActuatorServer<PanTiltCommand>;
pub type SpeakerServer = ActuatorServer<SoundCommand>;

impl ActuatorServer<IlluminationCommand> {
    pub fn set_colors(&self, colors: &[Color]) -> usize {
        self.send(&IlluminationCommand::from_colors(colors))
    }

    pub fn turn_off(&self) -> usize {
        self.send(&IlluminationCommand::TurnOff)
    }
}

impl ActuatorServer<DriveCommand> {
    pub fn set_duty(&self, duty1: i32, duty2: i32, duty3: i32, duty4: i32) -> usize {
        self.send(&DriveCommand::new(duty1, duty2, duty3, duty4))
    }

    pub fn stop(&self) -> usize {
        self.send(&DriveCommand::STOP)
    }
}

impl ActuatorServer<PanTiltCommand> {
    pub fn move_to(&self, servo0: i32, servo1: i32, speed: f64) -> usize {
        self.send(&PanTiltCommand::new(servo0, servo1, speed))
    }
}

impl ActuatorServer<SoundCommand> {
    pub fn play(&self, code: &str) -> usize {
        self.send(&SoundCommand::new(code))
    }

    pub fn play_random(&self) -> (SoundCommand, usize) {
        let cmd = SoundCommand::random();
        let sent = self.send(&cmd);
        (cmd, sent)
    }
}

/// The four actuator servers of the rig.
pub struct ActuatorBank {
    pub illumination: IlluminationServer,
    pub drive: DriveServer,
    pub pan_tilt: PanTiltServer,
    pub speaker: SpeakerServer,
    led_count: usize,
}

impl ActuatorBank {
    pub fn new(config: &ActuatorsConfig, bus: &EventBus) -> Self {
        Self {
            illumination: ActuatorServer::new(config.bind_addr(ActuatorKind::Illumination), bus.clone()),
            drive: ActuatorServer::new(config.bind_addr(ActuatorKind::Drive), bus.clone()),
            pan_tilt: ActuatorServer::new(config.bind_addr(ActuatorKind::PanTilt), bus.clone()),
            speaker: ActuatorServer::new(config.bind_addr(ActuatorKind::Speaker), bus.clone()),
            led_count: config.led_count,
        }
    }

    pub fn channel(&self, kind: ActuatorKind) -> &CommandChannel {
        match kind {
            ActuatorKind::Illumination => self.illumination.channel(),
            ActuatorKind::Drive => self.drive.channel(),
            ActuatorKind::PanTilt => self.pan_tilt.channel(),
            ActuatorKind::Speaker => self.speaker.channel(),
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &CommandChannel> {
        ActuatorKind::ALL.into_iter().map(move |k| self.channel(k))
    }

    pub fn led_count(&self) -> usize {
        self.led_count
    }

    /// Initialize every server. All servers are attempted even if one fails;
    /// returns how many were newly bound.
    pub async fn initialize_all(&self) -> Result<usize> {
        let mut bound = 0;
        let mut failed = Vec::new();
        for channel in self.channels() {
            match channel.initialize().await {
                Ok(true) => bound += 1,
                Ok(false) => {}
                Err(e) => failed.push(format!("{}: {}", channel.kind(), e)),
            }
        }
        if !failed.is_empty() {
            return Err(LinkError::Activation(failed.join(", ")));
        }
        info!("[ActuatorBank] actuator servers initialized ({} newly bound)", bound);
        Ok(bound)
    }

    pub fn all_listening(&self) -> bool {
        self.channels().all(|c| c.is_listening())
    }

    /// Send a ring frame, padded with black or truncated to the LED count.
    pub fn set_leds(&self, colors: &[Color]) -> usize {
        let mut frame = colors.to_vec();
        frame.resize(self.led_count, Color::BLACK);
        self.illumination.set_colors(&frame)
    }

    pub fn leds_off(&self) -> usize {
        self.illumination.send(&IlluminationCommand::all_off(self.led_count))
    }

    pub fn shutdown(&self) {
        for channel in self.channels() {
            channel.shutdown();
        }
    }
}

impl CommandSink<DriveCommand> for ActuatorBank {
    fn send_command(&self, command: &DriveCommand) -> usize {
        self.drive.send(command)
    }
}
