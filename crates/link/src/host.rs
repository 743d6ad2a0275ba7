//! Wiring of every link for one rig.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::{EventRecorder, RigConfig, SensorKind};

use crate::actuator::ActuatorBank;
use crate::events::EventBus;
use crate::orchestrator::OrchestratorLink;
use crate::sensor::{SensorLink, SensorState};
use crate::sequencer::StartupSequencer;

const STOP_GRACE: Duration = Duration::from_secs(2);

/// Owns the sensor links, the actuator servers, the orchestrator session
/// and the boot sequencer of the local host.
pub struct LocalHost {
    config: RigConfig,
    bus: EventBus,
    recorder: EventRecorder,
    sensors: Vec<SensorLink>,
    bank: Arc<ActuatorBank>,
    orchestrator: Arc<OrchestratorLink>,
    sequencer: StartupSequencer,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    recorder_task: Option<JoinHandle<()>>,
}

impl LocalHost {
    pub fn new(config: RigConfig) -> Self {
        let bus = EventBus::default();
        let bank = Arc::new(ActuatorBank::new(&config.actuators, &bus));
        let sensors = SensorKind::ALL
            .iter()
            .map(|&kind| SensorLink::new(kind, config.sensor_url(kind), config.sensors.reconnect))
            .collect();
        let orchestrator = Arc::new(OrchestratorLink::new(
            config.orchestrator_url(),
            config.orchestrator_retry(),
            Arc::clone(&bank),
            bus.clone(),
        ));
        let sequencer = StartupSequencer::new(Arc::clone(&bank), Duration::from_millis(config.boot.poll_ms));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            bus,
            recorder: EventRecorder::new(),
            sensors,
            bank,
            orchestrator,
            sequencer,
            shutdown_tx,
            tasks: Vec::new(),
            recorder_task: None,
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn recorder(&self) -> EventRecorder {
        self.recorder.clone()
    }

    pub fn sensor(&self, kind: SensorKind) -> Option<Arc<SensorState>> {
        self.sensors.iter().find(|s| s.kind() == kind).map(SensorLink::state)
    }

    pub fn sensors(&self) -> Vec<Arc<SensorState>> {
        self.sensors.iter().map(SensorLink::state).collect()
    }

    pub fn bank(&self) -> Arc<ActuatorBank> {
        Arc::clone(&self.bank)
    }

    pub fn orchestrator(&self) -> Arc<OrchestratorLink> {
        Arc::clone(&self.orchestrator)
    }

    pub fn sequencer(&self) -> &StartupSequencer {
        &self.sequencer
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn every link and the configured boot script. Must run inside a
    /// tokio runtime. Calling it twice does nothing.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            warn!("[LocalHost] already started");
            return;
        }
        info!("[LocalHost] starting, remote host {}", self.config.remote.host);
        self.recorder_task = Some(self.bus.spawn_recorder(self.recorder.clone()));

        // Orchestrator first so its forwarder sees the first sensor connects.
        let shutdown = self.shutdown_tx.subscribe();
        self.tasks.extend(self.orchestrator.spawn(shutdown.clone()));
        for sensor in &self.sensors {
            self.tasks.push(sensor.spawn(self.bus.clone(), shutdown.clone()));
        }
        self.sequencer.start(self.config.boot.steps.clone());
    }

    /// Stop every link, close every socket and return the session log.
    pub async fn shutdown(mut self) -> EventRecorder {
        info!("[LocalHost] shutting down");
        self.sequencer.cancel();
        self.shutdown_tx.send_replace(true);

        for task in self.tasks.drain(..) {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!("[LocalHost] a link task did not stop in time");
            }
        }
        self.bank.shutdown();
        self.log_diagnostics();

        if let Some(task) = self.recorder_task.take() {
            // Let the recorder pick up the final disconnect events.
            tokio::time::sleep(Duration::from_millis(20)).await;
            task.abort();
        }
        info!("[LocalHost] stopped, {} link events recorded", self.recorder.records().len());
        self.recorder.clone()
    }

    fn log_diagnostics(&self) {
        for sensor in &self.sensors {
            let state = sensor.state();
            let d = state.diagnostics();
            info!(
                "[LocalHost] {}: parse errors {}, transport errors {}",
                sensor.kind(),
                d.parse_errors(),
                d.transport_errors()
            );
        }
        for channel in self.bank.channels() {
            info!(
                "[LocalHost] {} server: transport errors {}",
                channel.kind(),
                channel.diagnostics().transport_errors()
            );
        }
        let d = self.orchestrator.diagnostics();
        info!(
            "[LocalHost] orchestrator: parse errors {}, transport errors {}, dropped {}",
            d.parse_errors(),
            d.transport_errors(),
            d.dropped_messages()
        );
    }
}
