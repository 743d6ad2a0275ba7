use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use common::config::ControlConfig;
use common::sensor::format_reading;
use common::{CommandSink, DisplaySink, DriveCommand, FrameSlot, SensorKind, SensorValue, SharedFlag, SharedValue};

use crate::pulse::MotorPulse;

/// Read-only handles onto one sensor link's shared state.
#[derive(Debug, Clone)]
pub struct SensorView {
    pub kind: SensorKind,
    pub connected: SharedFlag,
    pub latest: SharedValue<SensorValue>,
    pub frame: FrameSlot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlRequest {
    /// Run the drive with this command for one pulse.
    Pulse(DriveCommand),
    /// Stop the drive now, cancelling any running pulse.
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStats {
    pub ticks: u64,
    /// Ticks that started more than one period late.
    pub late_ticks: u64,
    pub pulses: u64,
    pub ignored_pulses: u64,
}

pub struct ControlLoop {
    period: Duration,
    sensors: Vec<SensorView>,
    drive: Arc<dyn CommandSink<DriveCommand>>,
    display: Arc<dyn DisplaySink>,
    pulse: MotorPulse,
    requests: Receiver<ControlRequest>,
    stats: ControlStats,
}

impl ControlLoop {
    pub fn new(
        config: &ControlConfig,
        sensors: Vec<SensorView>,
        drive: Arc<dyn CommandSink<DriveCommand>>,
        display: Arc<dyn DisplaySink>,
        requests: Receiver<ControlRequest>,
    ) -> Self {
        Self {
            period: Duration::from_millis(config.tick_ms),
            sensors,
            drive,
            display,
            pulse: MotorPulse::new(Duration::from_millis(config.motor_pulse_ms)),
            requests,
            stats: ControlStats::default(),
        }
    }

    pub fn stats(&self) -> ControlStats {
        self.stats
    }

    /// One control step at time `now`.
    pub fn tick(&mut self, now: Instant) {
        self.stats.ticks += 1;

        while let Ok(request) = self.requests.try_recv() {
            self.apply(request, now);
        }

        if self.pulse.expire(now) {
            debug!("[ControlLoop] pulse elapsed, stopping drive");
            self.drive.send_command(&DriveCommand::STOP);
        }

        for view in &self.sensors {
            let text = format_reading(view.kind, view.latest.get());
            self.display.show_status(view.kind.label(), view.connected.get(), &text);
            if view.kind.is_camera() {
                if let Some(bytes) = view.frame.take() {
                    self.display.show_frame(view.kind.label(), &bytes);
                }
            }
        }
    }

    fn apply(&mut self, request: ControlRequest, now: Instant) {
        match request {
            ControlRequest::Pulse(command) => {
                if self.pulse.trigger(now) {
                    self.stats.pulses += 1;
                    info!("[ControlLoop] motor pulse for {:?}", self.pulse.hold());
                    self.drive.send_command(&command);
                } else {
                    self.stats.ignored_pulses += 1;
                    debug!("[ControlLoop] pulse already running, ignoring request");
                }
            }
            ControlRequest::Stop => {
                self.pulse.cancel();
                self.drive.send_command(&DriveCommand::STOP);
            }
        }
    }

    /// Tick at a fixed rate until `shutdown_flag` is raised. Deadlines are
    /// advanced by whole periods so scheduling does not drift.
    pub fn run(mut self, shutdown_flag: Arc<AtomicBool>) -> ControlStats {
        let mut next_tick = Instant::now();

        while !shutdown_flag.load(Ordering::Relaxed) {
            let expected = next_tick;
            next_tick += self.period;

            let now = Instant::now();
            if now < expected {
                thread::sleep(expected - now);
            } else if now.duration_since(expected) > self.period {
                self.stats.late_ticks += 1;
            }

            self.tick(Instant::now());
        }

        // Drain a final stop request queued during shutdown.
        let now = Instant::now();
        while let Ok(request) = self.requests.try_recv() {
            self.apply(request, now);
        }
        info!(
            "[ControlLoop] stopped after {} ticks ({} late)",
            self.stats.ticks, self.stats.late_ticks
        );
        self.stats
    }

    pub fn spawn(self, shutdown_flag: Arc<AtomicBool>) -> io::Result<JoinHandle<ControlStats>> {
        if self.period.is_zero() {
            warn!("[ControlLoop] zero tick period, loop will spin");
        }
        thread::Builder::new()
            .name("control-loop".into())
            .spawn(move || self.run(shutdown_flag))
    }
}
