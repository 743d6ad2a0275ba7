//! Rig configuration.
//!
//! Every address, port, interval and boot step lives here and is resolved
//! once at startup. Missing sections fall back to the reference rig values,
//! so a config file only needs to list what differs.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::command::{ActuatorKind, Color};
use crate::error::{Error, Result};
use crate::sensor::SensorKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub remote: RemoteConfig,
    pub sensors: SensorsConfig,
    pub actuators: ActuatorsConfig,
    pub orchestrator: OrchestratorConfig,
    pub control: ControlConfig,
    pub boot: BootConfig,
    pub logging: LoggingConfig,
}

/// The embedded host that owns the sensors and runs the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "192.168.178.129".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub camera_port: u16,
    pub light_left_port: u16,
    pub light_right_port: u16,
    pub infrared_port: u16,
    pub ultrasonic_port: u16,
    pub reconnect: ReconnectPolicy,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            camera_port: 6600,
            light_left_port: 6601,
            light_right_port: 6602,
            infrared_port: 6603,
            ultrasonic_port: 6604,
            reconnect: ReconnectPolicy::None,
        }
    }
}

impl SensorsConfig {
    pub fn port(&self, kind: SensorKind) -> u16 {
        match kind {
            SensorKind::Camera => self.camera_port,
            SensorKind::LightLeft => self.light_left_port,
            SensorKind::LightRight => self.light_right_port,
            SensorKind::Infrared => self.infrared_port,
            SensorKind::Ultrasonic => self.ultrasonic_port,
        }
    }
}

/// What a sensor link does after its session drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Connect once; a dropped link stays down until restart.
    #[default]
    None,
    FixedInterval { interval_ms: u64 },
}

impl ReconnectPolicy {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            ReconnectPolicy::None => None,
            ReconnectPolicy::FixedInterval { interval_ms } => Some(Duration::from_millis(*interval_ms)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorsConfig {
    /// Local interface the command servers listen on.
    pub bind_host: String,
    pub motor_port: u16,
    pub led_port: u16,
    pub servo_port: u16,
    pub speaker_port: u16,
    /// Physical LEDs on the illumination ring.
    pub led_count: usize,
}

impl Default for ActuatorsConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            motor_port: 9010,
            led_port: 9020,
            servo_port: 9030,
            speaker_port: 9040,
            led_count: 8,
        }
    }
}

impl ActuatorsConfig {
    pub fn port(&self, kind: ActuatorKind) -> u16 {
        match kind {
            ActuatorKind::Drive => self.motor_port,
            ActuatorKind::Illumination => self.led_port,
            ActuatorKind::PanTilt => self.servo_port,
            ActuatorKind::Speaker => self.speaker_port,
        }
    }

    pub fn bind_addr(&self, kind: ActuatorKind) -> String {
        format!("{}:{}", self.bind_host, self.port(kind))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub port: u16,
    /// Fixed wait between a closed session and the next connect attempt.
    pub retry_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            port: 9900,
            retry_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_ms: u64,
    /// How long a drive pulse runs before the loop sends stop.
    pub motor_pulse_ms: u64,
    /// Wheel duty used by the drive console.
    pub drive_duty: i32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            motor_pulse_ms: 250,
            drive_duty: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Poll interval while waiting for an actuator client.
    pub poll_ms: u64,
    pub steps: Vec<BootStep>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            poll_ms: 20,
            steps: vec![
                BootStep::WaitFor {
                    actuator: ActuatorKind::Speaker,
                },
                BootStep::RandomSound,
            ],
        }
    }
}

/// One step of a scripted actuator sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BootStep {
    WaitFor {
        actuator: ActuatorKind,
    },
    RandomSound,
    Sound {
        code: String,
    },
    /// One white LED chasing around the ring, then all off.
    LedWave {
        interval_ms: u64,
        cycles: usize,
    },
    ColorWave {
        interval_ms: u64,
        cycles: usize,
        #[serde(default)]
        colors: Vec<Color>,
    },
    /// Ends with all LEDs off.
    BrightnessWave {
        interval_ms: u64,
        cycles: usize,
        period: usize,
    },
    AllLedsOff,
    Drive {
        duties: [i32; 4],
        hold_ms: u64,
    },
    ServoTarget {
        servo0: i32,
        servo1: i32,
        speed: f64,
    },
    Pause {
        ms: u64,
    },
}

/// Upper bound on the ring revolutions of one LED animation step.
pub const MAX_ANIMATION_CYCLES: usize = 1000;

/// Largest wheel duty the motor driver accepts.
pub const MAX_DRIVE_DUTY: i32 = 4095;

impl BootStep {
    /// Ring revolutions of an animation step.
    pub fn cycles(&self) -> Option<usize> {
        match self {
            BootStep::LedWave { cycles, .. }
            | BootStep::ColorWave { cycles, .. }
            | BootStep::BrightnessWave { cycles, .. } => Some(*cycles),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// CSV file receiving the connection event log at shutdown.
    pub event_log: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            event_log: None,
        }
    }
}

pub fn load_config(path: &str) -> Result<RigConfig> {
    RigConfig::from_file(path)
}

impl RigConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: RigConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn sensor_url(&self, kind: SensorKind) -> String {
        format!("ws://{}:{}", self.remote.host, self.sensors.port(kind))
    }

    pub fn orchestrator_url(&self) -> String {
        format!("ws://{}:{}", self.remote.host, self.orchestrator.port)
    }

    pub fn orchestrator_retry(&self) -> Duration {
        Duration::from_millis(self.orchestrator.retry_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(Error::InvalidConfig("remote.host is empty".into()));
        }
        if self.actuators.bind_host.trim().is_empty() {
            return Err(Error::InvalidConfig("actuators.bind_host is empty".into()));
        }

        let mut remote_ports = HashSet::new();
        for kind in SensorKind::ALL {
            let port = self.sensors.port(kind);
            if port == 0 {
                return Err(Error::InvalidConfig(format!("sensor port for {kind} is 0")));
            }
            if !remote_ports.insert(port) {
                return Err(Error::InvalidConfig(format!("sensor port {port} used twice")));
            }
        }
        if self.orchestrator.port == 0 || !remote_ports.insert(self.orchestrator.port) {
            return Err(Error::InvalidConfig(format!(
                "orchestrator port {} is 0 or clashes with a sensor port",
                self.orchestrator.port
            )));
        }

        let mut local_ports = HashSet::new();
        for kind in ActuatorKind::ALL {
            let port = self.actuators.port(kind);
            // 0 asks the OS for an ephemeral port, but two channels must not share a fixed one.
            if port != 0 && !local_ports.insert(port) {
                return Err(Error::InvalidConfig(format!("actuator port {port} used twice")));
            }
        }

        if self.actuators.led_count == 0 {
            return Err(Error::InvalidConfig("actuators.led_count must be > 0".into()));
        }
        if self.orchestrator.retry_ms == 0 {
            return Err(Error::InvalidConfig("orchestrator.retry_ms must be > 0".into()));
        }
        if let ReconnectPolicy::FixedInterval { interval_ms: 0 } = self.sensors.reconnect {
            return Err(Error::InvalidConfig("sensors.reconnect.interval_ms must be > 0".into()));
        }
        if self.control.tick_ms == 0 || self.boot.poll_ms == 0 {
            return Err(Error::InvalidConfig("control.tick_ms and boot.poll_ms must be > 0".into()));
        }
        if !(0..=MAX_DRIVE_DUTY).contains(&self.control.drive_duty) {
            return Err(Error::InvalidConfig(format!(
                "control.drive_duty must be within 0..={MAX_DRIVE_DUTY}"
            )));
        }
        for (i, step) in self.boot.steps.iter().enumerate() {
            if step.cycles().map_or(false, |c| c > MAX_ANIMATION_CYCLES) {
                return Err(Error::InvalidConfig(format!(
                    "boot step {i}: cycles must be <= {MAX_ANIMATION_CYCLES}"
                )));
            }
        }
        Ok(())
    }
}
