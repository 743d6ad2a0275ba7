pub mod cell;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod display;
pub mod error;
pub mod metrics;
pub mod pattern;
pub mod sensor;
pub mod status;

pub use cell::{FrameSlot, SharedFlag, SharedValue};
pub use command::{
    ActuatorCommand, ActuatorKind, Color, CommandSink, DriveCommand, IlluminationCommand, PanTiltCommand, Rgb, SoundCommand,
};
pub use config::{BootStep, ReconnectPolicy, RigConfig};
pub use diagnostics::LinkDiagnostics;
pub use display::{DisplayBuffer, DisplayItem, DisplaySink, LogDisplay};
pub use error::{Error, Result};
pub use metrics::{EventRecord, EventRecorder};
pub use sensor::{decode_reading, SensorKind, SensorReading, SensorValue};
pub use status::{ModuleStatus, OrchestratorState, OrchestratorStatus};
