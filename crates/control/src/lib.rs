//! Fixed-rate control loop on a dedicated OS thread, fed by a stdin
//! drive console.
//!
//! The loop only touches link state through the shared cells, so it never
//! waits on network I/O.

pub mod console;
pub mod control_loop;
pub mod pulse;

pub use console::spawn_console;
pub use control_loop::{ControlLoop, ControlRequest, ControlStats, SensorView};
pub use pulse::MotorPulse;
