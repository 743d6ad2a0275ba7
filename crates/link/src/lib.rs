//! WebSocket link layer between the control host and the remote robot host.

pub mod actuator;
pub mod error;
pub mod events;
pub mod host;
pub mod orchestrator;
pub mod sensor;
pub mod sequencer;

pub use actuator::{
    ActuatorBank, ActuatorServer, CommandChannel, DriveServer, IlluminationServer, PanTiltServer, SpeakerServer,
    SESSION_QUEUE_DEPTH,
};
pub use error::{LinkError, Result};
pub use events::{EventBus, LinkEvent};
pub use host::LocalHost;
pub use orchestrator::{LinkState, OrchestratorLink, RECENT_ATTEMPTS};
pub use sensor::{SensorLink, SensorState};
pub use sequencer::StartupSequencer;

use tokio::sync::watch;

/// Resolve once shutdown is signalled. A dropped sender counts as shutdown.
pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
