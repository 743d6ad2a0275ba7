//! Typed publish/subscribe bus for link lifecycle events.
//!
//! Every session task publishes here; the orchestrator forwarder and the
//! event recorder are subscribers. Publishing never blocks and never fails:
//! with no subscribers the event is simply discarded.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use common::{ActuatorKind, EventRecorder, OrchestratorState, SensorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    SensorConnected(SensorKind),
    SensorDisconnected(SensorKind),
    ActuatorListening(ActuatorKind),
    ActuatorAttached(ActuatorKind),
    ActuatorDetached(ActuatorKind),
    OrchestratorConnected,
    OrchestratorDisconnected,
    OrchestratorState(OrchestratorState),
}

impl LinkEvent {
    /// `(link, event)` pair used in the session log.
    pub fn describe(&self) -> (String, String) {
        match self {
            LinkEvent::SensorConnected(k) => (k.to_string(), "connected".into()),
            LinkEvent::SensorDisconnected(k) => (k.to_string(), "disconnected".into()),
            LinkEvent::ActuatorListening(k) => (k.to_string(), "listening".into()),
            LinkEvent::ActuatorAttached(k) => (k.to_string(), "attached".into()),
            LinkEvent::ActuatorDetached(k) => (k.to_string(), "detached".into()),
            LinkEvent::OrchestratorConnected => ("orchestrator".into(), "connected".into()),
            LinkEvent::OrchestratorDisconnected => ("orchestrator".into(), "disconnected".into()),
            LinkEvent::OrchestratorState(s) => ("orchestrator".into(), s.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    /// Drain every event into `recorder` until the bus is dropped.
    pub fn spawn_recorder(&self, recorder: EventRecorder) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let (link, what) = event.describe();
                        recorder.record(link, what);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[EventBus] recorder lagged, {} events lost", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish(LinkEvent::OrchestratorConnected);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_in_order() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(LinkEvent::SensorConnected(SensorKind::Infrared));
        bus.publish(LinkEvent::SensorDisconnected(SensorKind::Infrared));
        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), LinkEvent::SensorConnected(SensorKind::Infrared));
            assert_eq!(rx.recv().await.unwrap(), LinkEvent::SensorDisconnected(SensorKind::Infrared));
        }
    }

    #[tokio::test]
    async fn test_recorder_task_records_events() {
        let bus = EventBus::new(8);
        let recorder = EventRecorder::new();
        let handle = bus.spawn_recorder(recorder.clone());
        bus.publish(LinkEvent::ActuatorAttached(ActuatorKind::Drive));
        bus.publish(LinkEvent::OrchestratorState(OrchestratorState::AllActuatorsConnected));
        drop(bus);
        handle.await.unwrap();
        assert_eq!(recorder.count("drive", "attached"), 1);
        assert_eq!(recorder.count("orchestrator", "all_actuators_connected"), 1);
    }
}
