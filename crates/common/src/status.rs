//! Status envelopes exchanged on the orchestrator channel.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

pub const STATUS_CONNECTED: &str = "connected";
pub const STATUS_BOOT_SUCCESS: &str = "boot_success";
pub const STATUS_ACTUATOR_CONNECTED: &str = "actuator_connected";
pub const STATE_ACTUATOR_CLIENTS_STARTED: &str = "actuator_clients_started";
pub const STATE_ALL_ACTUATORS_CONNECTED: &str = "all_actuators_connected";

/// `{"module": "<name>", "status": "<status>"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub module: String,
    pub status: String,
}

impl ModuleStatus {
    pub fn connected(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            status: STATUS_CONNECTED.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `{"orchestrator": "<name>", "status": "<state>"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    #[serde(default)]
    pub orchestrator: Option<String>,
    pub status: String,
}

impl OrchestratorStatus {
    pub fn new(orchestrator: impl Into<String>, state: &OrchestratorState) -> Self {
        Self {
            orchestrator: Some(orchestrator.into()),
            status: state.as_str().to_string(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn state(&self) -> OrchestratorState {
        OrchestratorState::from(self.status.as_str())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Open set of orchestrator states; unknown ones are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    ActuatorClientsStarted,
    AllActuatorsConnected,
    Other(String),
}

impl OrchestratorState {
    pub fn as_str(&self) -> &str {
        match self {
            OrchestratorState::ActuatorClientsStarted => STATE_ACTUATOR_CLIENTS_STARTED,
            OrchestratorState::AllActuatorsConnected => STATE_ALL_ACTUATORS_CONNECTED,
            OrchestratorState::Other(s) => s,
        }
    }
}

impl From<&str> for OrchestratorState {
    fn from(s: &str) -> Self {
        match s {
            STATE_ACTUATOR_CLIENTS_STARTED => OrchestratorState::ActuatorClientsStarted,
            STATE_ALL_ACTUATORS_CONNECTED => OrchestratorState::AllActuatorsConnected,
            other => OrchestratorState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_status_json() {
        let json = ModuleStatus::connected("infrared_client").to_json().unwrap();
        assert_eq!(json, r#"{"module":"infrared_client","status":"connected"}"#);
    }

    #[test]
    fn test_parse_known_states() {
        let s = OrchestratorStatus::parse(r#"{"orchestrator":"pi","status":"actuator_clients_started"}"#).unwrap();
        assert_eq!(s.orchestrator.as_deref(), Some("pi"));
        assert_eq!(s.state(), OrchestratorState::ActuatorClientsStarted);

        let s = OrchestratorStatus::parse(r#"{"orchestrator":"pi","status":"all_actuators_connected"}"#).unwrap();
        assert_eq!(s.state(), OrchestratorState::AllActuatorsConnected);
    }

    #[test]
    fn test_unknown_state_is_carried() {
        let s = OrchestratorStatus::parse(r#"{"status":"rebooting"}"#).unwrap();
        assert_eq!(s.orchestrator, None);
        assert_eq!(s.state(), OrchestratorState::Other("rebooting".into()));
    }

    #[test]
    fn test_missing_status_is_an_error() {
        assert!(OrchestratorStatus::parse(r#"{"orchestrator":"pi"}"#).is_err());
        assert!(OrchestratorStatus::parse("garbage").is_err());
    }
}
