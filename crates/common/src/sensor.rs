//! Sensor kinds and the JSON readings the remote host streams for them.
//!
//! Scalar sensors send `{"sensor": "<name>", "value": <number>}` (the
//! ultrasonic server historically names the field `distance`, which is
//! accepted as an alias). The camera sends `{"sensor": "<name>", "image":
//! "<base64>"}`. Decoding is strict about JSON types: an integer reading
//! never accepts a float and no reading accepts a numeric string.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Ultrasonic,
    Infrared,
    LightLeft,
    LightRight,
    Camera,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Ultrasonic,
        SensorKind::Infrared,
        SensorKind::LightLeft,
        SensorKind::LightRight,
        SensorKind::Camera,
    ];

    /// Name reported to the remote orchestrator once the link is open.
    pub fn module_name(self) -> &'static str {
        match self {
            SensorKind::Ultrasonic => "ultrasonic_client",
            SensorKind::Infrared => "infrared_client",
            SensorKind::LightLeft => "light_left_client",
            SensorKind::LightRight => "light_right_client",
            SensorKind::Camera => "picamera_client",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorKind::Ultrasonic => "ultrasonic",
            SensorKind::Infrared => "infrared",
            SensorKind::LightLeft => "light_left",
            SensorKind::LightRight => "light_right",
            SensorKind::Camera => "camera",
        }
    }

    pub fn is_camera(self) -> bool {
        matches!(self, SensorKind::Camera)
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Latest scalar value held by a sensor link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SensorValue {
    Float(f64),
    Integer(i64),
}

impl SensorValue {
    pub fn as_f64(self) -> f64 {
        match self {
            SensorValue::Float(v) => v,
            SensorValue::Integer(v) => v as f64,
        }
    }
}

/// A successfully decoded message from a sensor endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Scalar(SensorValue),
    Frame(Vec<u8>),
}

#[derive(Deserialize)]
struct ScalarMessage<T> {
    #[allow(dead_code)]
    sensor: String,
    #[serde(alias = "distance")]
    value: T,
}

#[derive(Deserialize)]
struct FrameMessage {
    #[allow(dead_code)]
    sensor: String,
    image: String,
}

/// Decode one text payload against the schema of `kind`.
pub fn decode_reading(kind: SensorKind, payload: &str) -> Result<SensorReading> {
    match kind {
        SensorKind::Infrared => {
            let msg: ScalarMessage<i64> = serde_json::from_str(payload)?;
            Ok(SensorReading::Scalar(SensorValue::Integer(msg.value)))
        }
        SensorKind::Ultrasonic | SensorKind::LightLeft | SensorKind::LightRight => {
            let msg: ScalarMessage<f64> = serde_json::from_str(payload)?;
            if !msg.value.is_finite() {
                return Err(Error::Schema(format!("{kind} value is not finite")));
            }
            Ok(SensorReading::Scalar(SensorValue::Float(msg.value)))
        }
        SensorKind::Camera => {
            let msg: FrameMessage = serde_json::from_str(payload)?;
            let bytes = base64::engine::general_purpose::STANDARD.decode(msg.image.as_bytes())?;
            Ok(SensorReading::Frame(bytes))
        }
    }
}

/// Human readable line for the presentation surface.
pub fn format_reading(kind: SensorKind, value: Option<SensorValue>) -> String {
    match (kind, value) {
        (SensorKind::Camera, _) => "Camera".to_string(),
        (SensorKind::Ultrasonic, Some(v)) => format!("Ultrasonic Distance: {:.1} cm", v.as_f64()),
        (SensorKind::Infrared, Some(SensorValue::Integer(v))) => {
            format!("Infrared Value: {} (binary: {:03b})", v, v)
        }
        (SensorKind::Infrared, Some(v)) => format!("Infrared Value: {}", v.as_f64()),
        (SensorKind::LightLeft | SensorKind::LightRight, Some(v)) => {
            format!("Light Value: {:.1}", v.as_f64())
        }
        (kind, None) => format!("{kind}: --"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_float_reading() {
        let r = decode_reading(SensorKind::LightLeft, r#"{"sensor":"light","value":412.5}"#).unwrap();
        assert_eq!(r, SensorReading::Scalar(SensorValue::Float(412.5)));
    }

    #[test]
    fn test_ultrasonic_accepts_distance_alias() {
        let r = decode_reading(
            SensorKind::Ultrasonic,
            r#"{"sensor":"ultrasonic_sensor","distance":23.4}"#,
        )
        .unwrap();
        assert_eq!(r, SensorReading::Scalar(SensorValue::Float(23.4)));
    }

    #[test]
    fn test_infrared_rejects_float_and_string() {
        assert!(decode_reading(SensorKind::Infrared, r#"{"sensor":"infrared","value":1.5}"#).is_err());
        assert!(decode_reading(SensorKind::Infrared, r#"{"sensor":"infrared","value":"3"}"#).is_err());
        let r = decode_reading(SensorKind::Infrared, r#"{"sensor":"infrared","value":5}"#).unwrap();
        assert_eq!(r, SensorReading::Scalar(SensorValue::Integer(5)));
    }

    #[test]
    fn test_scalar_rejects_string_number() {
        assert!(decode_reading(SensorKind::LightRight, r#"{"sensor":"light","value":"12.0"}"#).is_err());
    }

    #[test]
    fn test_camera_frame_is_base64_decoded() {
        let r = decode_reading(SensorKind::Camera, r#"{"sensor":"picam","image":"AQID"}"#).unwrap();
        assert_eq!(r, SensorReading::Frame(vec![1, 2, 3]));
    }

    #[test]
    fn test_camera_rejects_bad_base64_and_scalar_payload() {
        assert!(decode_reading(SensorKind::Camera, r#"{"sensor":"picam","image":"!!"}"#).is_err());
        assert!(decode_reading(SensorKind::Camera, r#"{"sensor":"picam","value":1}"#).is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(decode_reading(SensorKind::Ultrasonic, "{not json").is_err());
    }

    #[test]
    fn test_format_reading() {
        assert_eq!(
            format_reading(SensorKind::Infrared, Some(SensorValue::Integer(5))),
            "Infrared Value: 5 (binary: 101)"
        );
        assert_eq!(
            format_reading(SensorKind::Ultrasonic, Some(SensorValue::Float(12.34))),
            "Ultrasonic Distance: 12.3 cm"
        );
        assert_eq!(format_reading(SensorKind::LightLeft, None), "light_left: --");
    }
}
