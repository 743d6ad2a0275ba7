//! Actuator command messages and their JSON encodings.
//!
//! Every command kind is a plain serde type; `to_json` is a pure function of
//! the value. Field names and shapes are what the actuator clients on the
//! remote host parse, so they must not change.

use rand::Rng;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::Result;

/// Actuator kinds, one command server each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    Illumination,
    Drive,
    PanTilt,
    Speaker,
}

impl ActuatorKind {
    pub const ALL: [ActuatorKind; 4] = [
        ActuatorKind::Illumination,
        ActuatorKind::Drive,
        ActuatorKind::PanTilt,
        ActuatorKind::Speaker,
    ];

    pub fn route(self) -> &'static str {
        match self {
            ActuatorKind::Illumination => "/led",
            ActuatorKind::Drive => "/motor",
            ActuatorKind::PanTilt => "/servo",
            ActuatorKind::Speaker => "/speaker",
        }
    }

    /// Name the remote actuator client reports once attached.
    pub fn client_name(self) -> &'static str {
        match self {
            ActuatorKind::Illumination => "led_client",
            ActuatorKind::Drive => "motor_client",
            ActuatorKind::PanTilt => "servo_client",
            ActuatorKind::Speaker => "speaker_client",
        }
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActuatorKind::Illumination => "illumination",
            ActuatorKind::Drive => "drive",
            ActuatorKind::PanTilt => "pan_tilt",
            ActuatorKind::Speaker => "speaker",
        };
        f.write_str(name)
    }
}

/// A command that can be broadcast on one actuator route.
pub trait ActuatorCommand: Serialize {
    const KIND: ActuatorKind;

    fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Anything that can deliver commands of type `C` to an actuator.
/// Returns the number of clients the command was queued to.
pub trait CommandSink<C>: Send + Sync {
    fn send_command(&self, command: &C) -> usize;
}

/// Normalized color, channels in 0.0..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0);
    pub const RED: Color = Color::new(1.0, 0.0, 0.0);
    pub const YELLOW: Color = Color::new(1.0, 0.92, 0.016);
    pub const GREEN: Color = Color::new(0.0, 1.0, 0.0);
    pub const CYAN: Color = Color::new(0.0, 1.0, 1.0);
    pub const BLUE: Color = Color::new(0.0, 0.0, 1.0);
    pub const MAGENTA: Color = Color::new(1.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.r * factor, self.g * factor, self.b * factor)
    }

    pub fn to_rgb(self) -> Rgb {
        Rgb {
            r: channel_to_byte(self.r),
            g: channel_to_byte(self.g),
            b: channel_to_byte(self.b),
        }
    }
}

fn channel_to_byte(c: f32) -> u8 {
    if c.is_nan() {
        return 0;
    }
    (c * 255.0).round().clamp(0.0, 255.0) as u8
}

/// One LED as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum IlluminationCommand {
    SetColor { colors: Vec<Rgb> },
    TurnOff,
}

impl IlluminationCommand {
    pub fn from_colors(colors: &[Color]) -> Self {
        IlluminationCommand::SetColor {
            colors: colors.iter().map(|c| c.to_rgb()).collect(),
        }
    }

    /// `count` LEDs set to black.
    pub fn all_off(count: usize) -> Self {
        IlluminationCommand::SetColor {
            colors: vec![Rgb::default(); count],
        }
    }
}

impl ActuatorCommand for IlluminationCommand {
    const KIND: ActuatorKind = ActuatorKind::Illumination;
}

/// Per-wheel duty cycle; sign is direction, magnitude is speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    pub duty1: i32,
    pub duty2: i32,
    pub duty3: i32,
    pub duty4: i32,
}

impl DriveCommand {
    pub const STOP: DriveCommand = DriveCommand::new(0, 0, 0, 0);

    pub const fn new(duty1: i32, duty2: i32, duty3: i32, duty4: i32) -> Self {
        Self {
            duty1,
            duty2,
            duty3,
            duty4,
        }
    }

    pub fn is_stop(&self) -> bool {
        *self == Self::STOP
    }
}

impl ActuatorCommand for DriveCommand {
    const KIND: ActuatorKind = ActuatorKind::Drive;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PanTiltCommand {
    pub servo0: i32,
    pub servo1: i32,
    /// Seconds per servo step.
    #[serde(serialize_with = "four_decimals")]
    pub speed: f64,
}

impl PanTiltCommand {
    pub fn new(servo0: i32, servo1: i32, speed: f64) -> Self {
        Self {
            servo0,
            servo1,
            speed,
        }
    }
}

// Rust float formatting always uses '.', independent of the host locale.
fn four_decimals<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:.4}", value))
}

impl ActuatorCommand for PanTiltCommand {
    const KIND: ActuatorKind = ActuatorKind::PanTilt;
}

pub const SOUND_CODE_MIN: u8 = 1;
pub const SOUND_CODE_MAX: u8 = 28;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundCommand {
    pub sound: String,
}

impl SoundCommand {
    pub fn new(code: impl Into<String>) -> Self {
        Self { sound: code.into() }
    }

    pub fn random() -> Self {
        let code = rand::thread_rng().gen_range(SOUND_CODE_MIN..=SOUND_CODE_MAX);
        Self::new(code.to_string())
    }
}

impl ActuatorCommand for SoundCommand {
    const KIND: ActuatorKind = ActuatorKind::Speaker;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illumination_serialization() {
        let cmd = IlluminationCommand::from_colors(&[Color::new(1.0, 0.0, 0.0), Color::new(0.0, 1.0, 0.0)]);
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"command":"setColor","colors":[{"r":255,"g":0,"b":0},{"r":0,"g":255,"b":0}]}"#
        );
    }

    #[test]
    fn test_turn_off_serialization() {
        assert_eq!(IlluminationCommand::TurnOff.to_json().unwrap(), r#"{"command":"turnOff"}"#);
    }

    #[test]
    fn test_all_off_has_fixed_length() {
        match IlluminationCommand::all_off(8) {
            IlluminationCommand::SetColor { colors } => {
                assert_eq!(colors.len(), 8);
                assert!(colors.iter().all(|c| *c == Rgb::default()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_color_channels_round_and_clamp() {
        assert_eq!(Color::new(0.5, 1.5, -0.2).to_rgb(), Rgb { r: 128, g: 255, b: 0 });
        assert_eq!(Color::new(f32::NAN, 0.0, 0.0).to_rgb(), Rgb::default());
    }

    #[test]
    fn test_pan_tilt_serialization() {
        let cmd = PanTiltCommand::new(90, 70, 0.05);
        assert_eq!(cmd.to_json().unwrap(), r#"{"servo0":90,"servo1":70,"speed":"0.0500"}"#);
    }

    #[test]
    fn test_drive_serialization() {
        let cmd = DriveCommand::new(-1500, -1500, 2000, 2000);
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"duty1":-1500,"duty2":-1500,"duty3":2000,"duty4":2000}"#
        );
        assert!(DriveCommand::STOP.is_stop());
    }

    #[test]
    fn test_sound_serialization_and_random_range() {
        assert_eq!(SoundCommand::new("7").to_json().unwrap(), r#"{"sound":"7"}"#);
        for _ in 0..200 {
            let code: u8 = SoundCommand::random().sound.parse().unwrap();
            assert!((SOUND_CODE_MIN..=SOUND_CODE_MAX).contains(&code));
        }
    }

    #[test]
    fn test_routes_are_distinct() {
        let routes: std::collections::HashSet<_> = ActuatorKind::ALL.iter().map(|k| k.route()).collect();
        assert_eq!(routes.len(), 4);
    }
}
