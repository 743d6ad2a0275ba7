//! Frame generators for the LED ring animations played at boot.
//!
//! All functions are pure; the sequencer decides timing.

use crate::command::Color;

/// Palette used by the rotating color wave.
pub const DEFAULT_WAVE_COLORS: [Color; 8] = [
    Color::RED,
    Color::YELLOW,
    Color::GREEN,
    Color::CYAN,
    Color::BLUE,
    Color::MAGENTA,
    Color::WHITE,
    Color::BLACK,
];

const GAMMA: f32 = 2.2;

/// A single lit LED chasing around the ring.
pub fn chase_frame(frame: usize, led_count: usize, lit: Color) -> Vec<Color> {
    (0..led_count)
        .map(|j| if led_count > 0 && j == frame % led_count { lit } else { Color::BLACK })
        .collect()
}

/// The palette shifted `frame` positions around the ring.
pub fn color_wave_frame(frame: usize, palette: &[Color], led_count: usize) -> Vec<Color> {
    if palette.is_empty() {
        return vec![Color::BLACK; led_count];
    }
    (0..led_count)
        .map(|i| palette[(frame + i) % palette.len()])
        .collect()
}

/// Triangle brightness ramp travelling along the ring, gamma corrected.
///
/// LED `i` starts `i` frames late; the base color advances through the
/// palette once per full rotation (`led_count` frames).
pub fn brightness_wave_frame(frame: usize, palette: &[Color], led_count: usize, period: usize) -> Vec<Color> {
    if palette.is_empty() || led_count == 0 || period == 0 {
        return vec![Color::BLACK; led_count];
    }
    let base = palette[(frame / led_count) % palette.len()];
    let half = period as f32 / 2.0;

    (0..led_count)
        .map(|i| {
            if frame < i {
                return Color::BLACK;
            }
            let progress = ((frame - i) % period) as f32 / half;
            let brightness = if progress <= 1.0 { progress } else { 2.0 - progress };
            base.scaled(brightness.clamp(0.0, 1.0).powf(1.0 / GAMMA))
        })
        .collect()
}
