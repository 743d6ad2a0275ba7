//! Scripted actuator sequences, such as the boot greeting.
//!
//! A script is a list of `BootStep`s run in order on a background task.
//! Starting a new script cancels the running one at its next suspension
//! point; actuators keep whatever state the last completed step left them in.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, info};

use common::pattern::{brightness_wave_frame, chase_frame, color_wave_frame, DEFAULT_WAVE_COLORS};
use common::{BootStep, Color};

use crate::actuator::{ActuatorBank, CommandChannel};

pub struct StartupSequencer {
    bank: Arc<ActuatorBank>,
    poll: Duration,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl StartupSequencer {
    pub fn new(bank: Arc<ActuatorBank>, poll: Duration) -> Self {
        Self {
            bank,
            poll,
            current: Mutex::new(None),
        }
    }

    /// Run `steps` in the background, cancelling any script still running.
    pub fn start(&self, steps: Vec<BootStep>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            if !previous.is_finished() {
                info!("[StartupSequencer] cancelling running sequence");
            }
            previous.abort();
        }
        info!("[StartupSequencer] starting sequence of {} steps", steps.len());
        *current = Some(tokio::spawn(run_script(Arc::clone(&self.bank), self.poll, steps)));
    }

    /// Abort the running script. Returns true if one was still running.
    pub fn cancel(&self) -> bool {
        match self.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                if running {
                    info!("[StartupSequencer] sequence cancelled");
                }
                running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    /// Wait for the current script to finish. Returns false if there was
    /// none or it was cancelled.
    pub async fn join(&self) -> bool {
        let handle = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => handle.await.is_ok(),
            None => false,
        }
    }
}

impl Drop for StartupSequencer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Poll the channel's connected flag until a client is attached.
pub async fn wait_for_client(channel: &CommandChannel, poll: Duration) {
    if channel.is_connected() {
        return;
    }
    info!("[StartupSequencer] waiting for {} actuator client", channel.kind());
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while !channel.is_connected() {
        ticker.tick().await;
    }
    info!("[StartupSequencer] {} actuator client attached", channel.kind());
}

async fn run_script(bank: Arc<ActuatorBank>, poll: Duration, steps: Vec<BootStep>) {
    for (i, step) in steps.iter().enumerate() {
        debug!("[StartupSequencer] step {}: {:?}", i, step);
        run_step(&bank, poll, step).await;
    }
    info!("[StartupSequencer] sequence complete");
}

async fn run_step(bank: &ActuatorBank, poll: Duration, step: &BootStep) {
    let leds = bank.led_count();
    match step {
        BootStep::WaitFor { actuator } => wait_for_client(bank.channel(*actuator), poll).await,
        BootStep::RandomSound => {
            let (cmd, _) = bank.speaker.play_random();
            info!("[StartupSequencer] playing sound {}", cmd.sound);
        }
        BootStep::Sound { code } => {
            bank.speaker.play(code);
        }
        BootStep::LedWave { interval_ms, cycles } => {
            let interval = Duration::from_millis(*interval_ms);
            for frame in 0..cycles.saturating_mul(leds) {
                bank.set_leds(&chase_frame(frame, leds, Color::WHITE));
                sleep(interval).await;
            }
            bank.leds_off();
        }
        BootStep::ColorWave {
            interval_ms,
            cycles,
            colors,
        } => {
            let palette = if colors.is_empty() { &DEFAULT_WAVE_COLORS[..] } else { colors.as_slice() };
            let interval = Duration::from_millis(*interval_ms);
            for frame in 0..cycles.saturating_mul(leds) {
                bank.set_leds(&color_wave_frame(frame, palette, leds));
                sleep(interval).await;
            }
        }
        BootStep::BrightnessWave {
            interval_ms,
            cycles,
            period,
        } => {
            let interval = Duration::from_millis(*interval_ms);
            for frame in 0..cycles.saturating_mul(leds) {
                bank.set_leds(&brightness_wave_frame(frame, &DEFAULT_WAVE_COLORS, leds, *period));
                sleep(interval).await;
            }
            bank.leds_off();
        }
        BootStep::AllLedsOff => {
            bank.leds_off();
        }
        BootStep::Drive { duties, hold_ms } => {
            let [d1, d2, d3, d4] = *duties;
            bank.drive.set_duty(d1, d2, d3, d4);
            sleep(Duration::from_millis(*hold_ms)).await;
        }
        BootStep::ServoTarget { servo0, servo1, speed } => {
            bank.pan_tilt.move_to(*servo0, *servo1, *speed);
        }
        BootStep::Pause { ms } => sleep(Duration::from_millis(*ms)).await,
    }
}
