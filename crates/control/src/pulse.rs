use std::time::{Duration, Instant};

/// Time-gated motor activation.
///
/// A pulse runs the drive for a fixed hold time and then stops it. While a
/// pulse is active new triggers are ignored rather than extending it.
#[derive(Debug, Clone)]
pub struct MotorPulse {
    hold: Duration,
    started: Option<Instant>,
}

impl MotorPulse {
    pub fn new(hold: Duration) -> Self {
        Self { hold, started: None }
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    pub fn is_active(&self) -> bool {
        self.started.is_some()
    }

    /// Start a pulse at `now`. Returns false if one is already running.
    pub fn trigger(&mut self, now: Instant) -> bool {
        if self.started.is_some() {
            return false;
        }
        self.started = Some(now);
        true
    }

    /// Returns true exactly once per pulse, when its hold time has elapsed
    /// and the drive should be stopped.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.started {
            Some(start) if now.saturating_duration_since(start) >= self.hold => {
                self.started = None;
                true
            }
            _ => false,
        }
    }

    /// Forget the running pulse without waiting for it to expire.
    pub fn cancel(&mut self) -> bool {
        self.started.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_expires_once_after_hold() {
        let t0 = Instant::now();
        let mut pulse = MotorPulse::new(Duration::from_millis(250));
        assert!(pulse.trigger(t0));
        assert!(!pulse.expire(t0 + Duration::from_millis(100)));
        assert!(pulse.expire(t0 + Duration::from_millis(250)));
        assert!(!pulse.expire(t0 + Duration::from_millis(400)));
        assert!(!pulse.is_active());
    }

    #[test]
    fn test_trigger_while_active_is_ignored() {
        let t0 = Instant::now();
        let mut pulse = MotorPulse::new(Duration::from_millis(250));
        assert!(pulse.trigger(t0));
        assert!(!pulse.trigger(t0 + Duration::from_millis(200)));
        // The hold is measured from the first trigger.
        assert!(pulse.expire(t0 + Duration::from_millis(260)));
        assert!(pulse.trigger(t0 + Duration::from_millis(300)));
    }

    #[test]
    fn test_cancel() {
        let mut pulse = MotorPulse::new(Duration::from_secs(1));
        assert!(!pulse.cancel());
        pulse.trigger(Instant::now());
        assert!(pulse.cancel());
        assert!(!pulse.is_active());
    }
}
