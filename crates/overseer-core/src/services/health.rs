//! Probe hysteresis and post-restart grace

use std::time::{Duration, Instant};

/// Health bookkeeping for one tracked service
#[derive(Debug, Clone, Default)]
pub struct HealthRecord {
    failures: u32,
    grace_until: Option<Instant>,
}

impl HealthRecord {
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Start a grace window after a restart and forget earlier failures
    pub fn arm_grace(&mut self, now: Instant, grace: Duration) {
        self.failures = 0;
        self.grace_until = Some(now + grace);
    }

    pub fn in_grace(&self, now: Instant) -> bool {
        self.grace_until.is_some_and(|until| now < until)
    }

    /// Fold one probe result in; returns the new liveness
    ///
    /// Failures inside the grace window are not counted. Outside it,
    /// `threshold` consecutive failures are needed to go from alive to dead.
    pub fn observe(&mut self, alive: bool, probe_ok: bool, threshold: u32, now: Instant) -> bool {
        if probe_ok {
            self.failures = 0;
            return true;
        }
        if self.in_grace(now) {
            return alive;
        }
        self.grace_until = None;
        self.failures = self.failures.saturating_add(1);
        if self.failures >= threshold.max(1) {
            false
        } else {
            alive
        }
    }

    /// Mark dead immediately, as after an explicit stop
    pub fn reset(&mut self) {
        self.failures = 0;
        self.grace_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u32 = 3;

    #[test]
    fn test_dead_only_after_threshold() {
        let now = Instant::now();
        let mut record = HealthRecord::default();

        assert!(record.observe(true, false, THRESHOLD, now));
        assert!(record.observe(true, false, THRESHOLD, now));
        assert!(!record.observe(true, false, THRESHOLD, now));
    }

    #[test]
    fn test_success_resets_counter() {
        let now = Instant::now();
        let mut record = HealthRecord::default();

        for _ in 0..THRESHOLD - 1 {
            assert!(record.observe(true, false, THRESHOLD, now));
        }
        assert!(record.observe(true, true, THRESHOLD, now));
        assert_eq!(record.failures(), 0);

        // The count starts over
        for _ in 0..THRESHOLD - 1 {
            assert!(record.observe(true, false, THRESHOLD, now));
        }
    }

    #[test]
    fn test_grace_window_ignores_failures() {
        let now = Instant::now();
        let grace = Duration::from_secs(10);
        let mut record = HealthRecord::default();
        record.arm_grace(now, grace);

        for _ in 0..10 {
            assert!(record.observe(true, false, THRESHOLD, now + Duration::from_secs(5)));
        }
        assert_eq!(record.failures(), 0);

        let later = now + Duration::from_secs(11);
        assert!(record.observe(true, false, THRESHOLD, later));
        assert!(record.observe(true, false, THRESHOLD, later));
        assert!(!record.observe(true, false, THRESHOLD, later));
    }
}
