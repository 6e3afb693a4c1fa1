use crate::config::{BackoffSettings, RestartMode};
use std::time::Duration;

/// Outcome of consulting the restart policy after an exit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Relaunch after the given backoff delay
    Relaunch(Duration),
    /// Policy forbids relaunching; the instance goes to `stopped`
    GiveUp,
    /// Too many consecutive rapid crashes; the instance goes to `failed`
    Exhausted,
}

/// Tracks the crash history of one instance. A "rapid crash" is an exit
/// before the configured stability threshold; a run that outlives the
/// threshold resets the streak and the backoff.
#[derive(Debug, Clone, Default)]
pub struct CrashTracker {
    consecutive_rapid: u32,
}

impl CrashTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an exit after `uptime` of running.
    pub fn observe_exit(&mut self, uptime: Duration, stability_threshold: Duration) {
        if uptime < stability_threshold {
            self.consecutive_rapid = self.consecutive_rapid.saturating_add(1);
        } else {
            self.consecutive_rapid = 0;
        }
    }

    /// Number of consecutive rapid crashes since the last stable run.
    pub fn consecutive_rapid_crashes(&self) -> u32 {
        self.consecutive_rapid
    }

    /// Forget the crash history (operator-issued restart).
    pub fn reset(&mut self) {
        self.consecutive_rapid = 0;
    }
}

/// Restart policy engine for one instance. Decisions are made strictly
/// after the exit event that triggered them has been recorded in the
/// tracker.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    mode: RestartMode,
    backoff: BackoffSettings,
}

impl RestartPolicy {
    pub fn new(mode: RestartMode, backoff: BackoffSettings) -> Self {
        Self { mode, backoff }
    }

    pub fn mode(&self) -> RestartMode {
        self.mode
    }

    pub fn stability_threshold(&self) -> Duration {
        self.backoff.stability_threshold()
    }

    /// Decide what to do after an exit already recorded in `tracker`.
    pub fn decide(&self, tracker: &CrashTracker) -> Decision {
        if tracker.consecutive_rapid > self.backoff.max_rapid_crashes {
            return Decision::Exhausted;
        }

        match self.mode {
            RestartMode::Never => Decision::GiveUp,
            RestartMode::Always => Decision::Relaunch(self.delay_for(tracker)),
        }
    }

    /// Exponential backoff: the first rapid crash waits the base delay, each
    /// further one doubles it, capped at max_delay. A crash after a stable
    /// run also waits the base delay.
    fn delay_for(&self, tracker: &CrashTracker) -> Duration {
        let exponent = tracker.consecutive_rapid.saturating_sub(1);
        let secs = self
            .backoff
            .base_delay_secs
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(self.backoff.max_delay_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(base: u64, max_delay: u64, stability: u64, max_rapid: u32) -> BackoffSettings {
        BackoffSettings {
            base_delay_secs: base,
            max_delay_secs: max_delay,
            stability_secs: stability,
            max_rapid_crashes: max_rapid,
        }
    }

    #[test]
    fn test_never_gives_up() {
        let policy = RestartPolicy::new(RestartMode::Never, backoff(1, 60, 5, 10));
        let mut tracker = CrashTracker::new();
        tracker.observe_exit(Duration::from_secs(1), policy.stability_threshold());

        assert_eq!(policy.decide(&tracker), Decision::GiveUp);
    }

    #[test]
    fn test_always_relaunches_with_base_delay() {
        let policy = RestartPolicy::new(RestartMode::Always, backoff(1, 60, 5, 10));
        let mut tracker = CrashTracker::new();
        tracker.observe_exit(Duration::from_secs(1), policy.stability_threshold());

        assert_eq!(
            policy.decide(&tracker),
            Decision::Relaunch(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_exponential_backoff_on_rapid_crashes() {
        let policy = RestartPolicy::new(RestartMode::Always, backoff(1, 60, 5, 100));
        let mut tracker = CrashTracker::new();
        let threshold = policy.stability_threshold();

        let expected = [1u64, 2, 4, 8, 16, 32, 60, 60];
        for &want in &expected {
            tracker.observe_exit(Duration::from_secs(0), threshold);
            assert_eq!(
                policy.decide(&tracker),
                Decision::Relaunch(Duration::from_secs(want))
            );
        }
    }

    #[test]
    fn test_stable_run_resets_backoff() {
        let policy = RestartPolicy::new(RestartMode::Always, backoff(1, 60, 5, 10));
        let mut tracker = CrashTracker::new();
        let threshold = policy.stability_threshold();

        tracker.observe_exit(Duration::from_secs(0), threshold);
        tracker.observe_exit(Duration::from_secs(0), threshold);
        tracker.observe_exit(Duration::from_secs(0), threshold);
        assert_eq!(tracker.consecutive_rapid_crashes(), 3);

        // Ran past the stability threshold before exiting
        tracker.observe_exit(Duration::from_secs(10), threshold);
        assert_eq!(tracker.consecutive_rapid_crashes(), 0);
        assert_eq!(
            policy.decide(&tracker),
            Decision::Relaunch(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_exhaustion_after_max_rapid_crashes() {
        let max = 3;
        let policy = RestartPolicy::new(RestartMode::Always, backoff(0, 60, 5, max));
        let mut tracker = CrashTracker::new();
        let threshold = policy.stability_threshold();

        // The first `max` rapid crashes still relaunch
        for _ in 0..max {
            tracker.observe_exit(Duration::from_secs(0), threshold);
            assert!(matches!(policy.decide(&tracker), Decision::Relaunch(_)));
        }

        // One more tips it over
        tracker.observe_exit(Duration::from_secs(0), threshold);
        assert_eq!(policy.decide(&tracker), Decision::Exhausted);
    }

    #[test]
    fn test_exhaustion_applies_even_when_never() {
        let policy = RestartPolicy::new(RestartMode::Never, backoff(1, 60, 5, 1));
        let mut tracker = CrashTracker::new();
        let threshold = policy.stability_threshold();

        tracker.observe_exit(Duration::from_secs(0), threshold);
        tracker.observe_exit(Duration::from_secs(0), threshold);
        assert_eq!(policy.decide(&tracker), Decision::Exhausted);
    }

    #[test]
    fn test_tracker_reset() {
        let mut tracker = CrashTracker::new();
        tracker.observe_exit(Duration::from_secs(0), Duration::from_secs(5));
        tracker.observe_exit(Duration::from_secs(0), Duration::from_secs(5));
        assert_eq!(tracker.consecutive_rapid_crashes(), 2);

        tracker.reset();
        assert_eq!(tracker.consecutive_rapid_crashes(), 0);
    }
}
