//! # Checkpoint Policy
//!
//! Decides when the dispatch loop takes a checkpoint between entries: by
//! applied call count, payload byte volume, wall-clock interval, or any
//! combination. Thresholds only fire once at least one entry has been
//! applied since the last checkpoint, so an idle actor never checkpoints in
//! a loop.

use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct CheckpointPolicy {
    /// Checkpoint after this many applied entries.
    pub every_calls: Option<u64>,
    /// Checkpoint after this many payload bytes.
    pub every_bytes: Option<u64>,
    /// Checkpoint after this much wall-clock time with traffic.
    pub every_interval: Option<Duration>,
    /// Truncate the log below the checkpoint position once the image is
    /// durably committed.
    pub truncate_log: bool,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            every_calls: Some(1024),
            every_bytes: Some(4 * 1024 * 1024),
            every_interval: None,
            truncate_log: false,
        }
    }
}

impl CheckpointPolicy {
    /// No automatic checkpoints; only explicit requests through the handle.
    pub fn disabled() -> Self {
        Self {
            every_calls: None,
            every_bytes: None,
            every_interval: None,
            truncate_log: false,
        }
    }

    pub fn every_calls(calls: u64) -> Self {
        Self {
            every_calls: Some(calls),
            ..Self::disabled()
        }
    }
}

/// Progress counters since the last checkpoint.
#[derive(Debug)]
pub(crate) struct CheckpointMeter {
    calls: u64,
    bytes: u64,
    since: Instant,
}

impl CheckpointMeter {
    pub(crate) fn new() -> Self {
        Self {
            calls: 0,
            bytes: 0,
            since: Instant::now(),
        }
    }

    pub(crate) fn record(&mut self, payload_bytes: usize) {
        self.calls += 1;
        self.bytes += payload_bytes as u64;
    }

    pub(crate) fn due(&self, policy: &CheckpointPolicy) -> bool {
        if self.calls == 0 {
            return false;
        }
        let calls_due = policy.every_calls.is_some_and(|n| self.calls >= n);
        let bytes_due = policy.every_bytes.is_some_and(|n| self.bytes >= n);
        let time_due = policy
            .every_interval
            .is_some_and(|t| self.since.elapsed() >= t);
        calls_due || bytes_due || time_due
    }

    pub(crate) fn reset(&mut self) {
        self.calls = 0;
        self.bytes = 0;
        self.since = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_policy_is_never_due() {
        let mut meter = CheckpointMeter::new();
        for _ in 0..10_000 {
            meter.record(1024);
        }
        assert!(!meter.due(&CheckpointPolicy::disabled()));
    }

    #[test]
    fn call_count_threshold_fires() {
        let policy = CheckpointPolicy::every_calls(3);
        let mut meter = CheckpointMeter::new();
        meter.record(0);
        meter.record(0);
        assert!(!meter.due(&policy));
        meter.record(0);
        assert!(meter.due(&policy));

        meter.reset();
        assert!(!meter.due(&policy));
    }

    #[test]
    fn byte_threshold_fires() {
        let policy = CheckpointPolicy {
            every_bytes: Some(100),
            ..CheckpointPolicy::disabled()
        };
        let mut meter = CheckpointMeter::new();
        meter.record(60);
        assert!(!meter.due(&policy));
        meter.record(60);
        assert!(meter.due(&policy));
    }

    #[test]
    fn interval_requires_traffic() {
        let policy = CheckpointPolicy {
            every_interval: Some(Duration::ZERO),
            ..CheckpointPolicy::disabled()
        };
        let meter = CheckpointMeter::new();
        // Elapsed, but no entries applied since the last checkpoint.
        assert!(!meter.due(&policy));

        let mut meter = CheckpointMeter::new();
        meter.record(0);
        assert!(meter.due(&policy));
    }
}
