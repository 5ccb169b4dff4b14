//! Per-participant clock synchronization.
//!
//! Each participant periodically exchanges timestamped pings with the
//! authority. From each exchange we take a round-trip time and a one-way
//! offset estimate, smoothed with an exponentially weighted moving average.
//! All local times are microseconds since the session epoch (tick 0).
//!
//! Fails soft: a participant whose samples dry up is flagged
//! "desynchronized" for the topology manager to act on; simulation is never
//! blocked on clock quality.

use driftsync_core::Tick;

/// Smoothed clock state for one participant.
#[derive(Debug, Clone)]
pub struct ClockSync {
    /// EWMA weight for new samples.
    alpha: f64,
    tick_interval_us: u64,
    rtt_us: Option<f64>,
    offset_us: Option<f64>,
    last_sample_at_us: Option<u64>,
}

impl ClockSync {
    pub fn new(alpha: f64, tick_interval_us: u64) -> Self {
        Self {
            alpha,
            tick_interval_us,
            rtt_us: None,
            offset_us: None,
            last_sample_at_us: None,
        }
    }

    /// Fold in one ping exchange.
    ///
    /// `sent_us` and `received_us` are local send/receive times of the ping
    /// and pong; `remote_us` is the remote clock reading echoed in the pong.
    /// The offset estimate assumes the remote timestamp was taken at the
    /// midpoint of the round trip.
    pub fn record_sample(&mut self, sent_us: u64, remote_us: u64, received_us: u64) {
        let rtt = received_us.saturating_sub(sent_us) as f64;
        let midpoint = sent_us as f64 + rtt / 2.0;
        let offset = remote_us as f64 - midpoint;

        self.rtt_us = Some(match self.rtt_us {
            Some(prev) => prev + self.alpha * (rtt - prev),
            None => rtt,
        });
        self.offset_us = Some(match self.offset_us {
            Some(prev) => prev + self.alpha * (offset - prev),
            None => offset,
        });
        self.last_sample_at_us = Some(received_us);
    }

    /// Smoothed round-trip time, microseconds. `None` until the first sample.
    pub fn rtt_us(&self) -> Option<f64> {
        self.rtt_us
    }

    /// Smoothed one-way offset (remote minus local), microseconds.
    pub fn offset_us(&self) -> Option<f64> {
        self.offset_us
    }

    /// Map a local tick to the estimated remote clock reading at that tick.
    pub fn local_tick_to_remote_time(&self, tick: Tick) -> Option<u64> {
        let offset = self.offset_us?;
        let local_us = u64::from(tick) * self.tick_interval_us;
        let remote = local_us as f64 + offset;
        Some(remote.max(0.0) as u64)
    }

    /// Map a remote clock reading to the local tick in flight at that time.
    pub fn remote_time_to_local_tick(&self, remote_us: u64) -> Option<Tick> {
        let offset = self.offset_us?;
        let local_us = (remote_us as f64 - offset).max(0.0);
        Some((local_us / self.tick_interval_us as f64) as Tick)
    }

    /// True when no sample has arrived within the staleness bound.
    ///
    /// A participant with no samples at all is also desynchronized once the
    /// bound has elapsed since the epoch.
    pub fn is_desynchronized(&self, now_us: u64, stale_after_ms: u64) -> bool {
        let stale_after_us = stale_after_ms * 1_000;
        match self.last_sample_at_us {
            Some(at) => now_us.saturating_sub(at) > stale_after_us,
            None => now_us > stale_after_us,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_US: u64 = 16_667;

    #[test]
    fn first_sample_is_adopted_directly() {
        let mut clock = ClockSync::new(0.2, TICK_US);
        // Sent at 1000, answered with remote=600, received at 1200:
        // rtt=200, midpoint=1100, offset=-500.
        clock.record_sample(1_000, 600, 1_200);
        assert_eq!(clock.rtt_us(), Some(200.0));
        assert_eq!(clock.offset_us(), Some(-500.0));
    }

    #[test]
    fn samples_are_ewma_smoothed() {
        let mut clock = ClockSync::new(0.2, TICK_US);
        clock.record_sample(0, 100, 200); // rtt 200
        clock.record_sample(1_000, 1_250, 1_300); // rtt 300
        // 200 + 0.2 * (300 - 200) = 220
        assert_eq!(clock.rtt_us(), Some(220.0));
    }

    #[test]
    fn tick_time_mapping_roundtrips() {
        let mut clock = ClockSync::new(0.2, TICK_US);
        // Remote runs exactly 1s ahead, zero rtt.
        clock.record_sample(5_000_000, 6_000_000, 5_000_000);
        assert_eq!(clock.offset_us(), Some(1_000_000.0));

        let remote = clock.local_tick_to_remote_time(60).unwrap();
        assert_eq!(remote, 60 * TICK_US + 1_000_000);
        assert_eq!(clock.remote_time_to_local_tick(remote), Some(60));
    }

    #[test]
    fn no_mapping_before_first_sample() {
        let clock = ClockSync::new(0.2, TICK_US);
        assert_eq!(clock.local_tick_to_remote_time(10), None);
        assert_eq!(clock.remote_time_to_local_tick(10), None);
    }

    #[test]
    fn staleness_flags_desynchronized() {
        let mut clock = ClockSync::new(0.2, TICK_US);
        clock.record_sample(0, 0, 1_000);
        assert!(!clock.is_desynchronized(1_000, 3_000));
        assert!(!clock.is_desynchronized(3_000_999, 3_000));
        assert!(clock.is_desynchronized(3_002_000, 3_000));
    }

    #[test]
    fn never_sampled_clock_goes_stale() {
        let clock = ClockSync::new(0.2, TICK_US);
        assert!(!clock.is_desynchronized(1_000, 3_000));
        assert!(clock.is_desynchronized(4_000_000, 3_000));
    }
}
