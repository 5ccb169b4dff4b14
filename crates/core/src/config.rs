//! Session configuration surface.
//!
//! Every tunable the synchronization core recognizes lives here, with the
//! defaults as named constants. Radii and rates are configuration, never
//! hardcoded at the use site.

// ============================================================================
// Defaults
// ============================================================================

/// Default tick interval (60 Hz), microseconds.
pub const DEFAULT_TICK_INTERVAL_US: u64 = 16_667;

/// Default out-of-order input buffering window, milliseconds.
pub const DEFAULT_INPUT_COLLECTION_WINDOW_MS: u64 = 250;

/// Default retained snapshot history, milliseconds.
pub const DEFAULT_HISTORY_WINDOW_MS: u64 = 1_000;

/// Default immediate-interaction radius for the critical tier.
pub const DEFAULT_AOI_CRITICAL_RADIUS: f64 = 50.0;

/// Default extended radius for the relevant tier.
pub const DEFAULT_AOI_RELEVANT_RADIUS: f64 = 250.0;

/// Default hysteresis factor: a tier entered at radius R is exited only
/// beyond R times this factor.
pub const DEFAULT_AOI_HYSTERESIS_FACTOR: f64 = 1.2;

/// Default authority heartbeat interval, milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 100;

/// Default missed-heartbeat multiplier before failover.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MULTIPLIER: u32 = 3;

/// Default EWMA weight for clock RTT/offset smoothing.
pub const DEFAULT_CLOCK_EWMA_WEIGHT: f64 = 0.2;

/// Default staleness bound before a participant's clock is flagged
/// desynchronized, milliseconds.
pub const DEFAULT_CLOCK_STALE_AFTER_MS: u64 = 3_000;

/// Default consecutive-divergence count before a predictor escalates to a
/// full resync request.
pub const DEFAULT_DESYNC_RESYNC_THRESHOLD: u32 = 3;

/// Default background-tier bandwidth budget, entities per tick.
pub const DEFAULT_BACKGROUND_BUDGET_PER_TICK: usize = 16;

// ============================================================================
// SyncConfig
// ============================================================================

/// Recognized configuration options for a synchronization session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Fixed simulation tick interval, microseconds.
    pub tick_interval_us: u64,
    /// How far out of order inputs may arrive and still be buffered.
    pub input_collection_window_ms: u64,
    /// How much snapshot history is retained for rollback and lag
    /// compensation.
    pub history_window_ms: u64,
    pub aoi_critical_radius: f64,
    pub aoi_relevant_radius: f64,
    pub aoi_hysteresis_factor: f64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_multiplier: u32,
    pub clock_ewma_weight: f64,
    pub clock_stale_after_ms: u64,
    pub desync_resync_threshold: u32,
    pub background_budget_per_tick: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval_us: DEFAULT_TICK_INTERVAL_US,
            input_collection_window_ms: DEFAULT_INPUT_COLLECTION_WINDOW_MS,
            history_window_ms: DEFAULT_HISTORY_WINDOW_MS,
            aoi_critical_radius: DEFAULT_AOI_CRITICAL_RADIUS,
            aoi_relevant_radius: DEFAULT_AOI_RELEVANT_RADIUS,
            aoi_hysteresis_factor: DEFAULT_AOI_HYSTERESIS_FACTOR,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_multiplier: DEFAULT_HEARTBEAT_TIMEOUT_MULTIPLIER,
            clock_ewma_weight: DEFAULT_CLOCK_EWMA_WEIGHT,
            clock_stale_after_ms: DEFAULT_CLOCK_STALE_AFTER_MS,
            desync_resync_threshold: DEFAULT_DESYNC_RESYNC_THRESHOLD,
            background_budget_per_tick: DEFAULT_BACKGROUND_BUDGET_PER_TICK,
        }
    }
}

impl SyncConfig {
    /// Step-function delta time in seconds.
    pub fn dt_seconds(&self) -> f64 {
        self.tick_interval_us as f64 / 1_000_000.0
    }

    /// Number of ticks covered by the input collection window.
    pub fn input_window_ticks(&self) -> u32 {
        let ticks = (self.input_collection_window_ms * 1_000).div_ceil(self.tick_interval_us);
        ticks.max(1) as u32
    }

    /// Number of snapshots the history ring must retain to cover the
    /// configured window.
    pub fn history_window_ticks(&self) -> u32 {
        let ticks = (self.history_window_ms * 1_000).div_ceil(self.tick_interval_us);
        ticks.max(1) as u32
    }

    /// Authority liveness timeout: heartbeat interval times the multiplier.
    pub fn heartbeat_timeout_ms(&self) -> u64 {
        self.heartbeat_interval_ms * u64::from(self.heartbeat_timeout_multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.tick_interval_us, DEFAULT_TICK_INTERVAL_US);
        assert_eq!(config.heartbeat_timeout_ms(), 300);
        assert_eq!(config.aoi_hysteresis_factor, 1.2);
    }

    #[test]
    fn window_tick_conversion_rounds_up() {
        let config = SyncConfig {
            tick_interval_us: 16_667,
            input_collection_window_ms: 250,
            history_window_ms: 1_000,
            ..SyncConfig::default()
        };
        // 250 ms at ~60 Hz is 15 ticks.
        assert_eq!(config.input_window_ticks(), 15);
        // 1 s of history needs 60 snapshots.
        assert_eq!(config.history_window_ticks(), 60);
    }

    #[test]
    fn dt_seconds_matches_interval() {
        let config = SyncConfig {
            tick_interval_us: 20_000,
            ..SyncConfig::default()
        };
        assert!((config.dt_seconds() - 0.02).abs() < 1e-12);
    }
}
