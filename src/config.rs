// src/config.rs
//
// Process-wide numeric constants and the per-host engine configuration.
//
// Every component that reads or writes sample blocks agrees on these
// values; they are not runtime-tunable.

/// Sample type stored in blocks and tables.
pub type Sample = f32;

/// Maximum number of samples in one block.
///
/// A few words short of 1024 so a block plus its bookkeeping fits in a
/// power-of-two allocation.
pub const MAX_BLOCK_LEN: usize = 1020;

/// Default clipping bound, in samples.
pub const MAX_STOP: i64 = 0x7FFF_FFFF;

/// Default stop time (for clipping).
pub const MAX_STOP_TIME: f64 = 10e20;

/// Earliest representable start time.
pub const MIN_START_TIME: f64 = -10e20;

/// Sentinel for "not yet known" sample counts.
///
/// Some counts are biased by `-MAX_BLOCK_LEN`, so this can't be -1.
pub const UNKNOWN: i64 = -10 - MAX_BLOCK_LEN as i64;

/// Phase unit used by oscillators: degrees.
pub const ANGLEBASE: f64 = 360.0;

// Conversion from float to integer
pub const SCALE_FACTOR_TO_BYTE: f64 = 127.0;
pub const SCALE_FACTOR_TO_SHORT: f64 = 32767.0;
pub const SCALE_FACTOR_TO_24BIT: f64 = 0x7F_FFFF as f64;
pub const SCALE_FACTOR_TO_LONG: f64 = 2_147_483_647.0;

// Default engine configuration
const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;
const DEFAULT_WATCH_CAPACITY: usize = 50;
const DEFAULT_LATENCY: f64 = 0.3;

/// Host-supplied engine configuration.
///
/// Unlike the constants above, these may differ between hosts (and between
/// tests running side by side).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Materialization gives up once a sound has produced this many samples
    /// without terminating.
    pub table_stop_bound: i64,

    /// Capacity of the diagnostics watch-list.
    pub watch_capacity: usize,

    /// Output latency in seconds, used by playback hosts.
    pub latency: f64,

    /// Sample rate operators use when none is given.
    pub default_sample_rate: f64,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            table_stop_bound: MAX_STOP,
            watch_capacity: DEFAULT_WATCH_CAPACITY,
            latency: DEFAULT_LATENCY,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    pub fn with_table_stop_bound(mut self, bound: i64) -> Self {
        self.table_stop_bound = bound.clamp(0, MAX_STOP);
        self
    }

    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        self.watch_capacity = capacity;
        self
    }

    pub fn with_default_sample_rate(mut self, sr: f64) -> Self {
        self.default_sample_rate = sr;
        self
    }

    /// Set the output latency, returning the previous value.
    ///
    /// Negative latencies are clamped to zero.
    pub fn set_latency(&mut self, latency: f64) -> f64 {
        let old = self.latency;
        self.latency = latency.max(0.0);
        old
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
