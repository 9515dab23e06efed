//! Pulse Record Buffer — packaged pulse/gap trains
//!
//! Fixed-capacity record of the pulse and gap widths (in samples) that make
//! up one demodulated package, together with the level and frequency
//! estimates gathered while the package was detected. The detector borrows
//! records from the caller and fills them in place; hitting capacity is an
//! end-of-package condition, never an error.

/// Maximum number of pulses in a package before forcing end of package.
pub const MAX_PULSES: usize = 1200;

/// Minimum number of subpulses before declaring a proper FSK package.
pub const MIN_PULSES: usize = 16;

/// Minimum width in samples for a pulse or gap to count as real.
pub const MIN_PULSE_SAMPLES: i32 = 10;

/// Minimum gap in milliseconds before the gap/pulse ratio may end a package.
pub const MIN_GAP_MS: i32 = 10;

/// Maximum gap in milliseconds; a longer gap ends the package unconditionally.
pub const MAX_GAP_MS: i32 = 100;

/// Gap/pulse width ratio that ends a package once `MIN_GAP_MS` is exceeded.
pub const MAX_GAP_RATIO: i32 = 10;

/// One package worth of demodulated pulse and gap widths.
///
/// `pulse[k]` and `gap[k]` are paired: the k-th mark and the space that
/// follows it. `gap[k]` is only meaningful for `k < num_pulses`. Positions
/// are tracked two ways: `offset` is the absolute index of the first
/// above-threshold sample in the global stream, while `start_ago`/`end_ago`
/// count backwards from the end of the most recently ingested buffer.
#[derive(Debug, Clone)]
pub struct PulseData {
    /// Absolute position of the package start in the global sample stream.
    pub offset: u64,
    /// Sample rate the package was captured at, in Hz.
    pub sample_rate: u32,
    /// Distance from the end of the last buffer back to the package start.
    pub start_ago: u64,
    /// Distance from the end of the last buffer back to the package end.
    pub end_ago: u64,
    /// Number of valid pulse/gap pairs.
    pub num_pulses: usize,
    /// Pulse (mark) widths in samples.
    pub pulse: [i32; MAX_PULSES],
    /// Gap (space) widths in samples.
    pub gap: [i32; MAX_PULSES],
    /// Estimate of the first FSK frequency deviation.
    pub fsk_f1_est: i32,
    /// Estimate of the second FSK frequency deviation.
    pub fsk_f2_est: i32,
    /// OOK low (noise floor) level estimate at package end.
    pub ook_low_estimate: i32,
    /// OOK high level estimate at package end.
    pub ook_high_estimate: i32,
}

impl PulseData {
    /// Create an empty record.
    pub fn new() -> Self {
        Self {
            offset: 0,
            sample_rate: 0,
            start_ago: 0,
            end_ago: 0,
            num_pulses: 0,
            pulse: [0; MAX_PULSES],
            gap: [0; MAX_PULSES],
            fsk_f1_est: 0,
            fsk_f2_est: 0,
            ook_low_estimate: 0,
            ook_high_estimate: 0,
        }
    }

    /// Reset the record to its empty state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Valid pulse widths, in samples.
    pub fn pulses(&self) -> &[i32] {
        &self.pulse[..self.num_pulses]
    }

    /// Valid gap widths, in samples.
    pub fn gaps(&self) -> &[i32] {
        &self.gap[..self.num_pulses]
    }

    /// Whether the record holds no pulses.
    pub fn is_empty(&self) -> bool {
        self.num_pulses == 0
    }
}

impl Default for PulseData {
    fn default() -> Self {
        Self::new()
    }
}
