//! Peak Follower — adaptive high/low envelope tracking
//!
//! Tracks the upper and lower envelope of a 16-bit stream with a one-pole
//! attack/release follower per side: a sample beyond the tracked peak pulls
//! it in quickly (attack), anything else lets the peak leak toward zero
//! (multiplicative release, ~1/(1-release) samples to decay). A configured
//! dB floor gates the high output: below the floor the follower reports
//! `high == 0`, the "no valid envelope" signal the OOK engine keys off.
//! The gate is one-sided on purpose; `low` is always reported.
//!
//! ## Example
//!
//! ```rust
//! use keyburst::peak_follower::PeakFollower;
//!
//! let mut follower = PeakFollower::new(0.5, 0.99, -20.0);
//! let mut high = 0;
//! for _ in 0..32 {
//!     high = follower.process_sample(20_000).0;
//! }
//! assert!(high > 18_000, "attack converges on the envelope, got {high}");
//! ```

use crate::level::db_to_gain;

/// Dual attack/release envelope follower with a minimum-level gate.
#[derive(Debug, Clone)]
pub struct PeakFollower {
    attack: f64,
    release: f64,
    high_peak: f64,
    low_peak: f64,
    /// Linear gain of the configured dB floor; high outputs below it read 0.
    min_val: f64,
}

impl PeakFollower {
    /// Create a follower.
    ///
    /// `attack` and `release` are one-pole coefficients and are kept inside
    /// (0, 1); `min_db` is the acceptance floor in dB and is clamped to 0
    /// or below.
    pub fn new(attack: f64, release: f64, min_db: f64) -> Self {
        Self {
            attack: attack.clamp(1e-6, 1.0 - 1e-6),
            release: release.clamp(1e-6, 1.0 - 1e-6),
            high_peak: 0.0,
            low_peak: 0.0,
            min_val: f64::from(db_to_gain(min_db.min(0.0))),
        }
    }

    /// Track one sample, returning the `(high, low)` envelope estimates.
    ///
    /// `high` is 0 while `|high_peak|` sits below the configured floor.
    pub fn process_sample(&mut self, sample: i16) -> (i16, i16) {
        let x = f64::from(sample);

        if x > self.high_peak {
            self.high_peak = self.attack * self.high_peak + (1.0 - self.attack) * x;
        } else {
            self.high_peak *= self.release;
        }

        if x < self.low_peak {
            self.low_peak = self.attack * self.low_peak + (1.0 - self.attack) * x;
        } else {
            self.low_peak *= self.release;
        }

        let high = if self.high_peak.abs() < self.min_val {
            0
        } else {
            self.high_peak.round() as i16
        };
        (high, self.low_peak.round() as i16)
    }

    /// Raw high-side tracker state.
    pub fn high_peak(&self) -> f64 {
        self.high_peak
    }

    /// Raw low-side tracker state.
    pub fn low_peak(&self) -> f64 {
        self.low_peak
    }

    /// Reset both trackers to zero.
    pub fn reset(&mut self) {
        self.high_peak = 0.0;
        self.low_peak = 0.0;
    }
}
