//! FSK Sub-Detector — two-tone edge detection inside an OOK pulse
//!
//! While the OOK machine sits in the first pulse of a burst, the FM
//! discriminator stream is searched for frequency shift keying. Two
//! interchangeable slicers are provided: the classic detector tracks a
//! rolling estimate per tone and classifies each sample by the nearest
//! estimate, while the minmax detector brackets the stream with decaying
//! min/max trackers and slices at their midpoint. Both emit subpulse
//! widths into a second [`PulseData`] record.
//!
//! ## Example
//!
//! ```rust
//! use keyburst::fsk_detector::FskDetector;
//! use keyburst::pulse_data::PulseData;
//!
//! let mut fsk = FskDetector::new();
//! let mut subpulses = PulseData::new();
//! for i in 0..1000 {
//!     let tone = if (i / 50) % 2 == 0 { 4000 } else { -4000 };
//!     fsk.classic(tone, &mut subpulses);
//! }
//! assert!(subpulses.num_pulses >= 8);
//! ```

use crate::pulse_data::{PulseData, MAX_PULSES, MIN_PULSE_SAMPLES};
use crate::pulse_detector::OOK_EST_HIGH_RATIO;

// Samples the minmax slicer discards after a reset so the trackers are not
// racing the AM rising edge.
const MINMAX_SKIP_SAMPLES: i32 = 40;

// Per-sample decay pulling the minmax trackers back toward the midpoint.
const MINMAX_DECAY: i32 = 10;

/// Which subpulse slicer runs inside the first OOK pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FskMode {
    /// Nearest-estimate classifier with rolling tone trackers.
    #[default]
    Classic,
    /// Midpoint slicer over decaying min/max trackers.
    MinMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FskState {
    /// Settling the first tone estimate.
    Init,
    /// Inside an F1 (mark) subpulse.
    F1,
    /// Inside an F2 (space) subpulse.
    F2,
    /// Classification broke down; idle until the burst ends.
    Error,
}

/// Streaming FSK subpulse detector.
#[derive(Debug, Clone)]
pub struct FskDetector {
    state: FskState,
    pulse_length: i32,
    f1_est: i32,
    f2_est: i32,
    max_track: i32,
    min_track: i32,
    skip_samples: i32,
}

impl FskDetector {
    pub fn new() -> Self {
        Self {
            state: FskState::Init,
            pulse_length: 0,
            f1_est: 0,
            f2_est: 0,
            max_track: 0,
            min_track: 0,
            skip_samples: MINMAX_SKIP_SAMPLES,
        }
    }

    /// Re-arm for a new burst.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current F1 tone estimate.
    pub fn f1_est(&self) -> i32 {
        self.f1_est
    }

    /// Current F2 tone estimate.
    pub fn f2_est(&self) -> i32 {
        self.f2_est
    }

    /// Classic slicer: classify by nearest tone estimate.
    ///
    /// Subpulse widths go into `subpulses`; a flip after fewer than
    /// `MIN_PULSE_SAMPLES` samples latches the error state for the rest of
    /// the burst.
    pub fn classic(&mut self, fm_sample: i16, subpulses: &mut PulseData) {
        let fm = i32::from(fm_sample);
        let f1_delta = (fm - self.f1_est).abs();
        let f2_delta = (fm - self.f2_est).abs();
        self.pulse_length += 1;

        match self.state {
            FskState::Init => {
                // Fast first estimate of the mark tone.
                self.f1_est = self.f1_est / 2 + fm / 2;
                if self.pulse_length > MIN_PULSE_SAMPLES {
                    self.state = FskState::F1;
                    subpulses.fsk_f1_est = self.f1_est;
                }
            }
            FskState::F1 => {
                if f1_delta > f2_delta {
                    if self.pulse_length >= MIN_PULSE_SAMPLES {
                        subpulses.pulse[subpulses.num_pulses] = self.pulse_length;
                        self.pulse_length = 0;
                        self.state = FskState::F2;
                    } else {
                        // Too short: likely not FSK at all.
                        self.state = FskState::Error;
                    }
                } else {
                    self.f1_est += fm / OOK_EST_HIGH_RATIO - self.f1_est / OOK_EST_HIGH_RATIO;
                }
            }
            FskState::F2 => {
                if f2_delta > f1_delta {
                    if self.pulse_length >= MIN_PULSE_SAMPLES {
                        subpulses.gap[subpulses.num_pulses] = self.pulse_length;
                        subpulses.num_pulses += 1;
                        self.pulse_length = 0;
                        self.state = if subpulses.num_pulses >= MAX_PULSES {
                            FskState::Error
                        } else {
                            FskState::F1
                        };
                    } else {
                        self.state = FskState::Error;
                    }
                } else {
                    self.f2_est += fm / OOK_EST_HIGH_RATIO - self.f2_est / OOK_EST_HIGH_RATIO;
                }
            }
            FskState::Error => {}
        }
    }

    /// Minmax slicer: bracket the stream and slice at the midpoint.
    pub fn minmax(&mut self, fm_sample: i16, subpulses: &mut PulseData) {
        let fm = i32::from(fm_sample);
        if self.skip_samples > 0 {
            self.skip_samples -= 1;
            return;
        }

        self.max_track = self.max_track.max(fm);
        self.min_track = self.min_track.min(fm);
        let mid = (self.max_track + self.min_track) / 2;
        if fm > mid {
            self.max_track -= MINMAX_DECAY;
        }
        if fm < mid {
            self.min_track += MINMAX_DECAY;
        }
        // The decayed brackets double as the tone estimates.
        self.f1_est = self.max_track;
        self.f2_est = self.min_track;

        self.pulse_length += 1;
        match self.state {
            FskState::Init => {
                self.state = if fm > mid { FskState::F1 } else { FskState::F2 };
            }
            FskState::F1 => {
                if fm < mid {
                    subpulses.pulse[subpulses.num_pulses] = self.pulse_length;
                    self.pulse_length = 0;
                    self.state = FskState::F2;
                }
            }
            FskState::F2 => {
                if fm > mid {
                    subpulses.gap[subpulses.num_pulses] = self.pulse_length;
                    subpulses.num_pulses += 1;
                    self.pulse_length = 0;
                    self.state = if subpulses.num_pulses >= MAX_PULSES {
                        FskState::Error
                    } else {
                        FskState::F1
                    };
                }
            }
            FskState::Error => {}
        }
    }

    /// Flush the trailing subpulse at the end of a burst (classic mode).
    pub fn wrap_up(&mut self, subpulses: &mut PulseData) {
        if subpulses.num_pulses < MAX_PULSES {
            self.pulse_length += 1;
            if self.state == FskState::F1 {
                subpulses.pulse[subpulses.num_pulses] = self.pulse_length;
                subpulses.gap[subpulses.num_pulses] = 0;
            } else {
                subpulses.gap[subpulses.num_pulses] = self.pulse_length;
            }
            subpulses.num_pulses += 1;
        }
    }
}

impl Default for FskDetector {
    fn default() -> Self {
        Self::new()
    }
}
