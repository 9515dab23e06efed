//! # keyburst — OOK/FSK pulse detection for SDR baseband streams
//!
//! This crate turns a pair of aligned 16-bit baseband streams — an AM
//! envelope and an FM discriminator output — into discrete pulse/gap
//! packages a protocol decoder can consume. The envelope is demodulated as
//! On/Off Keying; long marks are additionally searched for Frequency Shift
//! Keying, so two-tone bursts come back as FSK subpulse packages.
//!
//! ## Signal flow
//!
//! ```text
//!                    ┌─ median smoother ─ AM peak follower ─┐
//! (envelope, fm) ──► │                                      ├─► OOK state machine ─► PulseData
//!                    └───────────────── FM peak follower ───┘        │
//!                                                                    └─ FSK sub-detector ─► PulseData
//! ```
//!
//! The detector runs one streaming pass per buffer and returns as soon as
//! a package completes; its scan position survives across calls, so the
//! caller consumes the package and hands the same buffer back to continue.
//!
//! ## Example
//!
//! ```rust
//! use keyburst::prelude::*;
//!
//! // Silence to settle the noise estimate, one burst of three pulses,
//! // then enough silence to close the package.
//! let mut envelope = vec![0i16; 1100];
//! for _ in 0..3 {
//!     envelope.extend(std::iter::repeat(20_000i16).take(100));
//!     envelope.extend(std::iter::repeat(0i16).take(200));
//! }
//! envelope.extend(std::iter::repeat(0i16).take(3000));
//! let fm = vec![0i16; envelope.len()];
//!
//! let mut detector = PulseDetector::new();
//! let mut pulses = PulseData::new();
//! let mut fsk_pulses = PulseData::new();
//! let kind = detector.detect(
//!     &envelope, &fm, 250_000, 0, &mut pulses, &mut fsk_pulses, FskMode::Classic,
//! );
//! assert_eq!(kind, PackageKind::Ook);
//! assert_eq!(pulses.num_pulses, 3);
//! ```

pub mod dc_blocker;
pub mod fsk_detector;
pub mod level;
pub mod median_filter;
pub mod peak_follower;
pub mod pulse_data;
pub mod pulse_detector;
pub mod wav_dump;

// Re-export the main types
pub use dc_blocker::DcBlocker;
pub use fsk_detector::{FskDetector, FskMode};
pub use median_filter::MedianFilter;
pub use peak_follower::PeakFollower;
pub use pulse_data::PulseData;
pub use pulse_detector::{
    ConfigError, DebugSinks, DetectorConfig, PackageKind, PulseDetector,
};
pub use wav_dump::WavDumper;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fsk_detector::FskMode;
    pub use crate::pulse_data::PulseData;
    pub use crate::pulse_detector::{DetectorConfig, PackageKind, PulseDetector};
}
