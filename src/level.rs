//! Level Conversion — dB mappings for amplitude and magnitude streams
//!
//! Conversions between dB and the linear 16-bit sample domain, referenced
//! to a full scale of 16384. Amplitude streams (power-like) use a ÷10
//! exponent, magnitude streams use ÷20. Also provides the integer
//! attenuation maps used for level reports and histogram bucketing.
//!
//! ## Example
//!
//! ```rust
//! use keyburst::level::{amp_to_att, db_to_amp};
//!
//! assert_eq!(db_to_amp(0.0), 16384);
//! assert_eq!(amp_to_att(16384), 3); // full scale maps to the 3 dB offset
//! ```

/// Full-scale linear reference used by the dB conversions.
pub const FULL_SCALE: i32 = 16384;

// 10*log10(16384) and 20*log10(16384).
const AMP_DB_OFFSET: f64 = 42.1442;
const MAG_DB_OFFSET: f64 = 84.2884;

/// Convert dB (0 dB = full scale) to a linear amplitude level.
pub fn db_to_amp(db: f64) -> i32 {
    10f64.powf((db + AMP_DB_OFFSET) / 10.0) as i32
}

/// Convert dB (0 dB = full scale) to a linear magnitude level.
pub fn db_to_mag(db: f64) -> i32 {
    10f64.powf((db + MAG_DB_OFFSET) / 20.0) as i32
}

/// Convert a dB gain to a linear amplitude ratio.
pub fn db_to_amp_ratio(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a dB gain to a linear magnitude ratio.
pub fn db_to_mag_ratio(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert a dB gain to a 16-bit linear gain value (32767 = unity).
pub fn db_to_gain(db: f64) -> i16 {
    (10f64.powf(db / 20.0) * 32767.0) as i16
}

// Bucket k is entered when the level exceeds ⌊10^((3 - k + 42.1442) / 10)⌋,
// i.e. integer-dB steps offset 3 dB above full scale.
const AMP_ATT_THRESHOLDS: [i32; 36] = [
    32690, 25967, 20626, 16383, 13014, 10338, 8211, 6523, 5181, 4115, 3269, 2597, 2063, 1638,
    1301, 1034, 821, 652, 518, 412, 327, 260, 206, 164, 130, 103, 82, 65, 52, 41, 33, 26, 21, 16,
    13, 10,
];

// Same steps for magnitude: ⌊10^((3 - k + 84.2884) / 20)⌋.
const MAG_ATT_THRESHOLDS: [i32; 36] = [
    23143, 20626, 18383, 16383, 14602, 13014, 11599, 10338, 9213, 8211, 7318, 6523, 5813, 5181,
    4618, 4115, 3668, 3269, 2914, 2597, 2314, 2063, 1838, 1638, 1460, 1301, 1160, 1034, 921, 821,
    732, 652, 581, 518, 462, 412,
];

/// Convert an amplitude (16384 full scale) to attenuation in integer dB,
/// offset by 3. Result is in `0..=36`.
pub fn amp_to_att(amplitude: i32) -> i32 {
    AMP_ATT_THRESHOLDS
        .iter()
        .position(|&t| amplitude > t)
        .map_or(36, |k| k as i32)
}

/// Convert a magnitude (16384 full scale) to attenuation in integer dB,
/// offset by 3. Result is in `0..=36`.
pub fn mag_to_att(magnitude: i32) -> i32 {
    MAG_ATT_THRESHOLDS
        .iter()
        .position(|&t| magnitude > t)
        .map_or(36, |k| k as i32)
}
