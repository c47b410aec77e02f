//! # High level notes
//!
//! The contents of this module are generated mostly by macros, which
//! implement the appropriate traits necessary to both be
//! serialized/deserialized and also provide an additional level of
//! type safety when composing frames. Constants come from the IEEE
//! 802.11 standard and the radiotap specification on the frame side,
//! and from the parameter file formats on the simulation side.
//!
//! # Design decisions
//!
//! * Enums are used so that values can be checked against a finite
//!   set of inputs as opposed to the full range of the underlying
//!   integer type. This makes it easier to catch corruption when a
//!   capture is reparsed.
//! * `UnrecognizedVariant` is included in each wire enum because
//!   completeness cannot be guaranteed for every element ID a capture
//!   may contain. A garbage value can then be inspected and reported
//!   instead of terminating the parse.

/// Constants for the 802.11 frame layer and radiotap
pub mod frame;
/// Constants for the simulation layer
pub mod sim;

/// Number of 500 kbps units per Mbps in rate fields.
pub const RATE_UNITS_PER_MBPS: u8 = 2;

/// Microseconds per second, the clock granularity of the simulator.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Convert float seconds from a distribution draw to the integer
/// microsecond clock. Negative inputs clamp to zero.
pub fn secs_to_micros(secs: f64) -> u64 {
    if secs <= 0.0 {
        0
    } else {
        (secs * MICROS_PER_SEC as f64).round() as u64
    }
}

/// Convert the integer microsecond clock to float seconds for the
/// artifact boundary.
pub fn micros_to_secs(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_SEC as f64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clock_conversion() {
        assert_eq!(secs_to_micros(2.5), 2_500_000);
        assert_eq!(secs_to_micros(-1.0), 0);
        assert!((micros_to_secs(2_500_000) - 2.5).abs() < 1e-12);
    }
}
