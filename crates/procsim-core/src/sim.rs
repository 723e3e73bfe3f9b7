//! Simulated time.
//!
//! The kernel keeps time as an integer count of milliseconds. Model
//! parameters (service times, interarrival times, flow rates) are authored in
//! seconds and converted at the boundary, so that event ordering never depends
//! on floating-point comparison.

/// Absolute simulated time in milliseconds.
pub type SimTime = u64;

/// Milliseconds per model time unit (one second).
pub const MS_PER_SECOND: f64 = 1000.0;

/// One model time unit expressed in kernel time.
pub const ONE_TIME_UNIT: SimTime = 1000;

/// Convert a duration in seconds to kernel time, rounding to the nearest
/// millisecond. Negative, zero and non-finite inputs map to zero.
pub fn to_sim_time(seconds: f64) -> SimTime {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    let ms = (seconds * MS_PER_SECOND).round();
    if ms >= u64::MAX as f64 {
        u64::MAX
    } else {
        ms as SimTime
    }
}

/// Convert kernel time to seconds.
pub fn to_seconds(time: SimTime) -> f64 {
    time as f64 / MS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_to_millis() {
        assert_eq!(to_sim_time(1.0), 1000);
        assert_eq!(to_sim_time(0.0015), 2);
        assert_eq!(to_sim_time(0.0004), 0);
    }

    #[test]
    fn invalid_durations_are_zero() {
        assert_eq!(to_sim_time(-3.0), 0);
        assert_eq!(to_sim_time(f64::NAN), 0);
        assert_eq!(to_sim_time(f64::NEG_INFINITY), 0);
    }

    #[test]
    fn huge_durations_saturate() {
        assert_eq!(to_sim_time(f64::INFINITY), 0);
        assert_eq!(to_sim_time(1e300), u64::MAX);
    }

    #[test]
    fn back_to_seconds() {
        assert_eq!(to_seconds(2500), 2.5);
        assert_eq!(to_seconds(to_sim_time(12.0)), 12.0);
    }
}
