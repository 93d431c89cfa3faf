//! Unix time handling and conversion to the NTP 64-bit timestamp format.
//!
//! [`Instant`] carries the current wall-clock time as seconds plus nanoseconds relative
//! to the Unix epoch. [`ntp_timestamp`] converts an `Instant` plus a signed offset into
//! the 32.32 fixed-point NTP timestamp the responder puts on the wire.

use crate::protocol::TimestampFormat;
use std::time;

/// The number of seconds from 1st January 1900 UTC to the start of the Unix epoch.
pub const EPOCH_DELTA: i64 = 2_208_988_800;

// The NTP fractional scale: one second in units of 2^-32 s.
const FRAC_SCALE: f64 = 4_294_967_296.0;

/// Describes an instant relative to the `UNIX_EPOCH` - 00:00:00 Coordinated Universal
/// Time (UTC), Thursday, 1 January 1970 in seconds with the fractional part in
/// nanoseconds.
///
/// If the **Instant** describes some moment prior to `UNIX_EPOCH`, both the `secs` and
/// `subsec_nanos` components will be negative.
#[derive(Copy, Clone, Debug)]
pub struct Instant {
    secs: i64,
    subsec_nanos: i32,
}

impl Instant {
    /// Create a new **Instant** given its `secs` and `subsec_nanos` components.
    ///
    /// To indicate a time following `UNIX_EPOCH`, both `secs` and `subsec_nanos` must be
    /// positive. To indicate a time prior to `UNIX_EPOCH`, both must be negative.
    /// Violating these invariants will result in a **panic!**.
    pub fn new(secs: i64, subsec_nanos: i32) -> Instant {
        if secs > 0 && subsec_nanos < 0 {
            panic!("invalid instant: secs was positive but subsec_nanos was negative");
        }
        if secs < 0 && subsec_nanos > 0 {
            panic!("invalid instant: secs was negative but subsec_nanos was positive");
        }
        Instant { secs, subsec_nanos }
    }

    /// Uses `std::time::SystemTime::now` and `std::time::UNIX_EPOCH` to determine the
    /// current **Instant**.
    pub fn now() -> Self {
        match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
            Ok(duration) => {
                let secs = duration.as_secs() as i64;
                let subsec_nanos = duration.subsec_nanos() as i32;
                Instant::new(secs, subsec_nanos)
            }
            Err(sys_time_err) => {
                let duration_pre_unix_epoch = sys_time_err.duration();
                let secs = -(duration_pre_unix_epoch.as_secs() as i64);
                let subsec_nanos = -(duration_pre_unix_epoch.subsec_nanos() as i32);
                Instant::new(secs, subsec_nanos)
            }
        }
    }

    /// The "seconds" component of the **Instant**.
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// The fractional component of the **Instant** in nanoseconds.
    pub fn subsec_nanos(&self) -> i32 {
        self.subsec_nanos
    }
}

/// Convert an instant plus a signed offset into the NTP 64-bit timestamp format.
///
/// The total seconds since the NTP prime epoch are taken as a floating value and split:
/// the integer part is masked to 32 bits (the 2036 era rollover is intentionally not
/// handled), and the fractional part is scaled by 2^32 and rounded to nearest, which
/// minimizes bias over repeated sampling compared to truncation.
///
/// `offset_secs` shifts the reported time without touching the system clock, letting a
/// responder impersonate an arbitrary wall-clock time.
pub fn ntp_timestamp(now: &Instant, offset_secs: f64) -> TimestampFormat {
    let unix_secs = now.secs() as f64 + now.subsec_nanos() as f64 / 1e9;
    let total = unix_secs + EPOCH_DELTA as f64 + offset_secs;
    let integer_part = total.floor();
    let fractional_part = total - integer_part;
    let seconds = (integer_part as i64 & 0xffff_ffff) as u32;
    let fraction = ((fractional_part * FRAC_SCALE).round() as u64 & 0xffff_ffff) as u32;
    TimestampFormat { seconds, fraction }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_maps_to_epoch_delta() {
        let ts = ntp_timestamp(&Instant::new(0, 0), 0.0);
        assert_eq!(ts.seconds, EPOCH_DELTA as u32);
        assert_eq!(ts.fraction, 0);
    }

    #[test]
    fn known_civil_time() {
        // 2019-11-10 00:00:00 UTC: Unix=1573344000, NTP=3782332800
        let ts = ntp_timestamp(&Instant::new(1_573_344_000, 0), 0.0);
        assert_eq!(ts.seconds, 3_782_332_800);
        assert_eq!(ts.fraction, 0);
    }

    #[test]
    fn offset_shifts_seconds() {
        let base = Instant::new(1_573_344_000, 0);
        let shifted = ntp_timestamp(&base, -3600.0);
        assert_eq!(shifted.seconds, 3_782_332_800 - 3600);
    }

    #[test]
    fn fraction_is_rounded_not_truncated() {
        // 0.75 s scales to exactly 3/4 of 2^32.
        let ts = ntp_timestamp(&Instant::new(0, 750_000_000), 0.0);
        let expected = (0.75f64 * FRAC_SCALE) as u32;
        // Allow the float conversion a couple of ulps at this magnitude.
        assert!((ts.fraction as i64 - expected as i64).abs() <= 8);
    }

    #[test]
    fn fraction_near_one_wraps_to_zero() {
        // A fractional part that rounds up to 2^32 must be masked back to 0, matching
        // the integer-part masking (no carry is propagated).
        let ts = ntp_timestamp(&Instant::new(0, 999_999_999), 0.5e-9);
        assert!(ts.fraction == 0 || ts.fraction > 0xffff_f000);
    }

    #[test]
    fn consecutive_samples_differ_by_elapsed_time_regardless_of_offset() {
        for offset in [0.0, 86_400.0, -3_123_456.5] {
            let t1 = ntp_timestamp(&Instant::new(1_700_000_000, 0), offset);
            let t2 = ntp_timestamp(&Instant::new(1_700_000_007, 0), offset);
            assert_eq!(t2.seconds.wrapping_sub(t1.seconds), 7);
        }
    }

    #[test]
    fn seconds_mask_to_32_bits() {
        // Far enough in the future to overflow 32 bits of NTP seconds.
        let ts = ntp_timestamp(&Instant::new(2_200_000_000, 0), 0.0);
        let expected = ((2_200_000_000i64 + EPOCH_DELTA) & 0xffff_ffff) as u32;
        assert_eq!(ts.seconds, expected);
    }
}
