//! FILETIME tick arithmetic.
//!
//! Timestamps crossing the platform boundary are 64-bit counts of 100 ns
//! intervals since 1601-01-01 UTC.

use chrono::{DateTime, Utc};

/// 100 ns ticks per second.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// 1970-01-01 UTC expressed in FILETIME ticks.
pub const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

/// Converts a UTC instant to FILETIME ticks. Instants before 1601 clamp to 0.
pub fn datetime_to_ticks(at: DateTime<Utc>) -> u64 {
    let secs = at.timestamp();
    let sub = u64::from(at.timestamp_subsec_nanos()) / 100;
    let unix_ticks = i128::from(secs) * i128::from(TICKS_PER_SECOND) + i128::from(sub);
    let ticks = unix_ticks + i128::from(UNIX_EPOCH_TICKS);
    u64::try_from(ticks.max(0)).unwrap_or(u64::MAX)
}

/// Converts seconds since the Unix epoch to FILETIME ticks.
pub fn unix_secs_to_ticks(secs: u64) -> u64 {
    secs.saturating_mul(TICKS_PER_SECOND)
        .saturating_add(UNIX_EPOCH_TICKS)
}

/// Current wall-clock time in FILETIME ticks.
pub fn now_ticks() -> u64 {
    datetime_to_ticks(Utc::now())
}

/// Whole seconds elapsed between `creation` and `now`, truncated to 32 bits.
///
/// A creation time in the future yields 0.
pub fn uptime_seconds(now: u64, creation: u64) -> u32 {
    (now.saturating_sub(creation) / TICKS_PER_SECOND) as u32
}
