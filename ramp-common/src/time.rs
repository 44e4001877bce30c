//! Time vocabulary for the playback engine
//!
//! All stream positions and durations are carried as `i64` microseconds.
//! Two sentinel values cover the "unknown" cases that show up throughout
//! timeline and buffering arithmetic:
//!
//! 1. **`TIME_UNSET`**: a duration or position that is not (yet) known,
//!    e.g. the duration of a live window or an unprepared period.
//! 2. **`TIME_END_OF_SOURCE`**: a buffered/load position meaning "there is
//!    nothing further to load"; sorts below every real position.
//!
//! Conversions between the external millisecond API surface and the
//! internal microsecond representation are truncating, so two positions
//! that round to the same millisecond compare equal after `us_to_ms`.

/// An unknown or unset time, in either microseconds or milliseconds.
///
/// Chosen one above `i64::MIN` so that negating it cannot overflow.
pub const TIME_UNSET: i64 = i64::MIN + 1;

/// Position value meaning the end of the source has been reached.
pub const TIME_END_OF_SOURCE: i64 = i64::MIN;

/// Microseconds per millisecond.
pub const US_PER_MS: i64 = 1_000;

/// Converts microseconds to milliseconds, preserving [`TIME_UNSET`].
///
/// Truncating division: sub-millisecond precision is deliberately dropped
/// so that positions within the same millisecond compare equal.
pub fn us_to_ms(time_us: i64) -> i64 {
    if time_us == TIME_UNSET {
        TIME_UNSET
    } else {
        time_us / US_PER_MS
    }
}

/// Converts milliseconds to microseconds, preserving [`TIME_UNSET`].
pub fn ms_to_us(time_ms: i64) -> i64 {
    if time_ms == TIME_UNSET {
        TIME_UNSET
    } else {
        time_ms * US_PER_MS
    }
}

/// Returns whether `time_us` holds a real time rather than a sentinel.
pub fn is_set(time_us: i64) -> bool {
    time_us != TIME_UNSET && time_us != TIME_END_OF_SOURCE
}
