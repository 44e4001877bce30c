//! Tunable playback parameters shared across the engine surface

use crate::time::TIME_UNSET;
use serde::{Deserialize, Serialize};

/// Playback speed and pitch in force for the player.
///
/// Speed scales how fast media time advances against the wall clock; pitch
/// is carried for renderers that can correct it independently. Both must be
/// strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackParameters {
    /// Playback speed factor (1.0 = realtime).
    pub speed: f32,
    /// Pitch factor (1.0 = unmodified).
    pub pitch: f32,
}

impl PlaybackParameters {
    pub const DEFAULT: PlaybackParameters = PlaybackParameters {
        speed: 1.0,
        pitch: 1.0,
    };

    /// Creates parameters with the given speed and an unmodified pitch.
    ///
    /// # Panics
    /// Panics if `speed` is not strictly positive.
    pub fn with_speed(speed: f32) -> Self {
        Self::new(speed, 1.0)
    }

    /// # Panics
    /// Panics if `speed` or `pitch` is not strictly positive.
    pub fn new(speed: f32, pitch: f32) -> Self {
        assert!(speed > 0.0, "playback speed must be positive: {speed}");
        assert!(pitch > 0.0, "playback pitch must be positive: {pitch}");
        Self { speed, pitch }
    }

    /// Scales a playout duration in milliseconds to the amount of media
    /// time it covers, in microseconds.
    pub fn media_time_us_for_playout_ms(&self, playout_ms: i64) -> i64 {
        ((playout_ms as f64) * 1_000.0 * (self.speed as f64)) as i64
    }
}

impl Default for PlaybackParameters {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Tolerance window applied when resolving an externally requested seek.
///
/// A seek to position `p` may be adjusted by the media period to any sync
/// point inside `[p - tolerance_before_us, p + tolerance_after_us]`,
/// typically to land on a keyframe without re-decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekParameters {
    pub tolerance_before_us: i64,
    pub tolerance_after_us: i64,
}

impl SeekParameters {
    /// Exact seeks: no adjustment allowed in either direction.
    pub const EXACT: SeekParameters = SeekParameters {
        tolerance_before_us: 0,
        tolerance_after_us: 0,
    };

    /// Seek to the closest sync point, in either direction.
    pub const CLOSEST_SYNC: SeekParameters = SeekParameters {
        tolerance_before_us: i64::MAX,
        tolerance_after_us: i64::MAX,
    };

    /// Seek to the closest sync point at or before the requested position.
    pub const PREVIOUS_SYNC: SeekParameters = SeekParameters {
        tolerance_before_us: i64::MAX,
        tolerance_after_us: 0,
    };

    /// Seek to the closest sync point at or after the requested position.
    pub const NEXT_SYNC: SeekParameters = SeekParameters {
        tolerance_before_us: 0,
        tolerance_after_us: i64::MAX,
    };

    /// # Panics
    /// Panics if either tolerance is negative.
    pub fn new(tolerance_before_us: i64, tolerance_after_us: i64) -> Self {
        assert!(tolerance_before_us >= 0 && tolerance_before_us != TIME_UNSET);
        assert!(tolerance_after_us >= 0 && tolerance_after_us != TIME_UNSET);
        Self {
            tolerance_before_us,
            tolerance_after_us,
        }
    }
}

impl Default for SeekParameters {
    fn default() -> Self {
        Self::EXACT
    }
}

/// Queue repeat behavior when playback reaches the end of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Play the timeline once, then end.
    Off,
    /// Repeat the current window indefinitely.
    One,
    /// Wrap from the last window back to the first.
    All,
}

impl std::fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepeatMode::Off => write!(f, "off"),
            RepeatMode::One => write!(f, "one"),
            RepeatMode::All => write!(f, "all"),
        }
    }
}
