//! # RAMP Common Library
//!
//! Shared vocabulary for the RAMP playback engine:
//! - Time sentinels and microsecond/millisecond conversions
//! - Playback parameter types (speed/pitch, seek tolerance, repeat mode)
//! - Playback state and discontinuity vocabulary

pub mod params;
pub mod state;
pub mod time;

pub use params::{PlaybackParameters, RepeatMode, SeekParameters};
pub use state::{DiscontinuityReason, PlaybackState};
