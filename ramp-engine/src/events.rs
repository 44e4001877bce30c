//! Events published to the engine's external consumer
//!
//! The engine has exactly one event channel. Emissions are totally
//! ordered and `operation_acks` is monotonic: every acknowledged user
//! command is counted in exactly one `PlaybackInfoChanged`.

use crate::error::EngineError;
use crate::playback_info::PlaybackInfo;
use ramp_common::{DiscontinuityReason, PlaybackParameters};

/// One event on the engine's external channel.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A new playback snapshot, the number of user operations it
    /// acknowledges, and the position discontinuity it carries, if any.
    PlaybackInfoChanged {
        operation_acks: u32,
        discontinuity: Option<DiscontinuityReason>,
        playback_info: PlaybackInfo,
    },

    /// The playback parameters in force changed (either by request or by
    /// the clock-mastering renderer).
    PlaybackParametersChanged(PlaybackParameters),

    /// Playback failed; the engine is IDLE and a new `prepare` restarts
    /// it.
    PlaybackError(EngineError),
}

impl EngineEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, EngineEvent::PlaybackError(_))
    }
}
