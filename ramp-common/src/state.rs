//! Playback state vocabulary

use serde::{Deserialize, Serialize};

/// Coarse playback state reported in every playback snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No source prepared, or stopped after an error.
    Idle,
    /// A source is prepared but playback cannot progress (buffering or
    /// waiting for the first period).
    Buffering,
    /// Playback can progress; media advances whenever play-when-ready is
    /// set.
    Ready,
    /// The end of the timeline was reached.
    Ended,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Ready => write!(f, "ready"),
            PlaybackState::Ended => write!(f, "ended"),
        }
    }
}

/// Why the reported position jumped rather than advancing continuously.
///
/// External reasons always take precedence over `Internal` when more than
/// one discontinuity is recorded in a single handler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscontinuityReason {
    /// An explicit seek request moved the position.
    Seek,
    /// A seek could not be satisfied exactly and was adjusted.
    SeekAdjustment,
    /// Playback advanced across a content period boundary.
    PeriodTransition,
    /// Playback moved into or out of an inserted ad.
    AdInsertion,
    /// A source-side correction (e.g. a reported read discontinuity).
    Internal,
}

impl DiscontinuityReason {
    /// Whether this reason may be overridden by a later non-internal one.
    pub fn is_internal(&self) -> bool {
        matches!(self, DiscontinuityReason::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(PlaybackState::Buffering.to_string(), "buffering");
        assert_eq!(PlaybackState::Ended.to_string(), "ended");
    }

    #[test]
    fn test_state_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&PlaybackState::Ready).unwrap(),
            "\"ready\""
        );
    }

    #[test]
    fn test_reason_precedence_helper() {
        assert!(DiscontinuityReason::Internal.is_internal());
        assert!(!DiscontinuityReason::Seek.is_internal());
        assert!(!DiscontinuityReason::AdInsertion.is_internal());
    }
}
