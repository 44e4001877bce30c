//! The renderer capability seam and its state machine
//!
//! A renderer consumes samples from one [`SampleStream`] and produces
//! output (audio, video, text, ...). The engine owns renderers exclusively
//! and drives them through a three-state lifecycle:
//!
//! ```text
//! DISABLED --enable()--->  ENABLED --start()--> STARTED
//! STARTED  --stop()-----> ENABLED
//! ENABLED  --disable()--> DISABLED
//! any      --reset()----> DISABLED   (also releases codec-level resources)
//! ```
//!
//! `render` is only legal in STARTED, or in ENABLED for pre-roll work.
//! `replace_stream` is legal in ENABLED/STARTED once the current stream
//! has been read to end and the next period's configuration is equal.

use crate::error::{RendererError, SourceError};
use crate::media_clock::MediaClock;
use crate::source::SampleStream;
use crate::track::{Format, RendererConfiguration};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Renderer families; determines which track groups a renderer can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    /// Consumes no samples; participates in timing only.
    None,
    Audio,
    Video,
    Text,
    Metadata,
    Camera,
}

/// Lifecycle state of a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererState {
    Disabled,
    Enabled,
    Started,
}

impl std::fmt::Display for RendererState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RendererState::Disabled => write!(f, "disabled"),
            RendererState::Enabled => write!(f, "enabled"),
            RendererState::Started => write!(f, "started"),
        }
    }
}

/// Static description of what a renderer can do, consulted by the track
/// selector before any stream exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererCapabilities {
    pub track_type: TrackType,
}

impl RendererCapabilities {
    /// Whether this renderer is a no-sample renderer: it never receives a
    /// sample stream and does not count toward enabled-renderer
    /// arithmetic.
    pub fn is_no_sample(&self) -> bool {
        self.track_type == TrackType::None
    }
}

/// A media renderer driven cooperatively by the playback engine.
///
/// Implementations own their decode state; the engine owns the schedule.
/// All position arguments are in the renderer timebase (period time plus
/// the holder's renderer offset).
pub trait Renderer: Send {
    /// This renderer's family.
    fn track_type(&self) -> TrackType;

    fn capabilities(&self) -> RendererCapabilities {
        RendererCapabilities {
            track_type: self.track_type(),
        }
    }

    /// Fixes the renderer's position in the engine's renderer array.
    /// Called once, before any other method.
    fn set_index(&mut self, index: usize);

    fn state(&self) -> RendererState;

    /// DISABLED → ENABLED with an initial stream binding.
    ///
    /// `joining` is set when the renderer is being enabled mid-playback
    /// and may need to catch up to the others before producing output.
    #[allow(clippy::too_many_arguments)]
    fn enable(
        &mut self,
        configuration: RendererConfiguration,
        formats: &[Format],
        stream: Option<Arc<dyn SampleStream>>,
        position_us: i64,
        joining: bool,
        offset_us: i64,
    ) -> Result<(), RendererError>;

    /// ENABLED → STARTED.
    fn start(&mut self) -> Result<(), RendererError>;

    /// STARTED → ENABLED.
    fn stop(&mut self) -> Result<(), RendererError>;

    /// ENABLED → DISABLED; unbinds the stream but may keep heavyweight
    /// resources for quick re-enabling (see foreground mode).
    fn disable(&mut self) -> Result<(), RendererError>;

    /// any → DISABLED; additionally releases codec-level resources.
    fn reset(&mut self);

    /// Swaps in the next period's stream without interrupting output.
    fn replace_stream(
        &mut self,
        formats: &[Format],
        stream: Option<Arc<dyn SampleStream>>,
        offset_us: i64,
    ) -> Result<(), RendererError>;

    /// One cooperative slice of work: decode/output media up to
    /// `position_us`.
    fn render(&mut self, position_us: i64, elapsed_realtime_us: i64) -> Result<(), RendererError>;

    /// Whether the renderer can make progress from its current buffers.
    fn is_ready(&self) -> bool;

    /// Whether the renderer has output everything up to the end of its
    /// final stream.
    fn is_ended(&self) -> bool;

    /// Whether every sample of the current stream has been consumed.
    fn has_read_stream_to_end(&self) -> bool;

    /// The stream currently bound, if any.
    fn stream(&self) -> Option<&Arc<dyn SampleStream>>;

    /// Marks the current stream as the renderer's last: it must drain and
    /// then report `is_ended`.
    fn set_current_stream_final(&mut self);

    fn is_current_stream_final(&self) -> bool;

    /// Surfaces an error held by the bound stream, if any.
    fn check_stream_error(&self) -> Result<(), SourceError>;

    /// Jumps the renderer position, invalidating any read-ahead. Legal in
    /// ENABLED and STARTED.
    fn reset_position(&mut self, position_us: i64) -> Result<(), RendererError>;

    /// Renderer-timebase position up to which samples have been read, or
    /// `TIME_END_OF_SOURCE` once the stream is exhausted.
    fn reading_position_us(&self) -> i64;

    /// Adjusts the renderer's operating rate to the playback speed.
    fn set_operating_rate(&mut self, _operating_rate: f32) -> Result<(), RendererError> {
        Ok(())
    }

    /// The media clock this renderer exposes, if it is a position master
    /// (typically the audio renderer).
    fn media_clock(&mut self) -> Option<&mut dyn MediaClock> {
        None
    }
}
