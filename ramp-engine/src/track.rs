//! Track groups, selections, and the track-selector seam
//!
//! The engine never inspects sample data; it only matches *selections*
//! (which tracks each renderer should consume) against renderer
//! capabilities. The selection policy itself lives behind the
//! [`TrackSelector`] trait.

use crate::renderer::{RendererCapabilities, TrackType};
use crate::timeline::{MediaPeriodId, Timeline};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// Describes one elementary stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    /// Stable identifier within its track group.
    pub id: String,
    /// Which renderer family can play this.
    pub track_type: TrackType,
    /// Sample MIME type, e.g. `audio/mp4a-latm`.
    pub mime_type: String,
    /// Average bitrate in bits/s, or `None` if unknown.
    pub bitrate: Option<u32>,
    /// Language tag, if declared.
    pub language: Option<String>,
}

impl Format {
    pub fn new(id: impl Into<String>, track_type: TrackType, mime_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            track_type,
            mime_type: mime_type.into(),
            bitrate: None,
            language: None,
        }
    }
}

/// An immutable group of alternative formats for one logical track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGroup {
    pub formats: Vec<Format>,
}

impl TrackGroup {
    pub fn new(formats: Vec<Format>) -> Self {
        assert!(!formats.is_empty(), "track group must not be empty");
        Self { formats }
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn track_type(&self) -> TrackType {
        self.formats[0].track_type
    }
}

/// All track groups exposed by one media period.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackGroupArray {
    pub groups: Vec<TrackGroup>,
}

impl TrackGroupArray {
    pub const EMPTY: TrackGroupArray = TrackGroupArray { groups: Vec::new() };

    pub fn new(groups: Vec<TrackGroup>) -> Self {
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// A selection of one or more formats from a single track group, in
/// selection-preference order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSelection {
    pub group: TrackGroup,
    /// Indices into `group.formats`, best first.
    pub indices: Vec<usize>,
}

impl TrackSelection {
    pub fn fixed(group: TrackGroup, index: usize) -> Self {
        assert!(index < group.len());
        Self {
            group,
            indices: vec![index],
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The formats covered by this selection, best first.
    pub fn formats(&self) -> Vec<Format> {
        self.indices
            .iter()
            .map(|&i| self.group.formats[i].clone())
            .collect()
    }

    /// Called when the playback speed changes, so adaptive selections can
    /// re-weigh their buffer math.
    pub fn on_playback_speed(&self, _speed: f32) {}

    /// Called when the playback position jumps, invalidating read-ahead
    /// heuristics.
    pub fn on_discontinuity(&self) {}
}

/// Renderer-level configuration attached to a selection.
///
/// Stream replacement across period boundaries is only legal when the new
/// configuration equals the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RendererConfiguration {
    /// Whether the renderer should operate in tunneling mode.
    pub tunneling: bool,
}

impl RendererConfiguration {
    pub const DEFAULT: RendererConfiguration = RendererConfiguration { tunneling: false };
}

/// The outcome of one track-selection pass: per-renderer selections and
/// configurations, index-aligned with the engine's renderer array.
#[derive(Clone, Default)]
pub struct TrackSelectorResult {
    pub selections: Vec<Option<TrackSelection>>,
    pub configurations: Vec<Option<RendererConfiguration>>,
    /// Opaque payload handed back on activation.
    pub info: Option<Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for TrackSelectorResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackSelectorResult")
            .field("selections", &self.selections)
            .field("configurations", &self.configurations)
            .field("has_info", &self.info.is_some())
            .finish()
    }
}

impl TrackSelectorResult {
    pub fn empty(renderer_count: usize) -> Self {
        Self {
            selections: vec![None; renderer_count],
            configurations: vec![None; renderer_count],
            info: None,
        }
    }

    pub fn renderer_count(&self) -> usize {
        self.selections.len()
    }

    pub fn is_renderer_enabled(&self, index: usize) -> bool {
        self.configurations.get(index).is_some_and(Option::is_some)
    }

    pub fn selection(&self, index: usize) -> Option<&TrackSelection> {
        self.selections.get(index).and_then(Option::as_ref)
    }

    pub fn configuration(&self, index: usize) -> Option<RendererConfiguration> {
        self.configurations.get(index).copied().flatten()
    }

    /// Whether renderer `index` keeps an equivalent selection across the
    /// two results (same enablement, same selection content).
    pub fn is_equivalent(&self, other: &TrackSelectorResult, index: usize) -> bool {
        self.is_renderer_enabled(index) == other.is_renderer_enabled(index)
            && self.selection(index) == other.selection(index)
            && self.configuration(index) == other.configuration(index)
    }
}

/// Handle a selector uses to tell the engine its current selections are no
/// longer valid (e.g. user preferences changed). Callable from any thread.
#[derive(Clone)]
pub struct SelectorInvalidationHandle {
    notify: Arc<dyn Fn() + Send + Sync>,
}

impl SelectorInvalidationHandle {
    pub(crate) fn new(notify: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self { notify }
    }

    /// Requests a track reselection on the playback worker.
    pub fn invalidate(&self) {
        (self.notify)();
    }
}

/// Estimates network throughput for adaptive selections.
pub trait BandwidthMeter: Send + Sync {
    /// Current estimate in bits per second.
    fn bitrate_estimate(&self) -> i64;

    /// Listener to be notified of media transfers, if this meter wants
    /// them.
    fn transfer_listener(&self) -> Option<Arc<dyn TransferListener>> {
        None
    }
}

/// Observes data transfers performed by media sources.
pub trait TransferListener: Send + Sync {
    fn on_bytes_transferred(&self, bytes: usize);
}

/// Track-selection policy seam.
///
/// `select_tracks` is pure from the engine's point of view: the same
/// inputs yield an index-aligned result for the engine's renderers. The
/// selector may keep internal preference state and use the invalidation
/// handle whenever that state changes.
pub trait TrackSelector: Send {
    /// Called once before first use.
    fn init(&mut self, invalidation: SelectorInvalidationHandle, bandwidth_meter: Arc<dyn BandwidthMeter>);

    /// Selects tracks for one media period.
    fn select_tracks(
        &mut self,
        renderer_capabilities: &[RendererCapabilities],
        track_groups: &TrackGroupArray,
        period_id: &MediaPeriodId,
        timeline: &Timeline,
    ) -> TrackSelectorResult;

    /// Called when a selection becomes the active one for playback.
    fn on_selection_activated(&mut self, _info: Option<Arc<dyn Any + Send + Sync>>) {}
}
