//! Immutable playback snapshots and their diff accumulator
//!
//! Every mutation on the playback worker produces a new [`PlaybackInfo`];
//! the [`PlaybackInfoUpdate`] accumulator decides, at the end of each
//! message-handler pass, whether an external notification is due. The hot
//! position triple is additionally published through [`SharedPosition`]
//! so any thread can read a tick-consistent position without waiting for
//! the next snapshot event.

use crate::timeline::{MediaPeriodId, Timeline};
use crate::source::Manifest;
use crate::track::{TrackGroupArray, TrackSelectorResult};
use ramp_common::time::TIME_UNSET;
use ramp_common::{DiscontinuityReason, PlaybackState};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Lock-free mirror of the position triple, published at the end of each
/// tick and readable from any thread.
#[derive(Debug, Default)]
pub struct SharedPosition {
    position_us: AtomicI64,
    buffered_position_us: AtomicI64,
    total_buffered_duration_us: AtomicI64,
}

impl SharedPosition {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            position_us: AtomicI64::new(0),
            buffered_position_us: AtomicI64::new(0),
            total_buffered_duration_us: AtomicI64::new(0),
        })
    }

    pub(crate) fn publish(&self, info: &PlaybackInfo) {
        self.position_us.store(info.position_us, Ordering::Release);
        self.buffered_position_us
            .store(info.buffered_position_us, Ordering::Release);
        self.total_buffered_duration_us
            .store(info.total_buffered_duration_us, Ordering::Release);
    }

    pub fn position_us(&self) -> i64 {
        self.position_us.load(Ordering::Acquire)
    }

    pub fn buffered_position_us(&self) -> i64 {
        self.buffered_position_us.load(Ordering::Acquire)
    }

    pub fn total_buffered_duration_us(&self) -> i64 {
        self.total_buffered_duration_us.load(Ordering::Acquire)
    }
}

/// Immutable snapshot of an ongoing playback.
#[derive(Clone)]
pub struct PlaybackInfo {
    pub timeline: Arc<Timeline>,
    pub manifest: Option<Manifest>,
    /// Id of the playing media period.
    pub period_id: MediaPeriodId,
    /// Position playback last (re)started from within `period_id`.
    pub start_position_us: i64,
    /// If `period_id` is an ad: the suspended content position; otherwise
    /// `TIME_UNSET`.
    pub content_position_us: i64,
    pub playback_state: PlaybackState,
    pub is_loading: bool,
    pub track_groups: Arc<TrackGroupArray>,
    pub track_selector_result: Arc<TrackSelectorResult>,
    /// Id of the loading media period (tail of the queue).
    pub loading_period_id: MediaPeriodId,
    /// Current position within `period_id`.
    pub position_us: i64,
    /// Position up to which the loading period has buffered.
    pub buffered_position_us: i64,
    /// Buffered media between `position_us` and `buffered_position_us`,
    /// across period boundaries and ads.
    pub total_buffered_duration_us: i64,
}

impl PlaybackInfo {
    /// A placeholder id used while the timeline is empty.
    fn placeholder_period_id() -> MediaPeriodId {
        MediaPeriodId::for_content(Uuid::nil())
    }

    /// Initial masking snapshot used before any real playback info exists.
    pub fn masked(start_position_us: i64, empty_selection: Arc<TrackSelectorResult>) -> Self {
        let id = Self::placeholder_period_id();
        Self {
            timeline: Timeline::empty(),
            manifest: None,
            period_id: id.clone(),
            start_position_us,
            content_position_us: TIME_UNSET,
            playback_state: PlaybackState::Idle,
            is_loading: false,
            track_groups: Arc::new(TrackGroupArray::EMPTY),
            track_selector_result: empty_selection,
            loading_period_id: id,
            position_us: start_position_us,
            buffered_position_us: start_position_us,
            total_buffered_duration_us: 0,
        }
    }

    /// Id of the first period that would play in the current timeline, or
    /// the placeholder id when the timeline is empty.
    pub fn first_period_id(&self, shuffle_mode_enabled: bool) -> MediaPeriodId {
        match self.timeline.first_window_index(shuffle_mode_enabled) {
            Some(window_index) => {
                let first_period = self.timeline.window(window_index).first_period_index;
                MediaPeriodId::for_content(self.timeline.uid_of_period(first_period))
            }
            None => Self::placeholder_period_id(),
        }
    }

    pub fn copy_with_new_position(
        &self,
        period_id: MediaPeriodId,
        position_us: i64,
        content_position_us: i64,
        total_buffered_duration_us: i64,
    ) -> Self {
        let mut copy = self.clone();
        copy.start_position_us = position_us;
        copy.position_us = position_us;
        copy.content_position_us = if period_id.is_ad() {
            content_position_us
        } else {
            TIME_UNSET
        };
        copy.period_id = period_id;
        copy.total_buffered_duration_us = total_buffered_duration_us;
        copy
    }

    pub fn copy_with_timeline(&self, timeline: Arc<Timeline>, manifest: Option<Manifest>) -> Self {
        let mut copy = self.clone();
        copy.timeline = timeline;
        copy.manifest = manifest;
        copy
    }

    pub fn copy_with_playback_state(&self, playback_state: PlaybackState) -> Self {
        let mut copy = self.clone();
        copy.playback_state = playback_state;
        copy
    }

    pub fn copy_with_is_loading(&self, is_loading: bool) -> Self {
        let mut copy = self.clone();
        copy.is_loading = is_loading;
        copy
    }

    pub fn copy_with_track_info(
        &self,
        track_groups: Arc<TrackGroupArray>,
        track_selector_result: Arc<TrackSelectorResult>,
    ) -> Self {
        let mut copy = self.clone();
        copy.track_groups = track_groups;
        copy.track_selector_result = track_selector_result;
        copy
    }

    pub fn copy_with_loading_period_id(&self, loading_period_id: MediaPeriodId) -> Self {
        let mut copy = self.clone();
        copy.loading_period_id = loading_period_id;
        copy
    }
}

impl std::fmt::Debug for PlaybackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackInfo")
            .field("playback_state", &self.playback_state)
            .field("period_id", &self.period_id)
            .field("position_us", &self.position_us)
            .field("start_position_us", &self.start_position_us)
            .field("content_position_us", &self.content_position_us)
            .field("buffered_position_us", &self.buffered_position_us)
            .field("total_buffered_duration_us", &self.total_buffered_duration_us)
            .field("is_loading", &self.is_loading)
            .field("loading_period_id", &self.loading_period_id)
            .field("windows", &self.timeline.window_count())
            .finish()
    }
}

/// Accumulates what changed since the last external notification.
///
/// `has_pending_update` compares snapshots by generation (every mutation
/// bumps it), so an unchanged snapshot with no acks and no discontinuity
/// publishes nothing.
#[derive(Debug, Default)]
pub struct PlaybackInfoUpdate {
    last_generation: u64,
    generation: u64,
    pub operation_acks: u32,
    discontinuity: Option<DiscontinuityReason>,
}

impl PlaybackInfoUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the snapshot was replaced.
    pub fn on_playback_info_changed(&mut self) {
        self.generation += 1;
    }

    pub fn increment_operation_acks(&mut self, count: u32) {
        self.operation_acks += count;
    }

    /// Records a position discontinuity. Non-internal reasons always beat
    /// `Internal`; at most one non-internal reason occurs per handler
    /// pass.
    pub fn set_position_discontinuity(&mut self, reason: DiscontinuityReason) {
        if let Some(existing) = self.discontinuity {
            if !existing.is_internal() {
                debug_assert!(
                    reason.is_internal(),
                    "conflicting discontinuity reasons in one pass: {existing:?} vs {reason:?}"
                );
                return;
            }
        }
        self.discontinuity = Some(reason);
    }

    pub fn discontinuity(&self) -> Option<DiscontinuityReason> {
        self.discontinuity
    }

    pub fn has_pending_update(&self) -> bool {
        self.generation != self.last_generation
            || self.operation_acks > 0
            || self.discontinuity.is_some()
    }

    /// Clears the accumulator after a notification was published.
    pub fn reset(&mut self) {
        self.last_generation = self.generation;
        self.operation_acks = 0;
        self.discontinuity = None;
    }
}
