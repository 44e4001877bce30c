//! The media period queue
//!
//! Tracks which media periods are where in the playback pipeline: a
//! sliding window of [`MediaPeriodHolder`]s with three cursors.
//! *Playing* is always the front once playback started, *reading* is the
//! period renderers consume from, and *loading* is the tail, being
//! filled by the source. The queue owns every period for its lifetime
//! and is the only place period/renderer-timebase conversions happen.
//!
//! The queue also computes what to load next: successor periods across
//! window boundaries (honoring repeat and shuffle) and in/out transitions
//! of ad groups scheduled on the periods.

use crate::source::{Allocator, MediaPeriod, MediaSource, SampleStream};
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{TrackSelector, TrackSelectorResult};
use crate::renderer::RendererCapabilities;
use ramp_common::time::{TIME_END_OF_SOURCE, TIME_UNSET};
use ramp_common::RepeatMode;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Upper bound on queued periods, as a defense against pathological
/// timelines with thousands of tiny periods.
const MAXIMUM_BUFFER_AHEAD_PERIODS: usize = 100;

/// Everything the engine needs to know about one queued media period.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPeriodInfo {
    pub id: MediaPeriodId,
    /// Position playback of this period starts at, period-relative.
    pub start_position_us: i64,
    /// For ads: the content position the ad suspends; `TIME_UNSET`
    /// otherwise.
    pub content_position_us: i64,
    /// Duration of this media period (for content ending at an ad group,
    /// the group's position); `TIME_UNSET` when unknown.
    pub duration_us: i64,
    /// Whether this is the last media period inside its timeline period
    /// (false for content that still has an ad group ahead, and for ads).
    pub is_last_in_timeline_period: bool,
    /// Whether playback of the whole timeline ends with this period.
    pub is_final: bool,
}

impl MediaPeriodInfo {
    fn with_content_position(mut self, content_position_us: i64) -> Self {
        self.content_position_us = content_position_us;
        self
    }
}

/// Queue node owning one media period plus its engine-side bookkeeping.
pub struct MediaPeriodHolder {
    /// Queue-unique identity used to match asynchronous period callbacks.
    pub serial: u64,
    pub media_period: Box<dyn MediaPeriod>,
    pub info: MediaPeriodInfo,
    pub prepared: bool,
    /// Whether any renderer consumes samples from this period.
    pub has_enabled_tracks: bool,
    /// One slot per renderer; `None` for disabled and no-sample renderers.
    pub sample_streams: Vec<Option<Arc<dyn SampleStream>>>,
    /// Selection in force; `None` until prepared.
    pub track_selector_result: Option<Arc<TrackSelectorResult>>,
    /// Renderer time at which `info.start_position_us` plays. Successive
    /// holders chain this so renderer time is continuous across
    /// transitions.
    renderer_position_offset_us: i64,
}

impl MediaPeriodHolder {
    fn new(
        serial: u64,
        renderer_count: usize,
        media_period: Box<dyn MediaPeriod>,
        info: MediaPeriodInfo,
        renderer_position_offset_us: i64,
    ) -> Self {
        Self {
            serial,
            media_period,
            info,
            prepared: false,
            has_enabled_tracks: false,
            sample_streams: vec![None; renderer_count],
            track_selector_result: None,
            renderer_position_offset_us,
        }
    }

    /// Additive offset from period-relative time to renderer time.
    pub fn renderer_offset_us(&self) -> i64 {
        self.renderer_position_offset_us - self.info.start_position_us
    }

    /// Renderer time at which this period starts playing.
    pub fn start_position_renderer_time(&self) -> i64 {
        self.renderer_position_offset_us
    }

    pub fn to_renderer_time(&self, period_time_us: i64) -> i64 {
        period_time_us + self.renderer_offset_us()
    }

    pub fn to_period_time(&self, renderer_time_us: i64) -> i64 {
        renderer_time_us - self.renderer_offset_us()
    }

    /// Re-anchors the renderer timebase so the period's start position
    /// plays at renderer time `renderer_position_offset_us`.
    pub fn set_renderer_position_offset(&mut self, renderer_position_offset_us: i64) {
        self.renderer_position_offset_us = renderer_position_offset_us;
    }

    /// Whether everything this period will ever provide is buffered.
    pub fn is_fully_buffered(&self) -> bool {
        self.prepared
            && (!self.has_enabled_tracks
                || self.media_period.buffered_position_us() == TIME_END_OF_SOURCE)
    }

    /// Buffered position in period time, resolving the end-of-source
    /// sentinel against the period duration.
    pub fn buffered_position_us(&self) -> i64 {
        if !self.prepared {
            return self.info.start_position_us;
        }
        let buffered = if self.has_enabled_tracks {
            self.media_period.buffered_position_us()
        } else {
            TIME_END_OF_SOURCE
        };
        if buffered == TIME_END_OF_SOURCE {
            self.info.duration_us
        } else {
            buffered
        }
    }

    /// Next load position in period time, or `TIME_END_OF_SOURCE` when
    /// nothing remains to load.
    pub fn next_load_position_us(&self) -> i64 {
        if !self.prepared {
            0
        } else {
            self.media_period.next_load_position_us()
        }
    }

    pub fn continue_loading(&mut self, renderer_position_us: i64) {
        let period_position_us = self.to_period_time(renderer_position_us);
        self.media_period.continue_loading(period_position_us);
    }

    pub fn reevaluate_buffer(&mut self, renderer_position_us: i64) {
        if self.prepared {
            let period_position_us = self.to_period_time(renderer_position_us);
            self.media_period.reevaluate_buffer(period_position_us);
        }
    }

    /// First-time track selection once the period reports prepared.
    /// Returns the (possibly adjusted) start position.
    pub fn handle_prepared(
        &mut self,
        selector: &mut dyn TrackSelector,
        capabilities: &[RendererCapabilities],
        playback_speed: f32,
        timeline: &Timeline,
    ) -> i64 {
        self.prepared = true;
        let result = self
            .select_tracks(selector, capabilities, playback_speed, timeline)
            .expect("first selection must produce a result");
        let start_position_us = self.apply_track_selection(
            result,
            selector,
            capabilities,
            self.info.start_position_us,
            false,
        );
        self.info.start_position_us = start_position_us;
        start_position_us
    }

    /// Runs the selector for this period; `None` when the selection is
    /// unchanged from the one in force.
    pub fn select_tracks(
        &mut self,
        selector: &mut dyn TrackSelector,
        capabilities: &[RendererCapabilities],
        playback_speed: f32,
        timeline: &Timeline,
    ) -> Option<TrackSelectorResult> {
        let track_groups = self.media_period.track_groups();
        let result = selector.select_tracks(capabilities, &track_groups, &self.info.id, timeline);
        if let Some(current) = &self.track_selector_result {
            if (0..capabilities.len()).all(|i| result.is_equivalent(current, i)) {
                return None;
            }
        }
        for selection in result.selections.iter().flatten() {
            selection.on_playback_speed(playback_speed);
        }
        Some(result)
    }

    /// Applies a selection, rebinding sample streams. Streams of renderers
    /// whose selection is unchanged are retained unless `force_recreate`.
    /// Returns the position selection actually started from; recreated
    /// stream slots are flagged in the returned vector.
    pub fn apply_track_selection(
        &mut self,
        result: TrackSelectorResult,
        selector: &mut dyn TrackSelector,
        capabilities: &[RendererCapabilities],
        position_us: i64,
        force_recreate: bool,
    ) -> i64 {
        let (adjusted_position_us, _) = self.apply_track_selection_with_flags(
            result,
            selector,
            capabilities,
            position_us,
            force_recreate,
        );
        adjusted_position_us
    }

    pub fn apply_track_selection_with_flags(
        &mut self,
        result: TrackSelectorResult,
        selector: &mut dyn TrackSelector,
        capabilities: &[RendererCapabilities],
        position_us: i64,
        force_recreate: bool,
    ) -> (i64, Vec<bool>) {
        // No-sample renderers participate in the selection but never bind
        // a stream; hand the period a masked selection for those slots.
        let mut period_selections = result.selections.clone();
        for (i, capability) in capabilities.iter().enumerate() {
            if capability.is_no_sample() {
                period_selections[i] = None;
            }
        }
        if force_recreate {
            for slot in self.sample_streams.iter_mut() {
                *slot = None;
            }
        }
        let mut stream_reset_flags = vec![false; self.sample_streams.len()];
        let adjusted_position_us = self.media_period.select_tracks(
            &period_selections,
            &mut self.sample_streams,
            &mut stream_reset_flags,
            position_us,
        );
        self.has_enabled_tracks = self.sample_streams.iter().any(Option::is_some);
        selector.on_selection_activated(result.info.clone());
        self.track_selector_result = Some(Arc::new(result));
        (adjusted_position_us, stream_reset_flags)
    }

    pub fn track_selector_result(&self) -> Arc<TrackSelectorResult> {
        self.track_selector_result
            .clone()
            .expect("track selection queried before the period was prepared")
    }

    fn release(mut self, source: Option<&mut dyn MediaSource>) {
        trace!(serial = self.serial, "releasing media period");
        match source {
            Some(source) => source.release_period(self.media_period),
            None => self.media_period.release(),
        }
    }
}

/// Ordered queue of media period holders plus the playing/reading/loading
/// cursors.
pub struct MediaPeriodQueue {
    renderer_count: usize,
    timeline: Arc<Timeline>,
    repeat_mode: RepeatMode,
    shuffle_mode_enabled: bool,
    holders: VecDeque<MediaPeriodHolder>,
    /// False until the first prepared period becomes the playing period.
    has_playing: bool,
    /// Index of the reading period; meaningful while `has_playing`.
    reading_index: usize,
    next_serial: u64,
    /// Front period uid retained across a masking clear.
    masked_front_period_uid: Option<Uuid>,
}

impl MediaPeriodQueue {
    pub fn new(renderer_count: usize) -> Self {
        Self {
            renderer_count,
            timeline: Timeline::empty(),
            repeat_mode: RepeatMode::Off,
            shuffle_mode_enabled: false,
            holders: VecDeque::new(),
            has_playing: false,
            reading_index: 0,
            next_serial: 0,
            masked_front_period_uid: None,
        }
    }

    /// Updates the timeline used to compute successor periods. The caller
    /// re-validates queued periods afterwards via
    /// [`update_queued_periods`](Self::update_queued_periods).
    pub fn set_timeline(&mut self, timeline: Arc<Timeline>) {
        self.timeline = timeline;
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Applies a repeat-mode change; returns false when the change
    /// invalidated a period a renderer may already have read, in which
    /// case the engine must reseek the current position.
    pub fn update_repeat_mode(
        &mut self,
        repeat_mode: RepeatMode,
        source: Option<&mut dyn MediaSource>,
    ) -> bool {
        self.repeat_mode = repeat_mode;
        self.update_for_playback_mode_change(source)
    }

    /// Same contract as [`update_repeat_mode`](Self::update_repeat_mode).
    pub fn update_shuffle_mode_enabled(
        &mut self,
        shuffle_mode_enabled: bool,
        source: Option<&mut dyn MediaSource>,
    ) -> bool {
        self.shuffle_mode_enabled = shuffle_mode_enabled;
        self.update_for_playback_mode_change(source)
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn has_playing_period(&self) -> bool {
        self.has_playing
    }

    pub fn get_playing_period(&self) -> Option<&MediaPeriodHolder> {
        if self.has_playing {
            self.holders.front()
        } else {
            None
        }
    }

    pub fn get_playing_period_mut(&mut self) -> Option<&mut MediaPeriodHolder> {
        if self.has_playing {
            self.holders.front_mut()
        } else {
            None
        }
    }

    pub fn get_reading_period(&self) -> Option<&MediaPeriodHolder> {
        if self.has_playing {
            self.holders.get(self.reading_index)
        } else {
            None
        }
    }

    pub fn get_reading_period_mut(&mut self) -> Option<&mut MediaPeriodHolder> {
        if self.has_playing {
            self.holders.get_mut(self.reading_index)
        } else {
            None
        }
    }

    /// Whether the reading cursor sits on the playing period.
    pub fn reading_is_playing(&self) -> bool {
        self.reading_index == 0
    }

    pub fn reading_index(&self) -> usize {
        self.reading_index
    }

    pub fn get_loading_period(&self) -> Option<&MediaPeriodHolder> {
        self.holders.back()
    }

    pub fn get_loading_period_mut(&mut self) -> Option<&mut MediaPeriodHolder> {
        self.holders.back_mut()
    }

    /// Front of the queue whether or not playback has started.
    pub fn get_front_period(&self) -> Option<&MediaPeriodHolder> {
        self.holders.front()
    }

    pub fn holder(&self, index: usize) -> Option<&MediaPeriodHolder> {
        self.holders.get(index)
    }

    pub fn holder_mut(&mut self, index: usize) -> Option<&mut MediaPeriodHolder> {
        self.holders.get_mut(index)
    }

    pub fn holder_by_serial_mut(&mut self, serial: u64) -> Option<&mut MediaPeriodHolder> {
        self.holders.iter_mut().find(|h| h.serial == serial)
    }

    /// Whether `serial` identifies the loading (tail) period.
    pub fn is_loading(&self, serial: u64) -> bool {
        self.holders.back().is_some_and(|h| h.serial == serial)
    }

    /// Uid of the front period, falling back to the uid retained by a
    /// masking [`clear`](Self::clear).
    pub fn front_period_uid(&self) -> Option<Uuid> {
        self.holders
            .front()
            .map(|h| h.info.id.period_uid)
            .or(self.masked_front_period_uid)
    }

    /// True if the queue has room and the timeline has an adjacent period
    /// to load.
    pub fn should_load_next_media_period(&self) -> bool {
        match self.holders.back() {
            None => true,
            Some(loading) => {
                !loading.info.is_final
                    && loading.is_fully_buffered()
                    && loading.info.duration_us != TIME_UNSET
                    && self.holders.len() < MAXIMUM_BUFFER_AHEAD_PERIODS
            }
        }
    }

    /// Computes what the next loading period would be; `None` when the
    /// timeline does not (yet) provide a successor.
    ///
    /// `playing_period_id`, `playing_start_position_us` and
    /// `playing_content_position_us` describe the current playback
    /// position and seed the first period after a reset.
    pub fn get_next_media_period_info(
        &self,
        renderer_position_us: i64,
        playing_period_id: &MediaPeriodId,
        playing_start_position_us: i64,
        playing_content_position_us: i64,
    ) -> Option<MediaPeriodInfo> {
        match self.holders.back() {
            None => self.get_media_period_info(
                playing_period_id.clone(),
                playing_content_position_us,
                playing_start_position_us,
            ),
            Some(loading) => self.get_following_media_period_info(&loading.info, renderer_position_us),
        }
    }

    /// Appends a new holder for `info` at the tail. Precondition:
    /// [`should_load_next_media_period`](Self::should_load_next_media_period).
    /// Returns the holder's serial; the caller starts preparation.
    pub fn enqueue_next_media_period(
        &mut self,
        source: &mut dyn MediaSource,
        allocator: Arc<dyn Allocator>,
        info: MediaPeriodInfo,
    ) -> u64 {
        let renderer_position_offset_us = match self.holders.back() {
            Some(loading) => loading.to_renderer_time(loading.info.duration_us),
            None => info.start_position_us,
        };
        let media_period = source.create_period(&info.id, allocator, info.start_position_us);
        let serial = self.next_serial;
        self.next_serial += 1;
        debug!(
            serial,
            period_uid = %info.id.period_uid,
            is_ad = info.id.is_ad(),
            start_position_us = info.start_position_us,
            "enqueueing media period"
        );
        self.holders.push_back(MediaPeriodHolder::new(
            serial,
            self.renderer_count,
            media_period,
            info,
            renderer_position_offset_us,
        ));
        self.masked_front_period_uid = None;
        serial
    }

    /// Rotates the playing cursor forward. The first call promotes the
    /// front holder to playing; later calls retire the front. Must only be
    /// called when a successor exists and is prepared.
    pub fn advance_playing_period(
        &mut self,
        source: Option<&mut dyn MediaSource>,
    ) -> Option<&MediaPeriodHolder> {
        if !self.has_playing {
            self.has_playing = !self.holders.is_empty();
            self.reading_index = 0;
        } else {
            let front = self.holders.pop_front()?;
            front.release(source);
            self.reading_index = self.reading_index.saturating_sub(1);
            if self.holders.is_empty() {
                self.has_playing = false;
            }
        }
        self.get_playing_period()
    }

    /// Rotates the reading cursor forward. Precondition: a prepared
    /// successor exists.
    pub fn advance_reading_period(&mut self) -> &MediaPeriodHolder {
        debug_assert!(self.reading_index + 1 < self.holders.len());
        self.reading_index += 1;
        &self.holders[self.reading_index]
    }

    /// Releases every holder strictly after `index`. Returns true when the
    /// reading cursor was clipped (renderer streams must be recreated).
    pub fn remove_after(&mut self, index: usize, mut source: Option<&mut dyn MediaSource>) -> bool {
        let reading_removed = self.has_playing && self.reading_index > index;
        while self.holders.len() > index + 1 {
            let holder = self.holders.pop_back().unwrap();
            let reborrowed: Option<&mut dyn MediaSource> = match &mut source {
                Some(s) => Some(&mut **s),
                None => None,
            };
            holder.release(reborrowed);
        }
        if reading_removed {
            self.reading_index = index;
        }
        reading_removed
    }

    /// Releases every holder. `keep_front_period_uid` retains the front
    /// uid for position masking until the queue refills.
    pub fn clear(&mut self, keep_front_period_uid: bool, mut source: Option<&mut dyn MediaSource>) {
        let front_uid = self.holders.front().map(|h| h.info.id.period_uid);
        if keep_front_period_uid {
            self.masked_front_period_uid = front_uid.or(self.masked_front_period_uid);
        } else {
            self.masked_front_period_uid = None;
        }
        while let Some(holder) = self.holders.pop_back() {
            let reborrowed: Option<&mut dyn MediaSource> = match &mut source {
                Some(s) => Some(&mut **s),
                None => None,
            };
            holder.release(reborrowed);
        }
        self.has_playing = false;
        self.reading_index = 0;
    }

    /// Lets the loading period discard buffered-ahead data that no longer
    /// pays off.
    pub fn reevaluate_buffer(&mut self, renderer_position_us: i64) {
        if let Some(loading) = self.holders.back_mut() {
            loading.reevaluate_buffer(renderer_position_us);
        }
    }

    /// Resolves the media period to play at a content position: an ad id
    /// when an unplayed ad group fires at or before `content_position_us`,
    /// otherwise a content id carrying the next upcoming ad group.
    pub fn resolve_media_period_id_for_ads(
        &self,
        period_uid: Uuid,
        content_position_us: i64,
    ) -> MediaPeriodId {
        let Some(period) = self.timeline.period_by_uid(&period_uid) else {
            return MediaPeriodId::for_content(period_uid);
        };
        match period.ads.ad_group_index_for_position(content_position_us) {
            Some(ad_group_index) => {
                let ad_index_in_group = period.ads.groups[ad_group_index].first_ad_index_to_play();
                MediaPeriodId::for_ad(period_uid, ad_group_index, ad_index_in_group)
            }
            None => MediaPeriodId::for_content_before_ad(
                period_uid,
                period.ads.ad_group_index_after_position(content_position_us),
            ),
        }
    }

    /// Recomputes queued period infos against the (possibly new) timeline.
    /// Returns false when an already-read period became incompatible and
    /// the engine must reseek the current position.
    pub fn update_queued_periods(
        &mut self,
        renderer_position_us: i64,
        max_renderer_read_position_us: i64,
        source: Option<&mut dyn MediaSource>,
    ) -> bool {
        let mut previous_info: Option<MediaPeriodInfo> = None;
        let mut index = 0;
        while index < self.holders.len() {
            let old_info = self.holders[index].info.clone();
            let new_info = match &previous_info {
                None => self.get_updated_media_period_info(&old_info),
                Some(previous) => {
                    let Some(computed) =
                        self.get_following_media_period_info(previous, renderer_position_us)
                    else {
                        return !self.remove_after(index - 1, source);
                    };
                    if !Self::can_keep_holder(&old_info, &computed) {
                        return !self.remove_after(index - 1, source);
                    }
                    computed.with_content_position(old_info.content_position_us)
                }
            };
            self.holders[index].info = new_info.clone();

            if old_info.duration_us != new_info.duration_us {
                // The duration changed; anything queued after this holder
                // is stale, and renderers may have read past the new end.
                let holder = &self.holders[index];
                let new_duration_renderer_time = if new_info.duration_us == TIME_UNSET {
                    i64::MAX
                } else {
                    holder.to_renderer_time(new_info.duration_us)
                };
                let is_reading_and_read_beyond = self.has_playing
                    && self.reading_index == index
                    && (max_renderer_read_position_us == TIME_END_OF_SOURCE
                        || max_renderer_read_position_us >= new_duration_renderer_time);
                let reading_removed = self.remove_after(index, source);
                return !reading_removed && !is_reading_and_read_beyond;
            }

            previous_info = Some(new_info);
            index += 1;
        }
        true
    }

    /// Re-derives an info for the current timeline and playback modes,
    /// keeping its identity and positions.
    pub fn get_updated_media_period_info(&self, info: &MediaPeriodInfo) -> MediaPeriodInfo {
        let id = info.id.clone();
        let is_last_in_timeline_period = self.id_is_last_in_period(&id);
        let is_final = self.id_is_final(&id, is_last_in_timeline_period);
        let duration_us = self.duration_for_id(&id);
        MediaPeriodInfo {
            id,
            start_position_us: info.start_position_us,
            content_position_us: info.content_position_us,
            duration_us,
            is_last_in_timeline_period,
            is_final,
        }
    }

    // Info derivation.

    fn get_media_period_info(
        &self,
        id: MediaPeriodId,
        content_position_us: i64,
        start_position_us: i64,
    ) -> Option<MediaPeriodInfo> {
        self.timeline.index_of_period(&id.period_uid)?;
        if id.is_ad() {
            let period = self.timeline.period_by_uid(&id.period_uid)?;
            let ad_group_index = id.ad_group_index.unwrap();
            let ad_index_in_group = id.ad_index_in_group.unwrap();
            if !period.ads.is_ad_available(ad_group_index, ad_index_in_group) {
                return None;
            }
            Some(self.info_for_ad(
                id.period_uid,
                ad_group_index,
                ad_index_in_group,
                content_position_us,
            ))
        } else {
            Some(self.info_for_content(id.period_uid, start_position_us))
        }
    }

    /// The media period that follows `info` in playback order, or `None`
    /// when the timeline has no successor (end of playback, or the
    /// successor is not known yet).
    pub fn get_following_media_period_info(
        &self,
        info: &MediaPeriodInfo,
        _renderer_position_us: i64,
    ) -> Option<MediaPeriodInfo> {
        if info.is_last_in_timeline_period {
            let period_index = self.timeline.index_of_period(&info.id.period_uid)?;
            let next_period_index = self.timeline.next_period_index(
                period_index,
                self.repeat_mode,
                self.shuffle_mode_enabled,
            )?;
            let next_period = self.timeline.period(next_period_index);
            let next_window_index = next_period.window_index;

            let (next_uid, start_position_us) =
                if self.timeline.window(next_window_index).first_period_index == next_period_index {
                    // Starting a new traversal of a window: use its
                    // default position (which may land in a later period).
                    self.timeline
                        .period_position_for_window(next_window_index, TIME_UNSET)?
                } else {
                    (next_period.uid, 0)
                };
            let id = self.resolve_media_period_id_for_ads(next_uid, start_position_us);
            return self.get_media_period_info(id, start_position_us, start_position_us);
        }

        let period = self.timeline.period_by_uid(&info.id.period_uid)?;
        if let (Some(ad_group_index), Some(ad_index_in_group)) =
            (info.id.ad_group_index, info.id.ad_index_in_group)
        {
            // Currently playing an ad: next unplayed ad in the group, or
            // back to content at the suspended position.
            let group = period.ads.groups.get(ad_group_index)?;
            let next_ad_index = group.next_ad_index_to_play(ad_index_in_group + 1);
            if next_ad_index < group.ad_count() {
                if !period.ads.is_ad_available(ad_group_index, next_ad_index) {
                    return None;
                }
                return Some(self.info_for_ad(
                    info.id.period_uid,
                    ad_group_index,
                    next_ad_index,
                    info.content_position_us,
                ));
            }
            return Some(self.info_for_content(info.id.period_uid, info.content_position_us));
        }

        // Content that ends at an ad group: play that group next.
        let ad_group_index = info.id.next_ad_group_index?;
        let group = period.ads.groups.get(ad_group_index)?;
        let ad_index_in_group = group.first_ad_index_to_play();
        if ad_index_in_group >= group.ad_count()
            || !period.ads.is_ad_available(ad_group_index, ad_index_in_group)
        {
            return None;
        }
        Some(self.info_for_ad(
            info.id.period_uid,
            ad_group_index,
            ad_index_in_group,
            group.time_us,
        ))
    }

    fn info_for_ad(
        &self,
        period_uid: Uuid,
        ad_group_index: usize,
        ad_index_in_group: usize,
        content_position_us: i64,
    ) -> MediaPeriodInfo {
        let id = MediaPeriodId::for_ad(period_uid, ad_group_index, ad_index_in_group);
        let duration_us = self
            .timeline
            .period_by_uid(&period_uid)
            .map_or(TIME_UNSET, |p| {
                p.ads.ad_duration_us(ad_group_index, ad_index_in_group)
            });
        MediaPeriodInfo {
            id,
            start_position_us: 0,
            content_position_us,
            duration_us,
            is_last_in_timeline_period: false,
            is_final: false,
        }
    }

    fn info_for_content(&self, period_uid: Uuid, start_position_us: i64) -> MediaPeriodInfo {
        let period = self
            .timeline
            .period_by_uid(&period_uid)
            .expect("content info for a period not in the timeline");
        let next_ad_group_index = period.ads.ad_group_index_after_position(start_position_us);
        let id = MediaPeriodId::for_content_before_ad(period_uid, next_ad_group_index);
        let is_last_in_timeline_period = self.id_is_last_in_period(&id);
        let is_final = self.id_is_final(&id, is_last_in_timeline_period);
        let duration_us = self.duration_for_id(&id);
        MediaPeriodInfo {
            id,
            start_position_us,
            content_position_us: TIME_UNSET,
            duration_us,
            is_last_in_timeline_period,
            is_final,
        }
    }

    /// Whether `id` is the last media period of its timeline period.
    fn id_is_last_in_period(&self, id: &MediaPeriodId) -> bool {
        !id.is_ad() && id.next_ad_group_index.is_none()
    }

    fn id_is_final(&self, id: &MediaPeriodId, is_last_in_timeline_period: bool) -> bool {
        if !is_last_in_timeline_period {
            return false;
        }
        let Some(period_index) = self.timeline.index_of_period(&id.period_uid) else {
            return false;
        };
        let window_index = self.timeline.period(period_index).window_index;
        !self.timeline.window(window_index).is_dynamic
            && self
                .timeline
                .is_last_period(period_index, self.repeat_mode, self.shuffle_mode_enabled)
    }

    fn duration_for_id(&self, id: &MediaPeriodId) -> i64 {
        let Some(period) = self.timeline.period_by_uid(&id.period_uid) else {
            return TIME_UNSET;
        };
        if let (Some(group), Some(index)) = (id.ad_group_index, id.ad_index_in_group) {
            return period.ads.ad_duration_us(group, index);
        }
        match id.next_ad_group_index {
            Some(group) => period
                .ads
                .groups
                .get(group)
                .map_or(period.duration_us, |g| g.time_us),
            None => period.duration_us,
        }
    }

    fn can_keep_holder(old_info: &MediaPeriodInfo, new_info: &MediaPeriodInfo) -> bool {
        old_info.start_position_us == new_info.start_position_us && old_info.id == new_info.id
    }

    /// Walks the queue after a repeat/shuffle change, keeping the longest
    /// prefix that still matches the new playback order. Returns false
    /// when the reading period had to be removed.
    fn update_for_playback_mode_change(&mut self, source: Option<&mut dyn MediaSource>) -> bool {
        if self.holders.is_empty() {
            return true;
        }
        let front_uid = self.holders[0].info.id.period_uid;
        let Some(mut current_period_index) = self.timeline.index_of_period(&front_uid) else {
            return true;
        };

        let mut last_valid = 0;
        loop {
            let next_period_index = self.timeline.next_period_index(
                current_period_index,
                self.repeat_mode,
                self.shuffle_mode_enabled,
            );
            // Skip over holders that stay inside the same timeline period
            // (content-before-ad spans and ads).
            while last_valid + 1 < self.holders.len()
                && !self.holders[last_valid].info.is_last_in_timeline_period
            {
                last_valid += 1;
            }
            let next_holder_index = last_valid + 1;
            let (Some(next_period_index), true) =
                (next_period_index, next_holder_index < self.holders.len())
            else {
                break;
            };
            let next_uid = self.holders[next_holder_index].info.id.period_uid;
            if self.timeline.index_of_period(&next_uid) != Some(next_period_index) {
                break;
            }
            last_valid = next_holder_index;
            current_period_index = next_period_index;
        }

        let reading_removed = self.remove_after(last_valid, source);
        let updated = self.get_updated_media_period_info(&self.holders[last_valid].info.clone());
        self.holders[last_valid].info = updated;
        !reading_removed
    }
}
