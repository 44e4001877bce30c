//! Immutable window/period topology
//!
//! A [`Timeline`] is a finite sequence of *windows* (playlist items), each
//! made of one or more contiguous *periods* (content spans, possibly with
//! an ad schedule). Timelines are immutable and shared by reference
//! (`Arc`); a source that learns something new publishes a whole new
//! timeline.
//!
//! Period identity is a stable opaque [`Uuid`]; everything that survives a
//! timeline swap is re-resolved through period uids, never indices.

use ramp_common::time::{TIME_END_OF_SOURCE, TIME_UNSET};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use ramp_common::RepeatMode;

/// Identifies one playable media period instance: either a content span or
/// a single ad within an ad group.
///
/// Two ids are equal iff all four fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaPeriodId {
    /// Uid of the timeline period this instance belongs to.
    pub period_uid: Uuid,
    /// Ad group within the period, if this id refers to an ad.
    pub ad_group_index: Option<usize>,
    /// Ad within the ad group, if this id refers to an ad.
    pub ad_index_in_group: Option<usize>,
    /// For content ids: the ad group at which this content span ends, if
    /// any.
    pub next_ad_group_index: Option<usize>,
}

impl MediaPeriodId {
    /// Content id playing to the end of the period.
    pub fn for_content(period_uid: Uuid) -> Self {
        Self {
            period_uid,
            ad_group_index: None,
            ad_index_in_group: None,
            next_ad_group_index: None,
        }
    }

    /// Content id whose span ends at the given ad group.
    pub fn for_content_before_ad(period_uid: Uuid, next_ad_group_index: Option<usize>) -> Self {
        Self {
            period_uid,
            ad_group_index: None,
            ad_index_in_group: None,
            next_ad_group_index,
        }
    }

    /// Id of one ad within an ad group.
    pub fn for_ad(period_uid: Uuid, ad_group_index: usize, ad_index_in_group: usize) -> Self {
        Self {
            period_uid,
            ad_group_index: Some(ad_group_index),
            ad_index_in_group: Some(ad_index_in_group),
            next_ad_group_index: None,
        }
    }

    pub fn is_ad(&self) -> bool {
        self.ad_group_index.is_some()
    }
}

/// Play state of a single ad within an ad group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdState {
    /// The ad exists but its media is not yet available.
    Unavailable,
    /// The ad can be played.
    Available,
    /// The ad has been played to completion.
    Played,
    /// The ad was skipped and must not be replayed.
    Skipped,
}

impl AdState {
    fn counts_as_played(self) -> bool {
        matches!(self, AdState::Played | AdState::Skipped)
    }
}

/// One group of ads scheduled at a single content position.
#[derive(Debug, Clone, PartialEq)]
pub struct AdGroup {
    /// Content position the group fires at, in microseconds.
    pub time_us: i64,
    /// Per-ad play states. The group length is the ad count.
    pub states: Vec<AdState>,
    /// Per-ad durations; `TIME_UNSET` when unknown.
    pub durations_us: Vec<i64>,
}

impl AdGroup {
    pub fn new(time_us: i64, durations_us: Vec<i64>) -> Self {
        let states = vec![AdState::Available; durations_us.len()];
        Self {
            time_us,
            states,
            durations_us,
        }
    }

    pub fn ad_count(&self) -> usize {
        self.states.len()
    }

    pub fn has_unplayed_ads(&self) -> bool {
        self.states.iter().any(|s| !s.counts_as_played())
    }

    /// Index of the first ad to play in this group.
    pub fn first_ad_index_to_play(&self) -> usize {
        self.next_ad_index_to_play(0)
    }

    /// Index of the next ad to play at or after `from`, which may be equal
    /// to the ad count when nothing remains.
    pub fn next_ad_index_to_play(&self, from: usize) -> usize {
        let mut index = from;
        while index < self.states.len() && self.states[index].counts_as_played() {
            index += 1;
        }
        index
    }
}

/// Ordered ad-group schedule for one period.
///
/// Groups are kept sorted by `time_us`; play state lives here, on the
/// period, not in the queue.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdPlaybackState {
    pub groups: Vec<AdGroup>,
}

impl AdPlaybackState {
    pub const NONE: AdPlaybackState = AdPlaybackState { groups: Vec::new() };

    pub fn new(mut groups: Vec<AdGroup>) -> Self {
        groups.sort_by_key(|g| g.time_us);
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The last ad group at or before `position_us` that still has
    /// unplayed ads. Lower group index wins ties by construction (sorted
    /// groups, reverse scan).
    pub fn ad_group_index_for_position(&self, position_us: i64) -> Option<usize> {
        if position_us == TIME_UNSET {
            return None;
        }
        (0..self.groups.len()).rev().find(|&index| {
            let group = &self.groups[index];
            group.time_us != TIME_END_OF_SOURCE
                && group.time_us <= position_us
                && group.has_unplayed_ads()
        })
    }

    /// The first ad group strictly after `position_us` that still has
    /// unplayed ads.
    pub fn ad_group_index_after_position(&self, position_us: i64) -> Option<usize> {
        self.groups.iter().position(|group| {
            group.time_us != TIME_END_OF_SOURCE
                && group.time_us > position_us
                && group.has_unplayed_ads()
        })
    }

    pub fn ad_count_in_group(&self, ad_group_index: usize) -> usize {
        self.groups
            .get(ad_group_index)
            .map_or(0, |group| group.ad_count())
    }

    pub fn is_ad_available(&self, ad_group_index: usize, ad_index_in_group: usize) -> bool {
        self.groups
            .get(ad_group_index)
            .and_then(|group| group.states.get(ad_index_in_group))
            .is_some_and(|state| !matches!(state, AdState::Unavailable))
    }

    pub fn ad_duration_us(&self, ad_group_index: usize, ad_index_in_group: usize) -> i64 {
        self.groups
            .get(ad_group_index)
            .and_then(|group| group.durations_us.get(ad_index_in_group))
            .copied()
            .unwrap_or(TIME_UNSET)
    }

    /// Returns a copy with one ad marked as played. Sources publish the
    /// result through a timeline refresh.
    pub fn with_played_ad(&self, ad_group_index: usize, ad_index_in_group: usize) -> Self {
        let mut copy = self.clone();
        if let Some(state) = copy
            .groups
            .get_mut(ad_group_index)
            .and_then(|group| group.states.get_mut(ad_index_in_group))
        {
            *state = AdState::Played;
        }
        copy
    }
}

/// A logical presentation unit: one item in the playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Opaque application tag.
    pub tag: Option<String>,
    /// Whether seeking within the window is supported.
    pub is_seekable: bool,
    /// Whether the window may still grow (live streams).
    pub is_dynamic: bool,
    /// Position playback starts from when no explicit position is given.
    /// For dynamic windows this is the live edge. `TIME_UNSET` means the
    /// window start.
    pub default_position_us: i64,
    /// Total window duration; `TIME_UNSET` when unknown.
    pub duration_us: i64,
    /// Index of the window's first period in the timeline's period list.
    pub first_period_index: usize,
    /// Index of the window's last period (inclusive).
    pub last_period_index: usize,
}

impl Window {
    /// The resolved default start position (window start if unset).
    pub fn resolved_default_position_us(&self) -> i64 {
        if self.default_position_us == TIME_UNSET {
            0
        } else {
            self.default_position_us
        }
    }
}

/// A contiguous content span within a window.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    /// Stable opaque identity.
    pub uid: Uuid,
    /// Index of the owning window.
    pub window_index: usize,
    /// Period duration; `TIME_UNSET` when unknown.
    pub duration_us: i64,
    /// Offset of the period start relative to the window start.
    pub position_in_window_us: i64,
    /// Ad schedule; empty for pure content.
    pub ads: AdPlaybackState,
}

/// Definition of one period handed to [`Timeline::new`].
#[derive(Debug, Clone)]
pub struct PeriodDef {
    pub uid: Uuid,
    pub duration_us: i64,
    pub ads: AdPlaybackState,
}

impl PeriodDef {
    pub fn new(duration_us: i64) -> Self {
        Self {
            uid: Uuid::new_v4(),
            duration_us,
            ads: AdPlaybackState::NONE,
        }
    }

    pub fn with_uid(mut self, uid: Uuid) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_ads(mut self, ads: AdPlaybackState) -> Self {
        self.ads = ads;
        self
    }
}

/// Definition of one window handed to [`Timeline::new`].
#[derive(Debug, Clone)]
pub struct WindowDef {
    pub tag: Option<String>,
    pub is_seekable: bool,
    pub is_dynamic: bool,
    pub default_position_us: i64,
    pub periods: Vec<PeriodDef>,
}

impl WindowDef {
    pub fn new(periods: Vec<PeriodDef>) -> Self {
        Self {
            tag: None,
            is_seekable: true,
            is_dynamic: false,
            default_position_us: TIME_UNSET,
            periods,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn dynamic(mut self, default_position_us: i64) -> Self {
        self.is_dynamic = true;
        self.default_position_us = default_position_us;
        self
    }

    pub fn unseekable(mut self) -> Self {
        self.is_seekable = false;
        self
    }
}

/// Immutable, finite sequence of windows and their periods.
#[derive(Debug)]
pub struct Timeline {
    windows: Vec<Window>,
    periods: Vec<Period>,
    index_by_uid: HashMap<Uuid, usize>,
    /// Playback order of windows under shuffle; always a permutation of
    /// `0..windows.len()`.
    shuffle_order: Vec<usize>,
}

impl Timeline {
    pub fn empty() -> Arc<Timeline> {
        Arc::new(Timeline {
            windows: Vec::new(),
            periods: Vec::new(),
            index_by_uid: HashMap::new(),
            shuffle_order: Vec::new(),
        })
    }

    /// Builds a timeline from window definitions.
    ///
    /// Window durations and period offsets are derived from the period
    /// durations; a window containing a period of unknown duration has
    /// unknown duration itself.
    ///
    /// # Panics
    /// Panics if any window has no periods, or if a period uid repeats.
    pub fn new(window_defs: Vec<WindowDef>) -> Arc<Timeline> {
        let mut windows = Vec::with_capacity(window_defs.len());
        let mut periods = Vec::new();
        let mut index_by_uid = HashMap::new();

        for (window_index, def) in window_defs.into_iter().enumerate() {
            assert!(
                !def.periods.is_empty(),
                "every window must contain at least one period"
            );
            let first_period_index = periods.len();
            let mut offset_us: i64 = 0;
            let mut duration_known = true;
            for period_def in def.periods {
                let previous = index_by_uid.insert(period_def.uid, periods.len());
                assert!(previous.is_none(), "duplicate period uid in timeline");
                periods.push(Period {
                    uid: period_def.uid,
                    window_index,
                    duration_us: period_def.duration_us,
                    position_in_window_us: if duration_known { offset_us } else { TIME_UNSET },
                    ads: period_def.ads,
                });
                if period_def.duration_us == TIME_UNSET {
                    duration_known = false;
                } else if duration_known {
                    offset_us += period_def.duration_us;
                }
            }
            windows.push(Window {
                tag: def.tag,
                is_seekable: def.is_seekable,
                is_dynamic: def.is_dynamic,
                default_position_us: def.default_position_us,
                duration_us: if duration_known { offset_us } else { TIME_UNSET },
                first_period_index,
                last_period_index: periods.len() - 1,
            });
        }

        let shuffle_order = (0..windows.len()).collect();
        Arc::new(Timeline {
            windows,
            periods,
            index_by_uid,
            shuffle_order,
        })
    }

    /// Replaces the shuffle playback order. `order` must be a permutation
    /// of the window indices.
    pub fn with_shuffle_order(self: &Arc<Self>, order: Vec<usize>) -> Arc<Timeline> {
        assert_eq!(order.len(), self.windows.len());
        Arc::new(Timeline {
            windows: self.windows.clone(),
            periods: self.periods.clone(),
            index_by_uid: self.index_by_uid.clone(),
            shuffle_order: order,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    pub fn window(&self, window_index: usize) -> &Window {
        &self.windows[window_index]
    }

    pub fn period(&self, period_index: usize) -> &Period {
        &self.periods[period_index]
    }

    pub fn uid_of_period(&self, period_index: usize) -> Uuid {
        self.periods[period_index].uid
    }

    /// O(1) uid lookup; `None` if the uid is not in this timeline.
    pub fn index_of_period(&self, uid: &Uuid) -> Option<usize> {
        self.index_by_uid.get(uid).copied()
    }

    pub fn period_by_uid(&self, uid: &Uuid) -> Option<&Period> {
        self.index_of_period(uid).map(|index| &self.periods[index])
    }

    /// First window in playback order.
    pub fn first_window_index(&self, shuffle_mode_enabled: bool) -> Option<usize> {
        if self.is_empty() {
            None
        } else if shuffle_mode_enabled {
            self.shuffle_order.first().copied()
        } else {
            Some(0)
        }
    }

    /// Last window in playback order.
    pub fn last_window_index(&self, shuffle_mode_enabled: bool) -> Option<usize> {
        if self.is_empty() {
            None
        } else if shuffle_mode_enabled {
            self.shuffle_order.last().copied()
        } else {
            Some(self.windows.len() - 1)
        }
    }

    /// The window following `window_index` in playback order, honoring
    /// repeat and shuffle. `None` means playback ends after this window.
    pub fn next_window_index(
        &self,
        window_index: usize,
        repeat_mode: RepeatMode,
        shuffle_mode_enabled: bool,
    ) -> Option<usize> {
        if window_index >= self.windows.len() {
            return None;
        }
        match repeat_mode {
            RepeatMode::One => Some(window_index),
            RepeatMode::Off | RepeatMode::All => {
                let next = if shuffle_mode_enabled {
                    let position = self
                        .shuffle_order
                        .iter()
                        .position(|&w| w == window_index)?;
                    self.shuffle_order.get(position + 1).copied()
                } else if window_index + 1 < self.windows.len() {
                    Some(window_index + 1)
                } else {
                    None
                };
                match next {
                    Some(next) => Some(next),
                    None if repeat_mode == RepeatMode::All => {
                        self.first_window_index(shuffle_mode_enabled)
                    }
                    None => None,
                }
            }
        }
    }

    /// The window preceding `window_index` in playback order.
    pub fn previous_window_index(
        &self,
        window_index: usize,
        repeat_mode: RepeatMode,
        shuffle_mode_enabled: bool,
    ) -> Option<usize> {
        if window_index >= self.windows.len() {
            return None;
        }
        match repeat_mode {
            RepeatMode::One => Some(window_index),
            RepeatMode::Off | RepeatMode::All => {
                let previous = if shuffle_mode_enabled {
                    let position = self
                        .shuffle_order
                        .iter()
                        .position(|&w| w == window_index)?;
                    position.checked_sub(1).map(|p| self.shuffle_order[p])
                } else {
                    window_index.checked_sub(1)
                };
                match previous {
                    Some(previous) => Some(previous),
                    None if repeat_mode == RepeatMode::All => {
                        self.last_window_index(shuffle_mode_enabled)
                    }
                    None => None,
                }
            }
        }
    }

    /// The period following `period_index` in playback order, crossing
    /// into the next window when the current one is exhausted.
    pub fn next_period_index(
        &self,
        period_index: usize,
        repeat_mode: RepeatMode,
        shuffle_mode_enabled: bool,
    ) -> Option<usize> {
        let window_index = self.periods.get(period_index)?.window_index;
        if period_index < self.windows[window_index].last_period_index {
            return Some(period_index + 1);
        }
        self.next_window_index(window_index, repeat_mode, shuffle_mode_enabled)
            .map(|next_window| self.windows[next_window].first_period_index)
    }

    /// Whether `period_index` is the final period of the entire timeline
    /// under the given playback order.
    pub fn is_last_period(
        &self,
        period_index: usize,
        repeat_mode: RepeatMode,
        shuffle_mode_enabled: bool,
    ) -> bool {
        self.next_period_index(period_index, repeat_mode, shuffle_mode_enabled)
            .is_none()
    }

    /// Resolves a position within a window to `(period_uid,
    /// period_position_us)`.
    ///
    /// `window_position_us == TIME_UNSET` resolves to the window's default
    /// position. For non-dynamic windows the position is clamped into
    /// `[0, duration]`; positions beyond the live part of a dynamic window
    /// resolve to the live edge (the default position). Returns `None`
    /// when `window_index` is out of bounds.
    pub fn period_position_for_window(
        &self,
        window_index: usize,
        window_position_us: i64,
    ) -> Option<(Uuid, i64)> {
        let window = self.windows.get(window_index)?;
        let mut position_us = if window_position_us == TIME_UNSET {
            window.resolved_default_position_us()
        } else {
            window_position_us
        };
        if window.is_dynamic {
            if window.duration_us != TIME_UNSET && position_us > window.duration_us {
                position_us = window.resolved_default_position_us();
            }
        } else if window.duration_us != TIME_UNSET {
            position_us = position_us.clamp(0, window.duration_us);
        }
        position_us = position_us.max(0);

        // Walk the window's periods to the one containing the position;
        // positions at or past the final period's end land in it.
        let mut period_index = window.first_period_index;
        loop {
            let period = &self.periods[period_index];
            let period_position_us = position_us - period.position_in_window_us;
            if period_index == window.last_period_index
                || period.duration_us == TIME_UNSET
                || period_position_us < period.duration_us
            {
                return Some((period.uid, period_position_us));
            }
            period_index += 1;
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_window_timeline() -> Arc<Timeline> {
        Timeline::new(vec![
            WindowDef::new(vec![PeriodDef::new(3_000_000), PeriodDef::new(2_000_000)]),
            WindowDef::new(vec![PeriodDef::new(10_000_000)]),
        ])
    }

    #[test]
    fn test_empty_timeline() {
        let timeline = Timeline::empty();
        assert!(timeline.is_empty());
        assert_eq!(timeline.window_count(), 0);
        assert_eq!(timeline.first_window_index(false), None);
    }

    #[test]
    fn test_window_geometry() {
        let timeline = two_window_timeline();
        assert_eq!(timeline.window_count(), 2);
        assert_eq!(timeline.period_count(), 3);
        assert_eq!(timeline.window(0).duration_us, 5_000_000);
        assert_eq!(timeline.window(0).first_period_index, 0);
        assert_eq!(timeline.window(0).last_period_index, 1);
        assert_eq!(timeline.period(1).position_in_window_us, 3_000_000);
        assert_eq!(timeline.window(1).first_period_index, 2);
    }

    #[test]
    fn test_uid_lookup() {
        let timeline = two_window_timeline();
        let uid = timeline.uid_of_period(1);
        assert_eq!(timeline.index_of_period(&uid), Some(1));
        assert_eq!(timeline.index_of_period(&Uuid::new_v4()), None);
    }

    #[test]
    fn test_next_period_within_window() {
        let timeline = two_window_timeline();
        assert_eq!(timeline.next_period_index(0, RepeatMode::Off, false), Some(1));
        assert_eq!(timeline.next_period_index(1, RepeatMode::Off, false), Some(2));
        assert_eq!(timeline.next_period_index(2, RepeatMode::Off, false), None);
    }

    #[test]
    fn test_repeat_all_wraps() {
        let timeline = two_window_timeline();
        assert_eq!(timeline.next_period_index(2, RepeatMode::All, false), Some(0));
        assert_eq!(timeline.next_window_index(1, RepeatMode::All, false), Some(0));
        assert_eq!(
            timeline.previous_window_index(0, RepeatMode::All, false),
            Some(1)
        );
    }

    #[test]
    fn test_repeat_one_stays() {
        let timeline = two_window_timeline();
        assert_eq!(timeline.next_window_index(0, RepeatMode::One, false), Some(0));
        // Last period of window 0 repeats into the window's first period.
        assert_eq!(timeline.next_period_index(1, RepeatMode::One, false), Some(0));
    }

    #[test]
    fn test_shuffle_order_navigation() {
        let timeline = two_window_timeline().with_shuffle_order(vec![1, 0]);
        assert_eq!(timeline.first_window_index(true), Some(1));
        assert_eq!(timeline.next_window_index(1, RepeatMode::Off, true), Some(0));
        assert_eq!(timeline.next_window_index(0, RepeatMode::Off, true), None);
        assert_eq!(timeline.next_window_index(0, RepeatMode::All, true), Some(1));
    }

    #[test]
    fn test_period_position_resolution() {
        let timeline = two_window_timeline();
        let (uid, position) = timeline.period_position_for_window(0, 1_000_000).unwrap();
        assert_eq!(uid, timeline.uid_of_period(0));
        assert_eq!(position, 1_000_000);

        // Past the first period boundary lands in the second period.
        let (uid, position) = timeline.period_position_for_window(0, 4_000_000).unwrap();
        assert_eq!(uid, timeline.uid_of_period(1));
        assert_eq!(position, 1_000_000);
    }

    #[test]
    fn test_period_position_clamps_non_dynamic() {
        let timeline = two_window_timeline();
        let (uid, position) = timeline.period_position_for_window(0, 99_000_000).unwrap();
        assert_eq!(uid, timeline.uid_of_period(1));
        assert_eq!(position, 2_000_000); // window duration, in period 1 time

        assert!(timeline.period_position_for_window(7, 0).is_none());
    }

    #[test]
    fn test_period_position_dynamic_resolves_live_edge() {
        let timeline = Timeline::new(vec![
            WindowDef::new(vec![PeriodDef::new(60_000_000)]).dynamic(55_000_000)
        ]);
        let (_, position) = timeline.period_position_for_window(0, TIME_UNSET).unwrap();
        assert_eq!(position, 55_000_000);
        let (_, position) = timeline.period_position_for_window(0, 90_000_000).unwrap();
        assert_eq!(position, 55_000_000);
    }

    #[test]
    fn test_media_period_id_equality() {
        let uid = Uuid::new_v4();
        assert_eq!(
            MediaPeriodId::for_content(uid),
            MediaPeriodId::for_content(uid)
        );
        assert_ne!(
            MediaPeriodId::for_content(uid),
            MediaPeriodId::for_content_before_ad(uid, Some(0))
        );
        let ad = MediaPeriodId::for_ad(uid, 0, 1);
        assert!(ad.is_ad());
        assert!(!MediaPeriodId::for_content(uid).is_ad());
    }

    #[test]
    fn test_ad_group_index_for_position() {
        let ads = AdPlaybackState::new(vec![
            AdGroup::new(4_000_000, vec![1_500_000]),
            AdGroup::new(8_000_000, vec![1_000_000]),
        ]);
        assert_eq!(ads.ad_group_index_for_position(3_999_999), None);
        assert_eq!(ads.ad_group_index_for_position(4_000_000), Some(0));
        assert_eq!(ads.ad_group_index_for_position(9_000_000), Some(1));
        assert_eq!(ads.ad_group_index_for_position(TIME_UNSET), None);

        // A played group no longer resolves.
        let ads = ads.with_played_ad(1, 0);
        assert_eq!(ads.ad_group_index_for_position(9_000_000), Some(0));
    }

    #[test]
    fn test_ad_group_index_after_position() {
        let ads = AdPlaybackState::new(vec![
            AdGroup::new(4_000_000, vec![1_500_000]),
            AdGroup::new(8_000_000, vec![1_000_000]),
        ]);
        assert_eq!(ads.ad_group_index_after_position(0), Some(0));
        // Strictly after: a group exactly at the position is skipped.
        assert_eq!(ads.ad_group_index_after_position(4_000_000), Some(1));
        assert_eq!(ads.ad_group_index_after_position(8_000_000), None);
    }

    #[test]
    fn test_ad_group_next_index_to_play() {
        let mut group = AdGroup::new(0, vec![1_000_000, 1_000_000, 1_000_000]);
        assert_eq!(group.first_ad_index_to_play(), 0);
        group.states[0] = AdState::Played;
        group.states[1] = AdState::Skipped;
        assert_eq!(group.first_ad_index_to_play(), 2);
        assert_eq!(group.next_ad_index_to_play(1), 2);
        group.states[2] = AdState::Played;
        assert!(!group.has_unplayed_ads());
        assert_eq!(group.first_ad_index_to_play(), 3);
    }
}
