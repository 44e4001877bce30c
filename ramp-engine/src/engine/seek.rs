//! Seek resolution and execution

use super::core::{source_ref, EngineInternal, EngineMessage, SeekPosition};
use crate::error::Result;
use crate::timeline::MediaPeriodId;
use crate::track::TrackGroupArray;
use ramp_common::time::{us_to_ms, TIME_UNSET};
use ramp_common::{DiscontinuityReason, PlaybackState};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

enum SeekOutcome {
    /// The source is not ready; the seek was stored for the next refresh.
    Deferred,
    /// No valid position exists; playback ended.
    Ended,
    /// The target rounds to the current position; nothing moved.
    NoOp,
    /// The seek was executed.
    Performed,
}

impl EngineInternal {
    pub(super) fn seek_to_internal(&mut self, seek_position: SeekPosition) -> Result<()> {
        self.playback_info_update.increment_operation_acks(1);
        debug!(
            window = seek_position.window_index,
            position_us = seek_position.window_position_us,
            "seek requested"
        );

        let mut seek_adjusted = false;
        let (period_id, mut period_position_us, content_position_us) =
            match self.resolve_seek_position(&seek_position, true) {
                None => {
                    // The position was valid for the timeline it was
                    // performed into but cannot be resolved (yet); it is
                    // re-resolved on the next source refresh.
                    seek_adjusted = true;
                    let id = self
                        .playback_info
                        .first_period_id(self.shuffle_mode_enabled);
                    (id, TIME_UNSET, TIME_UNSET)
                }
                Some((period_uid, resolved_position_us)) => {
                    let id = self
                        .queue
                        .resolve_media_period_id_for_ads(period_uid, resolved_position_us);
                    if id.is_ad() {
                        seek_adjusted = true;
                        (id, 0, resolved_position_us)
                    } else {
                        // Seeking to the default position counts as
                        // adjusted: the reported position is derived.
                        seek_adjusted = seek_position.window_position_us == TIME_UNSET;
                        (id, resolved_position_us, resolved_position_us)
                    }
                }
            };

        let outcome = if self.media_source.is_none() || self.pending_prepare_count > 0 {
            // Still waiting for a prepared source: store for later.
            self.pending_initial_seek = Some(seek_position);
            SeekOutcome::Deferred
        } else if period_position_us == TIME_UNSET {
            self.set_state(PlaybackState::Ended);
            self.reset_internal(false, false, true, false);
            SeekOutcome::Ended
        } else {
            let mut adjusted_position_us = period_position_us;
            let mut no_op = false;
            if period_id == self.playback_info.period_id {
                if adjusted_position_us != 0 {
                    if let Some(playing) = self.queue.get_playing_period() {
                        if playing.prepared {
                            adjusted_position_us = playing
                                .media_period
                                .adjusted_seek_position_us(adjusted_position_us, self.seek_parameters);
                        }
                    }
                }
                if us_to_ms(adjusted_position_us) == us_to_ms(self.playback_info.position_us) {
                    // Within the same millisecond: report the ack, move
                    // nothing.
                    period_position_us = self.playback_info.position_us;
                    no_op = true;
                }
            }
            if no_op {
                SeekOutcome::NoOp
            } else {
                let seeked_position_us =
                    self.seek_to_period_position_auto(&period_id, adjusted_position_us)?;
                seek_adjusted |= period_position_us != seeked_position_us;
                period_position_us = seeked_position_us;
                SeekOutcome::Performed
            }
        };

        let info = self.playback_info.copy_with_new_position(
            period_id,
            period_position_us,
            content_position_us,
            self.get_total_buffered_duration_us(),
        );
        self.set_playback_info(info);
        if !matches!(outcome, SeekOutcome::NoOp) {
            let reason = if seek_adjusted {
                DiscontinuityReason::SeekAdjustment
            } else {
                DiscontinuityReason::Seek
            };
            self.playback_info_update.set_position_discontinuity(reason);
        }
        Ok(())
    }

    /// Seeks within the existing queue, force-disabling renderers when
    /// they are reading ahead of the playing period.
    pub(super) fn seek_to_period_position_auto(
        &mut self,
        period_id: &MediaPeriodId,
        period_position_us: i64,
    ) -> Result<i64> {
        let force_disable = !self.queue.reading_is_playing();
        self.seek_to_period_position(period_id, period_position_us, force_disable)
    }

    pub(super) fn seek_to_period_position(
        &mut self,
        period_id: &MediaPeriodId,
        period_position_us: i64,
        force_disable_renderers: bool,
    ) -> Result<i64> {
        self.stop_renderers()?;
        self.rebuffering = false;
        self.set_state(PlaybackState::Buffering);

        // Walk the queue forward looking for a prepared holder matching
        // the target; everything before it is retired, everything after
        // it removed. If none matches, the queue is rebuilt.
        let old_playing_serial = self.queue.get_playing_period().map(|h| h.serial);
        let old_streams = self
            .queue
            .get_playing_period()
            .map(|h| h.sample_streams.clone());
        let mut target_serial = None;
        let mut cursor = self
            .queue
            .get_playing_period()
            .map(|h| (h.serial, h.info.id.clone(), h.prepared));
        while let Some((serial, id, prepared)) = cursor {
            if *period_id == id && prepared {
                self.queue.remove_after(0, source_ref(&mut self.media_source));
                target_serial = Some(serial);
                break;
            }
            cursor = self
                .queue
                .advance_playing_period(source_ref(&mut self.media_source))
                .map(|h| (h.serial, h.info.id.clone(), h.prepared));
        }

        // Disable all renderers if the playing period changes, if the seek
        // lands before the renderer timebase origin, or if forced.
        let target_changed = target_serial != old_playing_serial;
        let mut disable_all = force_disable_renderers || target_changed;
        if !disable_all {
            if let Some(playing) = self.queue.get_playing_period() {
                disable_all = playing.to_renderer_time(period_position_us) < 0;
            }
        }
        let mut old_streams = old_streams;
        if disable_all {
            for index in self.enabled_renderers.clone() {
                self.disable_renderer(index)?;
            }
            self.enabled_renderers.clear();
            old_streams = None;
            if let Some(playing) = self.queue.get_playing_period_mut() {
                // Restart the renderer timebase at the period's own time.
                let start_position_us = playing.info.start_position_us;
                playing.set_renderer_position_offset(start_position_us);
            }
        }

        let mut seeked_position_us = period_position_us;
        if target_serial.is_some() {
            let old_serial_for_update = if disable_all { None } else { old_playing_serial };
            self.update_playing_period_renderers(old_serial_for_update, old_streams.as_deref())?;
            let (has_enabled_tracks, discard_to_us) = {
                let playing = self.queue.get_playing_period().unwrap();
                (
                    playing.has_enabled_tracks,
                    period_position_us - self.back_buffer_duration_us,
                )
            };
            if has_enabled_tracks {
                let to_keyframe = self.retain_back_buffer_from_keyframe;
                let playing = self.queue.get_playing_period_mut().unwrap();
                seeked_position_us = playing.media_period.seek_to_us(period_position_us);
                playing
                    .media_period
                    .discard_buffer(discard_to_us, to_keyframe);
            }
            self.reset_renderer_position(seeked_position_us)?;
            self.maybe_continue_loading();
        } else {
            // Nothing in the queue matches: rebuild from scratch while
            // masking the position with the front period uid.
            self.queue.clear(true, source_ref(&mut self.media_source));
            let info = self.playback_info.copy_with_track_info(
                Arc::new(TrackGroupArray::EMPTY),
                Arc::clone(&self.empty_track_selector_result),
            );
            self.set_playback_info(info);
            self.reset_renderer_position(seeked_position_us)?;
        }

        self.handle_loading_media_period_changed(false);
        self.handler.send(EngineMessage::DoSomeWork);
        Ok(seeked_position_us)
    }

    /// Re-seeks to the current playing position, clipping read-ahead.
    /// Used when a repeat/shuffle change invalidates a period a renderer
    /// may already have read from.
    pub(super) fn seek_to_current_position(&mut self, send_discontinuity: bool) -> Result<()> {
        let Some(playing) = self.queue.get_playing_period() else {
            return Ok(());
        };
        let period_id = playing.info.id.clone();
        let new_position_us =
            self.seek_to_period_position(&period_id, self.playback_info.position_us, true)?;
        if new_position_us != self.playback_info.position_us {
            let info = self.playback_info.copy_with_new_position(
                period_id,
                new_position_us,
                self.playback_info.content_position_us,
                self.get_total_buffered_duration_us(),
            );
            self.set_playback_info(info);
            if send_discontinuity {
                self.playback_info_update
                    .set_position_discontinuity(DiscontinuityReason::Internal);
            }
        }
        Ok(())
    }

    /// Resolves a seek position against the engine's timeline, mapping
    /// through the seek's own timeline when they differ. `None` when the
    /// window index is out of bounds or no mapping exists (yet).
    pub(super) fn resolve_seek_position(
        &self,
        seek_position: &SeekPosition,
        try_subsequent_periods: bool,
    ) -> Option<(Uuid, i64)> {
        let timeline = &self.playback_info.timeline;
        if timeline.is_empty() {
            return None;
        }
        // A blind seek with an empty timeline resolves against ours.
        let seek_timeline = if seek_position.timeline.is_empty() {
            Arc::clone(timeline)
        } else {
            Arc::clone(&seek_position.timeline)
        };
        let (period_uid, period_position_us) = seek_timeline.period_position_for_window(
            seek_position.window_index,
            seek_position.window_position_us,
        )?;
        if timeline.index_of_period(&period_uid).is_some() {
            // The mapped period exists in our timeline.
            return Some((period_uid, period_position_us));
        }
        if try_subsequent_periods {
            // Try the first later period of the seek timeline that also
            // exists in ours, restarting its window from the default
            // position.
            if let Some(surviving_uid) =
                self.resolve_subsequent_period(&period_uid, &seek_timeline, timeline)
            {
                let window_index = timeline.period_by_uid(&surviving_uid).unwrap().window_index;
                return timeline.period_position_for_window(window_index, TIME_UNSET);
            }
        }
        None
    }
}
