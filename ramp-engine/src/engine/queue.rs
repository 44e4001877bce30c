//! Period loading, advancement, and source refresh handling

use super::core::{source_ref, EngineInternal, PeriodCallbacks};
use super::playback::same_stream;
use crate::error::{EngineError, Result};
use crate::renderer::RendererState;
use crate::source::{Manifest, SampleStream};
use crate::timeline::Timeline;
use ramp_common::time::{TIME_END_OF_SOURCE, TIME_UNSET};
use ramp_common::{DiscontinuityReason, PlaybackState};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

impl EngineInternal {
    /// Keeps the queue in step with the timeline: enqueue the next loading
    /// period when there is room, advance the playing period across
    /// boundaries the renderer position has passed, and advance the
    /// reading period once every renderer drained its current stream.
    pub(super) fn update_periods(&mut self) -> Result<()> {
        if self.media_source.is_none() {
            return Ok(());
        }
        if self.pending_prepare_count > 0 {
            // Waiting for the first timeline of a new source.
            return self
                .media_source
                .as_ref()
                .unwrap()
                .check_source_info_refresh_error()
                .map_err(Into::into);
        }

        self.maybe_update_loading_period()?;
        let loading_state = self
            .queue
            .get_loading_period()
            .map(|loading| loading.is_fully_buffered());
        match loading_state {
            None | Some(true) => self.set_is_loading(false),
            Some(false) => {
                if !self.playback_info.is_loading {
                    self.maybe_continue_loading();
                }
            }
        }

        if !self.queue.has_playing_period() {
            return Ok(());
        }

        // Advance the playing period across boundaries already passed.
        let mut advanced_playing_period = false;
        loop {
            if !self.play_when_ready || self.queue.reading_is_playing() {
                break;
            }
            let Some(next_start_renderer_time) = self
                .queue
                .holder(1)
                .map(|next| next.start_position_renderer_time())
            else {
                break;
            };
            if self.renderer_position_us < next_start_renderer_time {
                break;
            }
            if advanced_playing_period {
                // Crossing more than one boundary in a single tick:
                // publish each intermediate snapshot in order.
                self.maybe_notify_playback_info_changed();
            }
            let playing = self.queue.get_playing_period().unwrap();
            let reason = if playing.info.is_last_in_timeline_period {
                DiscontinuityReason::PeriodTransition
            } else {
                DiscontinuityReason::AdInsertion
            };
            let old_serial = playing.serial;
            let old_streams = playing.sample_streams.clone();
            self.queue
                .advance_playing_period(source_ref(&mut self.media_source));
            self.update_playing_period_renderers(Some(old_serial), Some(&old_streams))?;
            let new_info = self.queue.get_playing_period().unwrap().info.clone();
            let info = self.playback_info.copy_with_new_position(
                new_info.id,
                new_info.start_position_us,
                new_info.content_position_us,
                self.get_total_buffered_duration_us(),
            );
            self.set_playback_info(info);
            self.playback_info_update.set_position_discontinuity(reason);
            self.update_playback_positions()?;
            advanced_playing_period = true;
        }

        let reading_is_final = self.queue.get_reading_period().unwrap().info.is_final;
        if reading_is_final {
            // Defer marking streams final until fully consumed, in case a
            // timeline change makes them non-final again.
            let reading_streams = self.queue.get_reading_period().unwrap().sample_streams.clone();
            for (index, stream) in reading_streams.iter().enumerate() {
                if let Some(stream) = stream {
                    let renderer = &mut self.renderers[index];
                    if same_stream(renderer.stream(), Some(stream))
                        && renderer.has_read_stream_to_end()
                    {
                        renderer.set_current_stream_final();
                    }
                }
            }
            return Ok(());
        }

        // Advance the reading period if every renderer is done with it.
        let reading_index = self.queue.reading_index();
        if reading_index + 1 >= self.queue.len() {
            return Ok(());
        }
        let reading_streams = self.queue.get_reading_period().unwrap().sample_streams.clone();
        for (index, stream) in reading_streams.iter().enumerate() {
            let renderer = &self.renderers[index];
            if !same_stream(renderer.stream(), stream.as_ref())
                || (stream.is_some() && !renderer.has_read_stream_to_end())
            {
                // At least one renderer is still reading this period.
                return Ok(());
            }
        }
        if !self.queue.holder(reading_index + 1).unwrap().prepared {
            self.check_period_prepare_error()?;
            return Ok(());
        }

        let old_result = self.queue.get_reading_period().unwrap().track_selector_result();
        self.queue.advance_reading_period();
        let (new_result, new_streams, new_offset_us, initial_discontinuity) = {
            let reading = self.queue.get_reading_period_mut().unwrap();
            let initial_discontinuity = reading.media_period.read_discontinuity() != TIME_UNSET;
            (
                reading.track_selector_result(),
                reading.sample_streams.clone(),
                reading.renderer_offset_us(),
                initial_discontinuity,
            )
        };

        for index in 0..self.renderers.len() {
            if !old_result.is_renderer_enabled(index) {
                // Disabled for the old period; (re)enabled on advance.
                continue;
            }
            if initial_discontinuity {
                // The new period starts with a discontinuity: drain, then
                // disable and re-enable on the period advance.
                self.renderers[index].set_current_stream_final();
                continue;
            }
            if self.renderers[index].is_current_stream_final() {
                continue;
            }
            let new_enabled = new_result.is_renderer_enabled(index);
            let is_no_sample = self.renderer_capabilities[index].is_no_sample();
            let configurations_match =
                new_result.configuration(index) == old_result.configuration(index);
            if new_enabled && configurations_match && !is_no_sample {
                // Seamless handover into the next period's stream.
                let formats = new_result
                    .selection(index)
                    .map(|s| s.formats())
                    .unwrap_or_default();
                self.renderers[index]
                    .replace_stream(&formats, new_streams[index].clone(), new_offset_us)
                    .map_err(|e| EngineError::renderer(index, e))?;
            } else {
                // No continuation for this renderer: play out remaining
                // data, then disable on the period advance.
                self.renderers[index].set_current_stream_final();
            }
        }
        Ok(())
    }

    fn maybe_update_loading_period(&mut self) -> Result<()> {
        self.queue.reevaluate_buffer(self.renderer_position_us);
        if !self.queue.should_load_next_media_period() {
            return Ok(());
        }
        let info = self.queue.get_next_media_period_info(
            self.renderer_position_us,
            &self.playback_info.period_id,
            self.playback_info.start_position_us,
            self.playback_info.content_position_us,
        );
        match info {
            None => self.check_source_refresh_error_deferred()?,
            Some(info) => {
                let allocator = self.load_control.allocator();
                let start_position_us = info.start_position_us;
                let serial = self.queue.enqueue_next_media_period(
                    self.media_source.as_mut().unwrap().as_mut(),
                    allocator,
                    info,
                );
                let callback = Arc::new(PeriodCallbacks {
                    serial,
                    handler: self.handler.clone(),
                });
                self.queue
                    .holder_by_serial_mut(serial)
                    .unwrap()
                    .media_period
                    .prepare(callback, start_position_us);
                self.set_is_loading(true);
                self.handle_loading_media_period_changed(false);
            }
        }
        Ok(())
    }

    pub(super) fn handle_period_prepared(&mut self, serial: u64) -> Result<()> {
        if !self.queue.is_loading(serial) {
            // Stale event from a period no longer loading.
            return Ok(());
        }
        let playback_speed = self.media_clock.playback_parameters().speed;
        let timeline = Arc::clone(self.queue.timeline());
        {
            let loading = self.queue.get_loading_period_mut().unwrap();
            loading.handle_prepared(
                self.track_selector.as_mut(),
                &self.renderer_capabilities,
                playback_speed,
                &timeline,
            );
        }
        let (track_groups, selector_result) = {
            let loading = self.queue.get_loading_period().unwrap();
            (
                loading.media_period.track_groups(),
                loading.track_selector_result(),
            )
        };
        self.load_control.on_tracks_selected(
            &self.renderer_capabilities,
            &track_groups,
            &selector_result.selections,
        );

        if !self.queue.has_playing_period() {
            // This is the first prepared period; start playing it.
            self.queue
                .advance_playing_period(source_ref(&mut self.media_source));
            let start_position_us = self
                .queue
                .get_playing_period()
                .unwrap()
                .info
                .start_position_us;
            self.reset_renderer_position(start_position_us)?;
            self.update_playing_period_renderers(None, None)?;
        }
        self.maybe_continue_loading();
        Ok(())
    }

    pub(super) fn handle_continue_loading_requested(&mut self, serial: u64) {
        if !self.queue.is_loading(serial) {
            return;
        }
        self.queue.reevaluate_buffer(self.renderer_position_us);
        self.maybe_continue_loading();
    }

    pub(super) fn maybe_continue_loading(&mut self) {
        let Some(next_load_position_us) = self
            .queue
            .get_loading_period()
            .map(|loading| loading.next_load_position_us())
        else {
            return;
        };
        if next_load_position_us == TIME_END_OF_SOURCE {
            self.set_is_loading(false);
            return;
        }
        let buffered_duration_us = self.get_total_buffered_duration_from(next_load_position_us);
        let playback_speed = self.media_clock.playback_parameters().speed;
        let continue_loading = self
            .load_control
            .should_continue_loading(buffered_duration_us, playback_speed);
        self.set_is_loading(continue_loading);
        if continue_loading {
            let renderer_position_us = self.renderer_position_us;
            self.queue
                .get_loading_period_mut()
                .unwrap()
                .continue_loading(renderer_position_us);
        }
    }

    /// Source errors are surfaced only once every enabled renderer has
    /// consumed what was already loaded.
    fn check_source_refresh_error_deferred(&self) -> Result<()> {
        if self.queue.get_loading_period().is_some() {
            for &index in &self.enabled_renderers {
                if !self.renderers[index].has_read_stream_to_end() {
                    return Ok(());
                }
            }
        }
        self.media_source
            .as_ref()
            .map_or(Ok(()), |source| source.check_source_info_refresh_error())
            .map_err(Into::into)
    }

    /// Same deferral for the loading period's prepare error.
    pub(super) fn check_period_prepare_error(&self) -> Result<()> {
        let Some(loading) = self.queue.get_loading_period() else {
            return Ok(());
        };
        if loading.prepared {
            return Ok(());
        }
        let loading_is_next_of_reading = match self.queue.get_reading_period() {
            None => true,
            Some(_) => self.queue.reading_index() + 1 == self.queue.len() - 1,
        };
        if !loading_is_next_of_reading {
            return Ok(());
        }
        for &index in &self.enabled_renderers {
            if !self.renderers[index].has_read_stream_to_end() {
                return Ok(());
            }
        }
        loading.media_period.check_prepare_error().map_err(Into::into)
    }

    pub(super) fn handle_source_info_refreshed(
        &mut self,
        generation: u64,
        timeline: Arc<Timeline>,
        manifest: Option<Manifest>,
    ) -> Result<()> {
        if generation != self.source_generation || self.media_source.is_none() {
            // Refresh from a superseded source.
            return Ok(());
        }
        debug!(
            windows = timeline.window_count(),
            periods = timeline.period_count(),
            "source info refreshed"
        );
        self.playback_info_update
            .increment_operation_acks(self.pending_prepare_count);
        self.pending_prepare_count = 0;

        let old_timeline = Arc::clone(&self.playback_info.timeline);
        self.queue.set_timeline(Arc::clone(&timeline));
        let info = self
            .playback_info
            .copy_with_timeline(Arc::clone(&timeline), manifest);
        self.set_playback_info(info);
        self.resolve_pending_message_positions();

        if timeline.is_empty() {
            // Keep buffering against an empty timeline; the position stays
            // masked until a non-empty refresh arrives.
            return Ok(());
        }

        let mut new_period_id = self.playback_info.period_id.clone();
        let old_content_position_us = if new_period_id.is_ad() {
            self.playback_info.content_position_us
        } else {
            self.playback_info.position_us
        };
        let mut new_content_position_us = old_content_position_us;

        if let Some(pending_seek) = self.pending_initial_seek.take() {
            match self.resolve_seek_position(&pending_seek, true) {
                None => {
                    // The stored seek cannot be satisfied in this
                    // timeline.
                    self.handle_source_refresh_ended_playback();
                    return Ok(());
                }
                Some((period_uid, period_position_us)) => {
                    new_content_position_us = period_position_us;
                    new_period_id = self
                        .queue
                        .resolve_media_period_id_for_ads(period_uid, period_position_us);
                    let resolved_window_position_us = period_position_us
                        + timeline
                            .period_by_uid(&period_uid)
                            .map_or(0, |p| p.position_in_window_us);
                    if pending_seek.window_position_us != TIME_UNSET
                        && resolved_window_position_us != pending_seek.window_position_us
                    {
                        self.playback_info_update
                            .set_position_discontinuity(DiscontinuityReason::SeekAdjustment);
                    }
                }
            }
        } else if old_content_position_us == TIME_UNSET {
            // Resolve the unset start position to the default position.
            let window_index = timeline
                .first_window_index(self.shuffle_mode_enabled)
                .unwrap();
            let (period_uid, period_position_us) = timeline
                .period_position_for_window(window_index, TIME_UNSET)
                .unwrap();
            new_period_id = self
                .queue
                .resolve_media_period_id_for_ads(period_uid, period_position_us);
            if !new_period_id.is_ad() {
                // Keep the unset start position if an ad plays first.
                new_content_position_us = period_position_us;
            }
        } else if timeline.index_of_period(&new_period_id.period_uid).is_none() {
            // The playing period vanished; restart from the first
            // surviving subsequent period's window.
            match self.resolve_subsequent_period(
                &new_period_id.period_uid,
                &old_timeline,
                &timeline,
            ) {
                None => {
                    self.handle_source_refresh_ended_playback();
                    return Ok(());
                }
                Some(surviving_uid) => {
                    let window_index =
                        timeline.period_by_uid(&surviving_uid).unwrap().window_index;
                    let (period_uid, period_position_us) = timeline
                        .period_position_for_window(window_index, TIME_UNSET)
                        .unwrap();
                    new_content_position_us = period_position_us;
                    new_period_id = self
                        .queue
                        .resolve_media_period_id_for_ads(period_uid, period_position_us);
                }
            }
        } else {
            // Recheck whether an ad must (still) be played at the current
            // position.
            let resolved = self
                .queue
                .resolve_media_period_id_for_ads(new_period_id.period_uid, new_content_position_us);
            if new_period_id.is_ad() || resolved.is_ad() {
                new_period_id = resolved;
            }
            // Otherwise keep the current id: a changed next-ad-group alone
            // postpones any discontinuity until that position is reached.
        }

        if self.playback_info.period_id == new_period_id
            && old_content_position_us == new_content_position_us
        {
            // Playing period survives; re-validate everything queued after
            // it.
            let max_read_position_us = self.get_max_renderer_read_position_us();
            if !self.queue.update_queued_periods(
                self.renderer_position_us,
                max_read_position_us,
                source_ref(&mut self.media_source),
            ) {
                self.seek_to_current_position(false)?;
            }
        } else {
            // Refresh infos of queued holders that already match the new
            // playing id, then seek to the new position.
            for index in 1..self.queue.len() {
                let holder_info = self.queue.holder(index).unwrap().info.clone();
                if holder_info.id == new_period_id {
                    let updated = self.queue.get_updated_media_period_info(&holder_info);
                    self.queue.holder_mut(index).unwrap().info = updated;
                }
            }
            let target_position_us = if new_period_id.is_ad() {
                0
            } else {
                new_content_position_us
            };
            let seeked_position_us =
                self.seek_to_period_position_auto(&new_period_id, target_position_us)?;
            let info = self.playback_info.copy_with_new_position(
                new_period_id,
                seeked_position_us,
                new_content_position_us,
                self.get_total_buffered_duration_us(),
            );
            self.set_playback_info(info);
        }
        self.handle_loading_media_period_changed(false);
        Ok(())
    }

    pub(super) fn handle_source_refresh_ended_playback(&mut self) {
        self.set_state(PlaybackState::Ended);
        // Keep the source so a later seek can restart playback.
        self.reset_internal(false, false, true, false);
    }

    /// First period after `old_uid` (in the old timeline's playback order)
    /// that also exists in the new timeline.
    pub(super) fn resolve_subsequent_period(
        &self,
        old_uid: &Uuid,
        old_timeline: &Arc<Timeline>,
        new_timeline: &Arc<Timeline>,
    ) -> Option<Uuid> {
        let mut old_index = old_timeline.index_of_period(old_uid)?;
        for _ in 0..old_timeline.period_count() {
            old_index = old_timeline.next_period_index(
                old_index,
                self.repeat_mode,
                self.shuffle_mode_enabled,
            )?;
            let uid = old_timeline.uid_of_period(old_index);
            if new_timeline.index_of_period(&uid).is_some() {
                return Some(uid);
            }
        }
        None
    }

    /// Renderer-timebase position up to which renderers have read the
    /// reading period, or `TIME_END_OF_SOURCE` once one of them consumed
    /// it fully.
    pub(super) fn get_max_renderer_read_position_us(&self) -> i64 {
        let Some(reading) = self.queue.get_reading_period() else {
            return 0;
        };
        let mut max_read_position_us = reading.start_position_renderer_time();
        for (index, renderer) in self.renderers.iter().enumerate() {
            if renderer.state() == RendererState::Disabled
                || !same_stream(renderer.stream(), reading.sample_streams[index].as_ref())
            {
                continue;
            }
            let reading_position_us = renderer.reading_position_us();
            if reading_position_us == TIME_END_OF_SOURCE {
                return TIME_END_OF_SOURCE;
            }
            max_read_position_us = max_read_position_us.max(reading_position_us);
        }
        max_read_position_us
    }

    /// Rebinds renderers after the playing period changed: renderers the
    /// new selection drops (or whose drained stream belonged to the old
    /// period) are disabled, the rest are (re)enabled against the new
    /// period's streams.
    pub(super) fn update_playing_period_renderers(
        &mut self,
        old_playing_serial: Option<u64>,
        old_streams: Option<&[Option<Arc<dyn SampleStream>>]>,
    ) -> Result<()> {
        let Some(playing) = self.queue.get_playing_period() else {
            return Ok(());
        };
        if old_playing_serial == Some(playing.serial) {
            return Ok(());
        }
        let new_result = playing.track_selector_result();
        let track_groups = Arc::new(playing.media_period.track_groups());

        let mut renderer_was_enabled = vec![false; self.renderers.len()];
        for index in 0..self.renderers.len() {
            renderer_was_enabled[index] = self.renderers[index].state() != RendererState::Disabled;
            let old_stream = old_streams.and_then(|streams| streams[index].as_ref());
            if renderer_was_enabled[index]
                && (!new_result.is_renderer_enabled(index)
                    || (self.renderers[index].is_current_stream_final()
                        && same_stream(self.renderers[index].stream(), old_stream)))
            {
                // Not needed for the new period, or its final stream was
                // the old period's and it is not reading ahead: disable
                // (and re-enable below if selected).
                self.disable_renderer(index)?;
            }
        }
        let info = self
            .playback_info
            .copy_with_track_info(track_groups, Arc::clone(&new_result));
        self.set_playback_info(info);
        self.enable_renderers(&renderer_was_enabled)?;
        Ok(())
    }

    pub(super) fn enable_renderers(&mut self, renderer_was_enabled: &[bool]) -> Result<()> {
        self.enabled_renderers.clear();
        let result = self.queue.get_playing_period().unwrap().track_selector_result();
        // Reset disabled renderers first so resources they hold are
        // available to the ones being enabled.
        for index in 0..self.renderers.len() {
            if !result.is_renderer_enabled(index) {
                self.renderers[index].reset();
            }
        }
        for index in 0..self.renderers.len() {
            if result.is_renderer_enabled(index) {
                self.enable_renderer(index, renderer_was_enabled[index])?;
            }
        }
        Ok(())
    }

    fn enable_renderer(&mut self, index: usize, was_enabled: bool) -> Result<()> {
        let (configuration, formats, stream, offset_us) = {
            let playing = self.queue.get_playing_period().unwrap();
            let result = playing.track_selector_result();
            (
                result.configuration(index).unwrap_or_default(),
                result
                    .selection(index)
                    .map(|s| s.formats())
                    .unwrap_or_default(),
                playing.sample_streams[index].clone(),
                playing.renderer_offset_us(),
            )
        };
        self.enabled_renderers.push(index);
        if self.renderers[index].state() == RendererState::Disabled {
            let playing_now = self.play_when_ready
                && self.playback_info.playback_state == PlaybackState::Ready;
            // Joining only when freshly enabled into ongoing playback.
            let joining = !was_enabled && playing_now;
            self.renderers[index]
                .enable(
                    configuration,
                    &formats,
                    stream,
                    self.renderer_position_us,
                    joining,
                    offset_us,
                )
                .map_err(|e| EngineError::renderer(index, e))?;
            self.media_clock
                .on_renderer_enabled(index, self.renderers[index].as_mut())?;
            if playing_now {
                self.renderers[index]
                    .start()
                    .map_err(|e| EngineError::renderer(index, e))?;
            }
        }
        Ok(())
    }

    /// Re-runs track selection front-to-back after an invalidation,
    /// applying the first changed selection it finds.
    pub(super) fn reselect_tracks_internal(&mut self) -> Result<()> {
        if !self.queue.has_playing_period() {
            // No tracks selected yet; nothing to re-select.
            return Ok(());
        }
        let playback_speed = self.media_clock.playback_parameters().speed;
        let timeline = Arc::clone(self.queue.timeline());
        let reading_index = self.queue.reading_index();

        let mut changed_result = None;
        let mut changed_index = 0;
        let mut selections_changed_for_read_period = true;
        for index in 0..self.queue.len() {
            let holder = self.queue.holder_mut(index).unwrap();
            if !holder.prepared {
                break;
            }
            if let Some(new_result) = holder.select_tracks(
                self.track_selector.as_mut(),
                &self.renderer_capabilities,
                playback_speed,
                &timeline,
            ) {
                changed_result = Some(new_result);
                changed_index = index;
                break;
            }
            if index == reading_index {
                // Nothing read so far is affected by the reselection.
                selections_changed_for_read_period = false;
            }
        }
        let Some(new_result) = changed_result else {
            return Ok(());
        };

        if selections_changed_for_read_period {
            // The playing period's selection changed: recreate streams
            // (dropping read-ahead) and rebuffer.
            let recreate_streams = self.queue.remove_after(0, source_ref(&mut self.media_source));
            let (adjusted_position_us, stream_reset_flags) = {
                let position_us = self.playback_info.position_us;
                let playing = self.queue.get_playing_period_mut().unwrap();
                playing.apply_track_selection_with_flags(
                    new_result,
                    self.track_selector.as_mut(),
                    &self.renderer_capabilities,
                    position_us,
                    recreate_streams,
                )
            };
            if self.playback_info.playback_state != PlaybackState::Ended
                && adjusted_position_us != self.playback_info.position_us
            {
                let info = self.playback_info.copy_with_new_position(
                    self.playback_info.period_id.clone(),
                    adjusted_position_us,
                    self.playback_info.content_position_us,
                    self.get_total_buffered_duration_us(),
                );
                self.set_playback_info(info);
                self.playback_info_update
                    .set_position_discontinuity(DiscontinuityReason::Internal);
                self.reset_renderer_position(adjusted_position_us)?;
            }

            let playing_streams = self.queue.get_playing_period().unwrap().sample_streams.clone();
            let mut renderer_was_enabled = vec![false; self.renderers.len()];
            for index in 0..self.renderers.len() {
                renderer_was_enabled[index] =
                    self.renderers[index].state() != RendererState::Disabled;
                if renderer_was_enabled[index] {
                    if !same_stream(
                        self.renderers[index].stream(),
                        playing_streams[index].as_ref(),
                    ) {
                        self.disable_renderer(index)?;
                    } else if stream_reset_flags[index] {
                        self.renderers[index]
                            .reset_position(self.renderer_position_us)
                            .map_err(|e| EngineError::renderer(index, e))?;
                    }
                }
            }
            let (track_groups, result) = {
                let playing = self.queue.get_playing_period().unwrap();
                (
                    Arc::new(playing.media_period.track_groups()),
                    playing.track_selector_result(),
                )
            };
            let info = self.playback_info.copy_with_track_info(track_groups, result);
            self.set_playback_info(info);
            self.enable_renderers(&renderer_was_enabled)?;
        } else {
            // A period nobody read from yet changed: rebuild from there.
            self.queue
                .remove_after(changed_index, source_ref(&mut self.media_source));
            let renderer_position_us = self.renderer_position_us;
            if let Some(holder) = self.queue.holder_mut(changed_index) {
                if holder.prepared {
                    let loading_position_us = holder
                        .info
                        .start_position_us
                        .max(holder.to_period_time(renderer_position_us));
                    holder.apply_track_selection(
                        new_result,
                        self.track_selector.as_mut(),
                        &self.renderer_capabilities,
                        loading_position_us,
                        false,
                    );
                }
            }
        }
        self.handle_loading_media_period_changed(true);
        if self.playback_info.playback_state != PlaybackState::Ended {
            self.maybe_continue_loading();
            self.update_playback_positions()?;
            self.handler.send(super::core::EngineMessage::DoSomeWork);
        }
        Ok(())
    }

    /// Publishes changes to the loading period id and refreshes buffered
    /// positions (and the load control's view of the loading selection).
    pub(super) fn handle_loading_media_period_changed(
        &mut self,
        loading_track_selection_changed: bool,
    ) {
        let loading_id = self
            .queue
            .get_loading_period()
            .map(|loading| loading.info.id.clone())
            .unwrap_or_else(|| self.playback_info.period_id.clone());
        let loading_changed = self.playback_info.loading_period_id != loading_id;
        if loading_changed {
            let info = self.playback_info.copy_with_loading_period_id(loading_id);
            self.set_playback_info(info);
        }
        self.playback_info.buffered_position_us = match self.queue.get_loading_period() {
            Some(loading) => loading.buffered_position_us(),
            None => self.playback_info.position_us,
        };
        self.playback_info.total_buffered_duration_us = self.get_total_buffered_duration_us();
        if loading_changed || loading_track_selection_changed {
            let prepared_selection = self
                .queue
                .get_loading_period()
                .filter(|loading| loading.prepared)
                .map(|loading| {
                    (
                        loading.media_period.track_groups(),
                        loading.track_selector_result(),
                    )
                });
            if let Some((track_groups, result)) = prepared_selection {
                self.load_control.on_tracks_selected(
                    &self.renderer_capabilities,
                    &track_groups,
                    &result.selections,
                );
            }
        }
    }
}
