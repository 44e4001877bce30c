//! The cooperative scheduler tick and the renderer lifecycle
//!
//! One `DoSomeWork` pass advances loading, updates the playback position,
//! gives every enabled renderer a render slice, computes state
//! transitions, and reschedules itself: every 10 ms while playing or
//! buffering, every second while merely enabled, not at all when idle.

use super::core::{
    EngineInternal, EngineMessage, IDLE_INTERVAL_MS, KIND_DO_SOME_WORK,
    PREPARING_SOURCE_INTERVAL_MS, RENDERING_INTERVAL_MS,
};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::renderer::RendererState;
use crate::source::SampleStream;
use ramp_common::time::TIME_UNSET;
use ramp_common::{DiscontinuityReason, PlaybackParameters, PlaybackState};
use std::sync::Arc;
use tracing::debug;

/// Pointer identity of optionally-bound sample streams.
pub(super) fn same_stream(
    a: Option<&Arc<dyn SampleStream>>,
    b: Option<&Arc<dyn SampleStream>>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

impl EngineInternal {
    /// One scheduler tick.
    pub(super) fn do_some_work(&mut self) -> Result<()> {
        let operation_start_ms = self.clock.uptime_ms();
        self.update_periods()?;

        if !self.queue.has_playing_period() {
            // Still waiting for the first period to be prepared.
            self.check_period_prepare_error()?;
            self.schedule_next_work(operation_start_ms, PREPARING_SOURCE_INTERVAL_MS);
            return Ok(());
        }

        self.update_playback_positions()?;
        let elapsed_realtime_us = self.clock.elapsed_realtime_ms() * 1_000;

        // Discard media behind the position, per the back-buffer policy.
        {
            let discard_to_us = self.playback_info.position_us - self.back_buffer_duration_us;
            let to_keyframe = self.retain_back_buffer_from_keyframe;
            let playing = self.queue.get_playing_period_mut().unwrap();
            playing.media_period.discard_buffer(discard_to_us, to_keyframe);
        }

        let mut renderers_ended = true;
        let mut renderers_ready_or_ended = true;
        for index in self.enabled_renderers.clone() {
            {
                let renderer = &mut self.renderers[index];
                renderer
                    .render(self.renderer_position_us, elapsed_realtime_us)
                    .map_err(|e| EngineError::renderer(index, e))?;
            }
            let renderer = &self.renderers[index];
            renderers_ended = renderers_ended && renderer.is_ended();
            // A renderer that finished its current stream and is waiting
            // for the next one counts as ready, so uneven track durations
            // within a period cannot stall the transition.
            let ready_or_ended = renderer.is_ready()
                || renderer.is_ended()
                || self.renderer_waiting_for_next_stream(index);
            if !ready_or_ended {
                renderer.check_stream_error()?;
            }
            renderers_ready_or_ended = renderers_ready_or_ended && ready_or_ended;
        }
        if !renderers_ready_or_ended {
            self.check_period_prepare_error()?;
        }

        let (playing_duration_us, playing_is_final) = {
            let playing = self.queue.get_playing_period().unwrap();
            (playing.info.duration_us, playing.info.is_final)
        };
        let state = self.playback_info.playback_state;
        if renderers_ended
            && (playing_duration_us == TIME_UNSET
                || playing_duration_us <= self.playback_info.position_us)
            && playing_is_final
        {
            self.set_state(PlaybackState::Ended);
            self.stop_renderers()?;
        } else if state == PlaybackState::Buffering
            && self.should_transition_to_ready(renderers_ready_or_ended)
        {
            self.set_state(PlaybackState::Ready);
            if self.play_when_ready {
                self.start_renderers()?;
            }
        } else if state == PlaybackState::Ready
            && !(if self.enabled_renderers.is_empty() {
                self.is_timeline_ready()
            } else {
                renderers_ready_or_ended
            })
        {
            self.rebuffering = self.play_when_ready;
            self.set_state(PlaybackState::Buffering);
            self.stop_renderers()?;
        }

        if self.playback_info.playback_state == PlaybackState::Buffering {
            for index in self.enabled_renderers.clone() {
                self.renderers[index].check_stream_error()?;
            }
        }

        let state = self.playback_info.playback_state;
        if (self.play_when_ready && state == PlaybackState::Ready)
            || state == PlaybackState::Buffering
        {
            self.schedule_next_work(operation_start_ms, RENDERING_INTERVAL_MS);
        } else if !self.enabled_renderers.is_empty() && state != PlaybackState::Ended {
            self.schedule_next_work(operation_start_ms, IDLE_INTERVAL_MS);
        } else {
            self.handler.remove_messages(KIND_DO_SOME_WORK);
        }
        Ok(())
    }

    pub(super) fn schedule_next_work(&self, operation_start_ms: i64, interval_ms: i64) {
        self.handler.remove_messages(KIND_DO_SOME_WORK);
        self.handler
            .send_at(EngineMessage::DoSomeWork, operation_start_ms + interval_ms);
    }

    /// Derives the playback position for this tick: a discontinuity
    /// reported by the playing period wins; otherwise the media clock
    /// advances the renderer position and timed messages are triggered
    /// over the covered span.
    pub(super) fn update_playback_positions(&mut self) -> Result<()> {
        if !self.queue.has_playing_period() {
            return Ok(());
        }

        let discontinuity_us = self
            .queue
            .get_playing_period_mut()
            .unwrap()
            .media_period
            .read_discontinuity();
        if discontinuity_us != TIME_UNSET {
            self.reset_renderer_position(discontinuity_us)?;
            // Only report externally if the position actually moved; a
            // period may report a discontinuity at the current position
            // just to flush renderers.
            if discontinuity_us != self.playback_info.position_us {
                let info = self.playback_info.copy_with_new_position(
                    self.playback_info.period_id.clone(),
                    discontinuity_us,
                    self.playback_info.content_position_us,
                    self.get_total_buffered_duration_us(),
                );
                self.set_playback_info(info);
                self.playback_info_update
                    .set_position_discontinuity(DiscontinuityReason::Internal);
            }
        } else {
            let (position_us, changed_parameters) =
                self.media_clock.sync_and_get_position_us(&mut self.renderers);
            self.renderer_position_us = position_us;
            if let Some(parameters) = changed_parameters {
                self.handler
                    .send(EngineMessage::PlaybackParametersChangedInternal(parameters));
            }
            let period_position_us = self
                .queue
                .get_playing_period()
                .unwrap()
                .to_period_time(position_us);
            self.maybe_trigger_pending_messages(self.playback_info.position_us, period_position_us)?;
            self.playback_info.position_us = period_position_us;
        }

        let loading = self.queue.get_loading_period().unwrap();
        self.playback_info.buffered_position_us = loading.buffered_position_us();
        self.playback_info.total_buffered_duration_us = self.get_total_buffered_duration_us();
        Ok(())
    }

    pub(super) fn start_renderers(&mut self) -> Result<()> {
        self.rebuffering = false;
        self.media_clock.start();
        for index in self.enabled_renderers.clone() {
            self.renderers[index]
                .start()
                .map_err(|e| EngineError::renderer(index, e))?;
        }
        Ok(())
    }

    pub(super) fn stop_renderers(&mut self) -> Result<()> {
        self.media_clock.stop();
        for index in self.enabled_renderers.clone() {
            self.ensure_stopped(index)?;
        }
        Ok(())
    }

    pub(super) fn ensure_stopped(&mut self, index: usize) -> Result<()> {
        if self.renderers[index].state() == RendererState::Started {
            self.renderers[index]
                .stop()
                .map_err(|e| EngineError::renderer(index, e))?;
        }
        Ok(())
    }

    pub(super) fn disable_renderer(&mut self, index: usize) -> Result<()> {
        self.media_clock
            .on_renderer_disabled(index, self.renderers[index].as_mut());
        self.ensure_stopped(index)?;
        self.renderers[index]
            .disable()
            .map_err(|e| EngineError::renderer(index, e))?;
        Ok(())
    }

    /// Jumps the renderer timebase (and every enabled renderer) to the
    /// playing period's rendition of `period_position_us`.
    pub(super) fn reset_renderer_position(&mut self, period_position_us: i64) -> Result<()> {
        self.renderer_position_us = match self.queue.get_playing_period() {
            None => period_position_us,
            Some(playing) => playing.to_renderer_time(period_position_us),
        };
        self.media_clock.reset_position(self.renderer_position_us);
        for index in self.enabled_renderers.clone() {
            self.renderers[index]
                .reset_position(self.renderer_position_us)
                .map_err(|e| EngineError::renderer(index, e))?;
        }
        self.notify_track_selection_discontinuity();
        Ok(())
    }

    fn should_transition_to_ready(&mut self, renderers_ready_or_ended: bool) -> bool {
        if self.enabled_renderers.is_empty() {
            return self.is_timeline_ready();
        }
        if !renderers_ready_or_ended {
            return false;
        }
        if !self.playback_info.is_loading {
            // Not loading: transition rather than get stuck waiting for
            // media nobody is fetching.
            return true;
        }
        let loading = self.queue.get_loading_period().unwrap();
        let buffered_to_end = loading.is_fully_buffered() && loading.info.is_final;
        if buffered_to_end {
            return true;
        }
        let buffered_us = self.get_total_buffered_duration_us();
        let speed = self.media_clock.playback_parameters().speed;
        let rebuffering = self.rebuffering;
        self.load_control
            .should_start_playback(buffered_us, speed, rebuffering)
    }

    /// Whether the playing period can hand over seamlessly: its duration
    /// is unknown, the position is still inside it, or its successor is
    /// ready (prepared content or an ad).
    pub(super) fn is_timeline_ready(&self) -> bool {
        let Some(playing) = self.queue.get_playing_period() else {
            return false;
        };
        let playing_duration_us = playing.info.duration_us;
        if playing_duration_us == TIME_UNSET
            || self.playback_info.position_us < playing_duration_us
        {
            return true;
        }
        match self.queue.holder(1) {
            Some(next) => next.prepared || next.info.id.is_ad(),
            None => false,
        }
    }

    pub(super) fn renderer_waiting_for_next_stream(&self, index: usize) -> bool {
        if self.queue.get_reading_period().is_none() {
            return false;
        }
        let reading_index = self.queue.reading_index();
        match self.queue.holder(reading_index + 1) {
            Some(next) => next.prepared && self.renderers[index].has_read_stream_to_end(),
            None => false,
        }
    }

    /// Propagates changed playback parameters: external event, adaptive
    /// selections, renderer operating rates.
    pub(super) fn handle_playback_parameters(
        &mut self,
        parameters: PlaybackParameters,
    ) -> Result<()> {
        debug!(speed = parameters.speed, pitch = parameters.pitch, "playback parameters changed");
        self.send_event(EngineEvent::PlaybackParametersChanged(parameters));
        for index in 0..self.queue.len() {
            if let Some(holder) = self.queue.holder(index) {
                if let Some(result) = &holder.track_selector_result {
                    for selection in result.selections.iter().flatten() {
                        selection.on_playback_speed(parameters.speed);
                    }
                }
            }
        }
        for index in 0..self.renderers.len() {
            self.renderers[index]
                .set_operating_rate(parameters.speed)
                .map_err(|e| EngineError::renderer(index, e))?;
        }
        Ok(())
    }

    pub(super) fn notify_track_selection_discontinuity(&self) {
        for index in 0..self.queue.len() {
            if let Some(holder) = self.queue.holder(index) {
                if let Some(result) = &holder.track_selector_result {
                    for selection in result.selections.iter().flatten() {
                        selection.on_discontinuity();
                    }
                }
            }
        }
    }

    /// Total buffered media ahead of the playback position, in
    /// microseconds.
    pub(super) fn get_total_buffered_duration_us(&self) -> i64 {
        self.get_total_buffered_duration_from(self.playback_info.buffered_position_us)
    }

    pub(super) fn get_total_buffered_duration_from(
        &self,
        buffered_position_in_loading_period_us: i64,
    ) -> i64 {
        let Some(loading) = self.queue.get_loading_period() else {
            return 0;
        };
        crate::source::buffered_duration_us(
            buffered_position_in_loading_period_us,
            loading.to_period_time(self.renderer_position_us),
        )
    }
}
