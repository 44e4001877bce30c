//! Playback clocks
//!
//! The engine derives its renderer-timebase position from a media clock.
//! By default that is a [`StandaloneMediaClock`] advancing with the wall
//! clock while started, scaled by the playback speed. A renderer that
//! masters its own time (typically the audio renderer, whose position is
//! the amount of audio actually played out) can expose a [`MediaClock`];
//! the [`DefaultMediaClock`] then delegates to it and falls back to the
//! standalone clock, resuming from the last observed position, when that
//! renderer is disabled.

use crate::clock::Clock;
use crate::error::EngineError;
use crate::renderer::Renderer;
use ramp_common::PlaybackParameters;
use std::sync::Arc;
use tracing::debug;

/// A source of media-timebase positions.
pub trait MediaClock {
    /// Current position in microseconds of renderer time.
    fn position_us(&self) -> i64;

    fn playback_parameters(&self) -> PlaybackParameters;

    /// Attempts to apply new parameters; returns the parameters actually
    /// in force (an implementation may not support every speed).
    fn set_playback_parameters(&mut self, parameters: PlaybackParameters) -> PlaybackParameters;
}

/// Media clock driven by a [`Clock`], advancing only while started.
pub struct StandaloneMediaClock {
    clock: Arc<dyn Clock>,
    started: bool,
    base_position_us: i64,
    base_elapsed_ms: i64,
    parameters: PlaybackParameters,
}

impl StandaloneMediaClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            started: false,
            base_position_us: 0,
            base_elapsed_ms: 0,
            parameters: PlaybackParameters::DEFAULT,
        }
    }

    pub fn start(&mut self) {
        if !self.started {
            self.base_elapsed_ms = self.clock.elapsed_realtime_ms();
            self.started = true;
        }
    }

    pub fn stop(&mut self) {
        if self.started {
            self.base_position_us = self.position_us();
            self.started = false;
        }
    }

    /// Jumps the clock to `position_us`, keeping its running state.
    pub fn reset_position(&mut self, position_us: i64) {
        self.base_position_us = position_us;
        self.base_elapsed_ms = self.clock.elapsed_realtime_ms();
    }
}

impl MediaClock for StandaloneMediaClock {
    fn position_us(&self) -> i64 {
        if !self.started {
            return self.base_position_us;
        }
        let elapsed_ms = self.clock.elapsed_realtime_ms() - self.base_elapsed_ms;
        self.base_position_us + self.parameters.media_time_us_for_playout_ms(elapsed_ms)
    }

    fn playback_parameters(&self) -> PlaybackParameters {
        self.parameters
    }

    fn set_playback_parameters(&mut self, parameters: PlaybackParameters) -> PlaybackParameters {
        // Re-anchor first so already-elapsed time keeps the old speed.
        let position_us = self.position_us();
        self.reset_position(position_us);
        self.parameters = parameters;
        parameters
    }
}

/// The engine's composite clock: a standalone clock plus optional
/// delegation to a clock-mastering renderer.
pub struct DefaultMediaClock {
    standalone: StandaloneMediaClock,
    /// Index of the renderer currently mastering the clock, if any.
    renderer_clock_index: Option<usize>,
}

impl DefaultMediaClock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            standalone: StandaloneMediaClock::new(clock),
            renderer_clock_index: None,
        }
    }

    pub fn start(&mut self) {
        self.standalone.start();
    }

    pub fn stop(&mut self) {
        self.standalone.stop();
    }

    pub fn reset_position(&mut self, position_us: i64) {
        self.standalone.reset_position(position_us);
    }

    /// Registers an enabled renderer; if it masters its own clock it
    /// becomes the position source.
    pub fn on_renderer_enabled(
        &mut self,
        index: usize,
        renderer: &mut dyn Renderer,
    ) -> Result<(), EngineError> {
        if renderer.media_clock().is_some() {
            if self.renderer_clock_index.is_some() {
                return Err(EngineError::Unexpected(
                    "multiple renderers expose a media clock".into(),
                ));
            }
            debug!(renderer = index, "media clock now mastered by renderer");
            self.renderer_clock_index = Some(index);
        }
        Ok(())
    }

    /// Unregisters a disabled renderer; the standalone clock resumes from
    /// the renderer clock's last position.
    pub fn on_renderer_disabled(&mut self, index: usize, renderer: &mut dyn Renderer) {
        if self.renderer_clock_index == Some(index) {
            if let Some(renderer_clock) = renderer.media_clock() {
                let position_us = renderer_clock.position_us();
                self.standalone.reset_position(position_us);
            }
            debug!(renderer = index, "media clock back on standalone source");
            self.renderer_clock_index = None;
        }
    }

    /// Reads the current position, keeping the standalone clock in sync
    /// with a mastering renderer clock. Returns the position and, when the
    /// renderer clock changed its parameters, the new parameters the
    /// engine must propagate.
    pub fn sync_and_get_position_us(
        &mut self,
        renderers: &mut [Box<dyn Renderer>],
    ) -> (i64, Option<PlaybackParameters>) {
        let Some(index) = self.renderer_clock_index else {
            return (self.standalone.position_us(), None);
        };
        let Some(renderer_clock) = renderers[index].media_clock() else {
            return (self.standalone.position_us(), None);
        };
        let position_us = renderer_clock.position_us();
        let parameters = renderer_clock.playback_parameters();
        self.standalone.reset_position(position_us);
        if parameters != self.standalone.playback_parameters() {
            self.standalone.set_playback_parameters(parameters);
            (position_us, Some(parameters))
        } else {
            (position_us, None)
        }
    }

    /// Applies new playback parameters, routing through the mastering
    /// renderer clock when one exists. Returns the parameters actually in
    /// force.
    pub fn set_playback_parameters(
        &mut self,
        renderers: &mut [Box<dyn Renderer>],
        parameters: PlaybackParameters,
    ) -> PlaybackParameters {
        let applied = match self.renderer_clock_index {
            Some(index) => match renderers[index].media_clock() {
                Some(renderer_clock) => renderer_clock.set_playback_parameters(parameters),
                None => parameters,
            },
            None => parameters,
        };
        self.standalone.set_playback_parameters(applied);
        applied
    }

    pub fn playback_parameters(&self) -> PlaybackParameters {
        self.standalone.playback_parameters()
    }
}
