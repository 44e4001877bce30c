//! Engine core: command handle, worker state, dispatch, error policy

use crate::clock::Clock;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::handler::{self, Handler, HandlerMessage, MessageLoop, TaskExecutor};
use crate::media_clock::DefaultMediaClock;
use crate::message::{PendingMessageInfo, PlayerMessage};
use crate::playback_info::{PlaybackInfo, PlaybackInfoUpdate, SharedPosition};
use crate::queue::MediaPeriodQueue;
use crate::renderer::{Renderer, RendererCapabilities};
use crate::source::{
    LoadControl, Manifest, MediaPeriodCallback, MediaSource, MediaSourceCallback,
};
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{
    BandwidthMeter, SelectorInvalidationHandle, TrackGroupArray, TrackSelector,
    TrackSelectorResult,
};
use ramp_common::time::TIME_UNSET;
use ramp_common::{PlaybackParameters, PlaybackState, RepeatMode, SeekParameters};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub(super) const PREPARING_SOURCE_INTERVAL_MS: i64 = 10;
pub(super) const RENDERING_INTERVAL_MS: i64 = 10;
pub(super) const IDLE_INTERVAL_MS: i64 = 1000;

// Message kinds, used for best-effort removal of pending messages.
pub(super) const KIND_PREPARE: u32 = 0;
pub(super) const KIND_SET_PLAY_WHEN_READY: u32 = 1;
pub(super) const KIND_SET_REPEAT_MODE: u32 = 2;
pub(super) const KIND_SET_SHUFFLE_ENABLED: u32 = 3;
pub(super) const KIND_DO_SOME_WORK: u32 = 4;
pub(super) const KIND_SEEK_TO: u32 = 5;
pub(super) const KIND_SET_PLAYBACK_PARAMETERS: u32 = 6;
pub(super) const KIND_SET_SEEK_PARAMETERS: u32 = 7;
pub(super) const KIND_SET_FOREGROUND_MODE: u32 = 8;
pub(super) const KIND_STOP: u32 = 9;
pub(super) const KIND_PERIOD_PREPARED: u32 = 10;
pub(super) const KIND_SOURCE_INFO_REFRESHED: u32 = 11;
pub(super) const KIND_CONTINUE_LOADING_REQUESTED: u32 = 12;
pub(super) const KIND_TRACK_SELECTION_INVALIDATED: u32 = 13;
pub(super) const KIND_PLAYBACK_PARAMETERS_CHANGED: u32 = 14;
pub(super) const KIND_SEND_MESSAGE: u32 = 15;
pub(super) const KIND_SEND_MESSAGE_TO_TARGET: u32 = 16;
pub(super) const KIND_RELEASE: u32 = 17;

/// A seek request: a position within a window of some timeline (possibly
/// empty, meaning "resolve against the engine's current timeline").
#[derive(Debug, Clone)]
pub struct SeekPosition {
    pub timeline: Arc<Timeline>,
    pub window_index: usize,
    pub window_position_us: i64,
}

/// Typed messages consumed by the playback worker.
pub(super) enum EngineMessage {
    Prepare {
        source: Box<dyn MediaSource>,
        reset_position: bool,
        reset_state: bool,
    },
    SetPlayWhenReady(bool),
    SetRepeatMode(RepeatMode),
    SetShuffleEnabled(bool),
    DoSomeWork,
    SeekTo(SeekPosition),
    SetPlaybackParameters(PlaybackParameters),
    SetSeekParameters(SeekParameters),
    SetForegroundMode {
        foreground: bool,
    },
    Stop {
        reset: bool,
    },
    PeriodPrepared {
        serial: u64,
    },
    SourceInfoRefreshed {
        generation: u64,
        timeline: Arc<Timeline>,
        manifest: Option<Manifest>,
    },
    ContinueLoadingRequested {
        serial: u64,
    },
    TrackSelectionInvalidated,
    PlaybackParametersChangedInternal(PlaybackParameters),
    SendMessage(PlayerMessage),
    SendMessageToTarget(PlayerMessage),
    Release,
}

impl HandlerMessage for EngineMessage {
    fn kind(&self) -> u32 {
        match self {
            EngineMessage::Prepare { .. } => KIND_PREPARE,
            EngineMessage::SetPlayWhenReady(_) => KIND_SET_PLAY_WHEN_READY,
            EngineMessage::SetRepeatMode(_) => KIND_SET_REPEAT_MODE,
            EngineMessage::SetShuffleEnabled(_) => KIND_SET_SHUFFLE_ENABLED,
            EngineMessage::DoSomeWork => KIND_DO_SOME_WORK,
            EngineMessage::SeekTo(_) => KIND_SEEK_TO,
            EngineMessage::SetPlaybackParameters(_) => KIND_SET_PLAYBACK_PARAMETERS,
            EngineMessage::SetSeekParameters(_) => KIND_SET_SEEK_PARAMETERS,
            EngineMessage::SetForegroundMode { .. } => KIND_SET_FOREGROUND_MODE,
            EngineMessage::Stop { .. } => KIND_STOP,
            EngineMessage::PeriodPrepared { .. } => KIND_PERIOD_PREPARED,
            EngineMessage::SourceInfoRefreshed { .. } => KIND_SOURCE_INFO_REFRESHED,
            EngineMessage::ContinueLoadingRequested { .. } => KIND_CONTINUE_LOADING_REQUESTED,
            EngineMessage::TrackSelectionInvalidated => KIND_TRACK_SELECTION_INVALIDATED,
            EngineMessage::PlaybackParametersChangedInternal(_) => KIND_PLAYBACK_PARAMETERS_CHANGED,
            EngineMessage::SendMessage(_) => KIND_SEND_MESSAGE,
            EngineMessage::SendMessageToTarget(_) => KIND_SEND_MESSAGE_TO_TARGET,
            EngineMessage::Release => KIND_RELEASE,
        }
    }
}

/// Marshals media source callbacks onto the worker, tagged with the source
/// generation so refreshes from a superseded source are dropped.
struct SourceCallbacks {
    generation: u64,
    handler: Handler<EngineMessage>,
}

impl MediaSourceCallback for SourceCallbacks {
    fn on_source_info_refreshed(&self, timeline: Arc<Timeline>, manifest: Option<Manifest>) {
        self.handler.send(EngineMessage::SourceInfoRefreshed {
            generation: self.generation,
            timeline,
            manifest,
        });
    }
}

/// Marshals media period callbacks onto the worker, tagged with the
/// holder serial so stale events are dropped.
pub(super) struct PeriodCallbacks {
    pub(super) serial: u64,
    pub(super) handler: Handler<EngineMessage>,
}

impl MediaPeriodCallback for PeriodCallbacks {
    fn on_prepared(&self) {
        self.handler.send(EngineMessage::PeriodPrepared {
            serial: self.serial,
        });
    }

    fn on_continue_loading_requested(&self) {
        self.handler.send(EngineMessage::ContinueLoadingRequested {
            serial: self.serial,
        });
    }
}

#[derive(Default)]
pub(super) struct SyncState {
    pub(super) released: bool,
    pub(super) foreground_acks: u64,
}

/// Shared caller/worker rendezvous for the two blocking commands
/// (background mode and release).
pub(super) struct EngineSync {
    pub(super) state: Mutex<SyncState>,
    pub(super) signal: Condvar,
}

/// The playback engine's public handle.
///
/// All commands are marshalled as typed messages to a dedicated worker
/// thread; events come back on the channel supplied at construction.
/// Dropping the handle releases the engine.
pub struct PlaybackEngine {
    handler: Handler<EngineMessage>,
    worker: Option<JoinHandle<()>>,
    sync: Arc<EngineSync>,
    shared_position: Arc<SharedPosition>,
}

impl PlaybackEngine {
    /// Creates the engine and starts its worker thread.
    ///
    /// `renderers` are owned by the engine from here on; `event_tx` is the
    /// external event channel.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        renderers: Vec<Box<dyn Renderer>>,
        track_selector: Box<dyn TrackSelector>,
        load_control: Box<dyn LoadControl>,
        bandwidth_meter: Arc<dyn BandwidthMeter>,
        play_when_ready: bool,
        repeat_mode: RepeatMode,
        shuffle_mode_enabled: bool,
        event_tx: mpsc::Sender<EngineEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (handler, message_loop) = handler::message_loop::<EngineMessage>("playback", clock.clone());
        let shared_position = SharedPosition::new();
        let sync = Arc::new(EngineSync {
            state: Mutex::new(SyncState::default()),
            signal: Condvar::new(),
        });

        let worker = {
            let handler = handler.clone();
            let shared_position = Arc::clone(&shared_position);
            let sync = Arc::clone(&sync);
            thread::Builder::new()
                .name("ramp:playback".into())
                .spawn(move || {
                    let internal = EngineInternal::new(
                        renderers,
                        track_selector,
                        load_control,
                        bandwidth_meter,
                        play_when_ready,
                        repeat_mode,
                        shuffle_mode_enabled,
                        event_tx,
                        clock,
                        handler,
                        shared_position,
                        sync,
                    );
                    run_worker(internal, message_loop);
                })
                .expect("failed to spawn playback worker")
        };
        info!("playback engine started");

        Self {
            handler,
            worker: Some(worker),
            sync,
            shared_position,
        }
    }

    /// Begins a new playback session with `source`.
    pub fn prepare(&self, source: Box<dyn MediaSource>, reset_position: bool, reset_state: bool) {
        self.handler.send(EngineMessage::Prepare {
            source,
            reset_position,
            reset_state,
        });
    }

    pub fn set_play_when_ready(&self, play_when_ready: bool) {
        self.handler
            .send(EngineMessage::SetPlayWhenReady(play_when_ready));
    }

    pub fn set_repeat_mode(&self, repeat_mode: RepeatMode) {
        self.handler.send(EngineMessage::SetRepeatMode(repeat_mode));
    }

    pub fn set_shuffle_mode_enabled(&self, shuffle_mode_enabled: bool) {
        self.handler
            .send(EngineMessage::SetShuffleEnabled(shuffle_mode_enabled));
    }

    /// Seeks to `position_us` within a window. `timeline` is the timeline
    /// the caller resolved the position against; pass an empty timeline to
    /// resolve against the engine's current one.
    pub fn seek_to(&self, timeline: Arc<Timeline>, window_index: usize, position_us: i64) {
        self.handler.send(EngineMessage::SeekTo(SeekPosition {
            timeline,
            window_index,
            window_position_us: position_us,
        }));
    }

    pub fn set_playback_parameters(&self, parameters: PlaybackParameters) {
        self.handler
            .send(EngineMessage::SetPlaybackParameters(parameters));
    }

    pub fn set_seek_parameters(&self, seek_parameters: SeekParameters) {
        self.handler
            .send(EngineMessage::SetSeekParameters(seek_parameters));
    }

    /// Switches foreground mode. Turning it off blocks until the worker
    /// has reset idle renderers, so heavyweight resources are released
    /// before this returns.
    pub fn set_foreground_mode(&self, foreground_mode: bool) {
        if foreground_mode {
            self.handler
                .send(EngineMessage::SetForegroundMode { foreground: true });
            return;
        }
        let observed = {
            let state = self.sync.state.lock().unwrap();
            state.foreground_acks
        };
        self.handler
            .send(EngineMessage::SetForegroundMode { foreground: false });
        let mut state = self.sync.state.lock().unwrap();
        while state.foreground_acks <= observed && !state.released {
            state = self.sync.signal.wait(state).unwrap();
        }
    }

    pub fn stop(&self, reset: bool) {
        self.handler.send(EngineMessage::Stop { reset });
    }

    /// Schedules a timed message. A message sent after release is
    /// immediately acknowledged as not delivered.
    pub fn send_message(&self, message: PlayerMessage) {
        if self.sync.state.lock().unwrap().released {
            warn!("ignoring player message sent after release");
            message.mark_as_processed(false);
            return;
        }
        if !self.handler.send(EngineMessage::SendMessage(message.clone())) {
            message.mark_as_processed(false);
        }
    }

    /// Terminates the worker, releasing every renderer and the source.
    /// Blocks until teardown completed. Idempotent.
    pub fn release(&mut self) {
        {
            let mut state = self.sync.state.lock().unwrap();
            if !state.released {
                self.handler.send(EngineMessage::Release);
                while !state.released {
                    state = self.sync.signal.wait(state).unwrap();
                }
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("playback worker panicked during release");
            }
        }
    }

    /// Lock-free view of the position triple, readable from any thread.
    pub fn shared_position(&self) -> Arc<SharedPosition> {
        Arc::clone(&self.shared_position)
    }

    /// Executor that delivers closures on the playback worker; timed
    /// messages built without an explicit executor are delivered there.
    pub fn playback_executor(&self) -> Arc<dyn TaskExecutor> {
        Arc::new(self.handler.clone())
    }

    /// Blocks until every command issued before this call has been
    /// processed by the worker. Diagnostic aid, also used by tests to make
    /// virtual-clock stepping deterministic.
    pub fn blocking_sync(&self) {
        let barrier = Arc::new((Mutex::new(false), Condvar::new()));
        let posted = {
            let barrier = Arc::clone(&barrier);
            self.handler.post(move || {
                let (done, signal) = &*barrier;
                *done.lock().unwrap() = true;
                signal.notify_all();
            })
        };
        if !posted {
            return;
        }
        let (done, signal) = &*barrier;
        let mut done = done.lock().unwrap();
        while !*done {
            done = signal.wait(done).unwrap();
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_worker(mut internal: EngineInternal, mut message_loop: MessageLoop<EngineMessage>) {
    while let Some(message) = message_loop.next() {
        if matches!(message, EngineMessage::Release) {
            internal.release_internal();
            break;
        }
        if let Err(playback_error) = internal.handle_message(message) {
            error!("playback error: {playback_error}");
            internal.send_event(EngineEvent::PlaybackError(playback_error.clone()));
            internal.stop_internal(playback_error.requires_renderer_reset(), false, false);
        }
        internal.maybe_notify_playback_info_changed();
    }
    debug!("playback worker exited");
}

/// All engine state; lives on the worker thread and is touched by it
/// exclusively.
pub(super) struct EngineInternal {
    pub(super) renderers: Vec<Box<dyn Renderer>>,
    pub(super) renderer_capabilities: Vec<RendererCapabilities>,
    pub(super) track_selector: Box<dyn TrackSelector>,
    pub(super) empty_track_selector_result: Arc<TrackSelectorResult>,
    pub(super) load_control: Box<dyn LoadControl>,
    pub(super) bandwidth_meter: Arc<dyn BandwidthMeter>,
    pub(super) back_buffer_duration_us: i64,
    pub(super) retain_back_buffer_from_keyframe: bool,
    pub(super) event_tx: mpsc::Sender<EngineEvent>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) handler: Handler<EngineMessage>,
    pub(super) media_clock: DefaultMediaClock,
    pub(super) queue: MediaPeriodQueue,
    pub(super) playback_info: PlaybackInfo,
    pub(super) playback_info_update: PlaybackInfoUpdate,
    pub(super) shared_position: Arc<SharedPosition>,
    pub(super) sync: Arc<EngineSync>,
    pub(super) media_source: Option<Box<dyn MediaSource>>,
    pub(super) source_generation: u64,
    /// Indices of currently enabled renderers, in renderer order.
    pub(super) enabled_renderers: Vec<usize>,
    pub(super) play_when_ready: bool,
    pub(super) rebuffering: bool,
    pub(super) repeat_mode: RepeatMode,
    pub(super) shuffle_mode_enabled: bool,
    pub(super) foreground_mode: bool,
    pub(super) seek_parameters: SeekParameters,
    pub(super) pending_prepare_count: u32,
    pub(super) pending_initial_seek: Option<SeekPosition>,
    pub(super) renderer_position_us: i64,
    pub(super) pending_messages: Vec<PendingMessageInfo>,
    pub(super) next_pending_message_index: usize,
}

impl EngineInternal {
    #[allow(clippy::too_many_arguments)]
    fn new(
        mut renderers: Vec<Box<dyn Renderer>>,
        mut track_selector: Box<dyn TrackSelector>,
        load_control: Box<dyn LoadControl>,
        bandwidth_meter: Arc<dyn BandwidthMeter>,
        play_when_ready: bool,
        repeat_mode: RepeatMode,
        shuffle_mode_enabled: bool,
        event_tx: mpsc::Sender<EngineEvent>,
        clock: Arc<dyn Clock>,
        handler: Handler<EngineMessage>,
        shared_position: Arc<SharedPosition>,
        sync: Arc<EngineSync>,
    ) -> Self {
        let renderer_capabilities: Vec<RendererCapabilities> = renderers
            .iter_mut()
            .enumerate()
            .map(|(index, renderer)| {
                renderer.set_index(index);
                renderer.capabilities()
            })
            .collect();
        let empty_track_selector_result = Arc::new(TrackSelectorResult::empty(renderers.len()));

        {
            let invalidation_handler = handler.clone();
            track_selector.init(
                SelectorInvalidationHandle::new(Arc::new(move || {
                    invalidation_handler.send(EngineMessage::TrackSelectionInvalidated);
                })),
                Arc::clone(&bandwidth_meter),
            );
        }

        let back_buffer_duration_us = load_control.back_buffer_duration_us();
        let retain_back_buffer_from_keyframe = load_control.retain_back_buffer_from_keyframe();
        let playback_info =
            PlaybackInfo::masked(TIME_UNSET, Arc::clone(&empty_track_selector_result));
        let queue = MediaPeriodQueue::new(renderers.len());
        let media_clock = DefaultMediaClock::new(clock.clone());

        Self {
            renderer_capabilities,
            renderers,
            track_selector,
            empty_track_selector_result,
            load_control,
            bandwidth_meter,
            back_buffer_duration_us,
            retain_back_buffer_from_keyframe,
            event_tx,
            clock,
            handler,
            media_clock,
            queue,
            playback_info,
            playback_info_update: PlaybackInfoUpdate::new(),
            shared_position,
            sync,
            media_source: None,
            source_generation: 0,
            enabled_renderers: Vec::new(),
            play_when_ready,
            rebuffering: false,
            repeat_mode,
            shuffle_mode_enabled,
            foreground_mode: true,
            seek_parameters: SeekParameters::default(),
            pending_prepare_count: 0,
            pending_initial_seek: None,
            renderer_position_us: 0,
            pending_messages: Vec::new(),
            next_pending_message_index: 0,
        }
    }

    fn handle_message(&mut self, message: EngineMessage) -> Result<()> {
        match message {
            EngineMessage::Prepare {
                source,
                reset_position,
                reset_state,
            } => self.prepare_internal(source, reset_position, reset_state),
            EngineMessage::SetPlayWhenReady(play_when_ready) => {
                self.set_play_when_ready_internal(play_when_ready)
            }
            EngineMessage::SetRepeatMode(repeat_mode) => self.set_repeat_mode_internal(repeat_mode),
            EngineMessage::SetShuffleEnabled(enabled) => {
                self.set_shuffle_mode_enabled_internal(enabled)
            }
            EngineMessage::DoSomeWork => self.do_some_work(),
            EngineMessage::SeekTo(seek_position) => self.seek_to_internal(seek_position),
            EngineMessage::SetPlaybackParameters(parameters) => {
                self.set_playback_parameters_internal(parameters)
            }
            EngineMessage::SetSeekParameters(seek_parameters) => {
                self.seek_parameters = seek_parameters;
                Ok(())
            }
            EngineMessage::SetForegroundMode { foreground } => {
                self.set_foreground_mode_internal(foreground);
                Ok(())
            }
            EngineMessage::Stop { reset } => {
                self.stop_internal(false, reset, true);
                Ok(())
            }
            EngineMessage::PeriodPrepared { serial } => self.handle_period_prepared(serial),
            EngineMessage::SourceInfoRefreshed {
                generation,
                timeline,
                manifest,
            } => self.handle_source_info_refreshed(generation, timeline, manifest),
            EngineMessage::ContinueLoadingRequested { serial } => {
                self.handle_continue_loading_requested(serial);
                Ok(())
            }
            EngineMessage::TrackSelectionInvalidated => self.reselect_tracks_internal(),
            EngineMessage::PlaybackParametersChangedInternal(parameters) => {
                self.handle_playback_parameters(parameters)
            }
            EngineMessage::SendMessage(message) => self.send_message_internal(message),
            EngineMessage::SendMessageToTarget(message) => {
                self.send_message_to_target_executor(message);
                Ok(())
            }
            EngineMessage::Release => unreachable!("release is handled by the worker loop"),
        }
    }

    // Session lifecycle.

    fn prepare_internal(
        &mut self,
        mut source: Box<dyn MediaSource>,
        reset_position: bool,
        reset_state: bool,
    ) -> Result<()> {
        info!(reset_position, reset_state, "preparing new media source");
        self.pending_prepare_count += 1;
        self.reset_internal(false, true, reset_position, reset_state);
        self.load_control.on_prepared();
        self.source_generation += 1;
        let listener = Arc::new(SourceCallbacks {
            generation: self.source_generation,
            handler: self.handler.clone(),
        });
        source.prepare_source(listener, self.bandwidth_meter.transfer_listener());
        self.media_source = Some(source);
        self.set_state(PlaybackState::Buffering);
        self.handler.send(EngineMessage::DoSomeWork);
        Ok(())
    }

    fn set_play_when_ready_internal(&mut self, play_when_ready: bool) -> Result<()> {
        debug!(play_when_ready, "play-when-ready changed");
        self.rebuffering = false;
        self.play_when_ready = play_when_ready;
        if !play_when_ready {
            self.stop_renderers()?;
            self.update_playback_positions()?;
        } else if self.playback_info.playback_state == PlaybackState::Ready {
            self.start_renderers()?;
            self.handler.send(EngineMessage::DoSomeWork);
        } else if self.playback_info.playback_state == PlaybackState::Buffering {
            self.handler.send(EngineMessage::DoSomeWork);
        }
        Ok(())
    }

    fn set_repeat_mode_internal(&mut self, repeat_mode: RepeatMode) -> Result<()> {
        debug!(%repeat_mode, "repeat mode changed");
        self.repeat_mode = repeat_mode;
        let kept = self
            .queue
            .update_repeat_mode(repeat_mode, source_ref(&mut self.media_source));
        if !kept {
            self.seek_to_current_position(true)?;
        }
        self.handle_loading_media_period_changed(false);
        Ok(())
    }

    fn set_shuffle_mode_enabled_internal(&mut self, shuffle_mode_enabled: bool) -> Result<()> {
        debug!(shuffle_mode_enabled, "shuffle mode changed");
        self.shuffle_mode_enabled = shuffle_mode_enabled;
        let kept = self
            .queue
            .update_shuffle_mode_enabled(shuffle_mode_enabled, source_ref(&mut self.media_source));
        if !kept {
            self.seek_to_current_position(true)?;
        }
        self.handle_loading_media_period_changed(false);
        Ok(())
    }

    fn set_playback_parameters_internal(&mut self, parameters: PlaybackParameters) -> Result<()> {
        let previous = self.media_clock.playback_parameters();
        let applied = self
            .media_clock
            .set_playback_parameters(&mut self.renderers, parameters);
        if applied != previous {
            self.handler
                .send(EngineMessage::PlaybackParametersChangedInternal(applied));
        }
        Ok(())
    }

    fn set_foreground_mode_internal(&mut self, foreground_mode: bool) {
        if self.foreground_mode != foreground_mode {
            self.foreground_mode = foreground_mode;
            if !foreground_mode {
                // Release codec-level resources of idle renderers. A
                // renderer disabled after this point keeps its resources
                // until the next stop or mode change.
                for renderer in &mut self.renderers {
                    if renderer.state() == crate::renderer::RendererState::Disabled {
                        renderer.reset();
                    }
                }
            }
        }
        let mut state = self.sync.state.lock().unwrap();
        state.foreground_acks += 1;
        self.sync.signal.notify_all();
    }

    pub(super) fn stop_internal(
        &mut self,
        force_reset_renderers: bool,
        reset_position_and_state: bool,
        acknowledge_stop: bool,
    ) {
        info!(
            force_reset_renderers,
            reset_position_and_state, "stopping playback"
        );
        self.reset_internal(
            force_reset_renderers || !self.foreground_mode,
            true,
            reset_position_and_state,
            reset_position_and_state,
        );
        self.playback_info_update
            .increment_operation_acks(self.pending_prepare_count + u32::from(acknowledge_stop));
        self.pending_prepare_count = 0;
        self.load_control.on_stopped();
        self.set_state(PlaybackState::Idle);
    }

    pub(super) fn release_internal(&mut self) {
        info!("releasing playback engine");
        self.reset_internal(true, true, true, true);
        self.load_control.on_released();
        self.set_state(PlaybackState::Idle);
        {
            let mut state = self.sync.state.lock().unwrap();
            state.released = true;
            self.sync.signal.notify_all();
        }
        self.handler.quit();
    }

    /// Tears down the current session. Teardown failures are logged and
    /// swallowed; there is no second chance.
    pub(super) fn reset_internal(
        &mut self,
        reset_renderers: bool,
        release_media_source: bool,
        reset_position: bool,
        reset_state: bool,
    ) {
        self.handler.remove_messages(KIND_DO_SOME_WORK);
        self.rebuffering = false;
        self.media_clock.stop();
        self.renderer_position_us = 0;
        for index in self.enabled_renderers.clone() {
            if let Err(disable_error) = self.disable_renderer(index) {
                error!(renderer = index, "disable failed: {disable_error}");
            }
        }
        if reset_renderers {
            for renderer in &mut self.renderers {
                renderer.reset();
            }
        }
        self.enabled_renderers.clear();

        let mut reset_position = reset_position;
        if reset_position {
            self.pending_initial_seek = None;
        } else if reset_state {
            // Convert the current position into an initial seek so a
            // subsequent prepare resumes from it.
            reset_position = true;
            if self.pending_initial_seek.is_none() && !self.playback_info.timeline.is_empty() {
                if let Some(period) = self
                    .playback_info
                    .timeline
                    .period_by_uid(&self.playback_info.period_id.period_uid)
                {
                    let window_position_us = if ramp_common::time::is_set(
                        self.playback_info.position_us,
                    ) && ramp_common::time::is_set(period.position_in_window_us)
                    {
                        self.playback_info.position_us + period.position_in_window_us
                    } else {
                        TIME_UNSET
                    };
                    self.pending_initial_seek = Some(SeekPosition {
                        timeline: Timeline::empty(),
                        window_index: period.window_index,
                        window_position_us,
                    });
                }
            }
        }

        self.queue
            .clear(!reset_position, source_ref(&mut self.media_source));
        self.set_is_loading(false);
        if reset_state {
            self.queue.set_timeline(Timeline::empty());
            for pending in self.pending_messages.drain(..) {
                pending.message.mark_as_processed(false);
            }
            self.next_pending_message_index = 0;
        }

        let timeline = if reset_state {
            Timeline::empty()
        } else {
            Arc::clone(&self.playback_info.timeline)
        };
        let period_id = if reset_position {
            first_period_id_in(&timeline, self.shuffle_mode_enabled)
        } else {
            self.playback_info.period_id.clone()
        };
        // Start position TIME_UNSET so a subsequent seek to 0 is not
        // treated as a no-op.
        let start_position_us = if reset_position {
            TIME_UNSET
        } else {
            self.playback_info.position_us
        };
        let content_position_us = if reset_position {
            TIME_UNSET
        } else {
            self.playback_info.content_position_us
        };
        let info = PlaybackInfo {
            manifest: if reset_state {
                None
            } else {
                self.playback_info.manifest.clone()
            },
            timeline,
            period_id: period_id.clone(),
            start_position_us,
            content_position_us,
            playback_state: self.playback_info.playback_state,
            is_loading: false,
            track_groups: if reset_state {
                Arc::new(TrackGroupArray::EMPTY)
            } else {
                Arc::clone(&self.playback_info.track_groups)
            },
            track_selector_result: if reset_state {
                Arc::clone(&self.empty_track_selector_result)
            } else {
                Arc::clone(&self.playback_info.track_selector_result)
            },
            loading_period_id: period_id,
            position_us: start_position_us,
            buffered_position_us: start_position_us,
            total_buffered_duration_us: 0,
        };
        self.set_playback_info(info);

        if release_media_source {
            if let Some(mut source) = self.media_source.take() {
                source.release_source();
            }
        }
    }

    // Snapshot plumbing.

    pub(super) fn set_playback_info(&mut self, info: PlaybackInfo) {
        self.playback_info = info;
        self.playback_info_update.on_playback_info_changed();
    }

    pub(super) fn set_state(&mut self, state: PlaybackState) {
        if self.playback_info.playback_state != state {
            debug!(from = %self.playback_info.playback_state, to = %state, "playback state changed");
            let info = self.playback_info.copy_with_playback_state(state);
            self.set_playback_info(info);
        }
    }

    pub(super) fn set_is_loading(&mut self, is_loading: bool) {
        if self.playback_info.is_loading != is_loading {
            let info = self.playback_info.copy_with_is_loading(is_loading);
            self.set_playback_info(info);
        }
    }

    pub(super) fn maybe_notify_playback_info_changed(&mut self) {
        // The hot position triple is published every pass so external
        // readers always see a tick-consistent snapshot.
        self.shared_position.publish(&self.playback_info);
        if self.playback_info_update.has_pending_update() {
            let event = EngineEvent::PlaybackInfoChanged {
                operation_acks: self.playback_info_update.operation_acks,
                discontinuity: self.playback_info_update.discontinuity(),
                playback_info: self.playback_info.clone(),
            };
            self.playback_info_update.reset();
            self.send_event(event);
        }
    }

    pub(super) fn send_event(&self, event: EngineEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("event receiver dropped; event discarded");
        }
    }
}

/// First-to-play period id in `timeline`, or a placeholder when empty.
pub(super) fn first_period_id_in(timeline: &Arc<Timeline>, shuffle_mode_enabled: bool) -> MediaPeriodId {
    match timeline.first_window_index(shuffle_mode_enabled) {
        Some(window_index) => {
            let first_period = timeline.window(window_index).first_period_index;
            MediaPeriodId::for_content(timeline.uid_of_period(first_period))
        }
        None => MediaPeriodId::for_content(uuid::Uuid::nil()),
    }
}

/// Borrows the media source as the trait object the queue expects.
pub(super) fn source_ref(
    media_source: &mut Option<Box<dyn MediaSource>>,
) -> Option<&mut dyn MediaSource> {
    media_source.as_mut().map(|source| source.as_mut() as &mut dyn MediaSource)
}
