//! Fake collaborators for driving the engine through the virtual clock
//!
//! Everything here is deterministic: sources publish their timeline
//! synchronously on prepare, periods buffer instantly and prepare
//! synchronously, and renderers consume whole streams per render slice.
//! Tests therefore only ever wait on virtual time.

#![allow(dead_code)]

use ramp_common::time::{TIME_END_OF_SOURCE, TIME_UNSET};
use ramp_common::{PlaybackState, RepeatMode};
use ramp_engine::clock::VirtualClock;
use ramp_engine::error::{RendererError, SourceError};
use ramp_engine::events::EngineEvent;
use ramp_engine::media_clock::MediaClock;
use ramp_engine::renderer::{Renderer, RendererState, TrackType};
use ramp_engine::source::{
    Allocator, DefaultLoadControl, MediaPeriod, MediaPeriodCallback, MediaSource,
    MediaSourceCallback, SampleStream, StreamRead,
};
use ramp_engine::timeline::{
    AdGroup, AdPlaybackState, MediaPeriodId, PeriodDef, Timeline, WindowDef,
};
use ramp_engine::track::{
    BandwidthMeter, Format, RendererConfiguration, SelectorInvalidationHandle, TrackGroup,
    TrackGroupArray, TrackSelection, TrackSelector, TrackSelectorResult, TransferListener,
};
use ramp_engine::PlaybackEngine;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use uuid::Uuid;

pub const TICK_MS: i64 = 10;

// Timeline builders.

pub fn single_period_timeline(duration_ms: i64) -> Arc<Timeline> {
    Timeline::new(vec![WindowDef::new(vec![PeriodDef::new(duration_ms * 1_000)])])
}

pub fn multi_period_timeline(durations_ms: &[i64]) -> Arc<Timeline> {
    Timeline::new(vec![WindowDef::new(
        durations_ms
            .iter()
            .map(|&ms| PeriodDef::new(ms * 1_000))
            .collect(),
    )])
}

pub fn multi_window_timeline(durations_ms: &[i64]) -> Arc<Timeline> {
    Timeline::new(
        durations_ms
            .iter()
            .map(|&ms| WindowDef::new(vec![PeriodDef::new(ms * 1_000)]))
            .collect(),
    )
}

pub fn ad_timeline(duration_ms: i64, ad_position_ms: i64, ad_duration_ms: i64) -> Arc<Timeline> {
    let ads = AdPlaybackState::new(vec![AdGroup::new(
        ad_position_ms * 1_000,
        vec![ad_duration_ms * 1_000],
    )]);
    Timeline::new(vec![WindowDef::new(vec![
        PeriodDef::new(duration_ms * 1_000).with_ads(ads),
    ])])
}

// Sample streams.

struct FakeStreamState {
    cursor: usize,
    error: Option<SourceError>,
}

pub struct FakeSampleStream {
    sample_times_us: Vec<i64>,
    state: Mutex<FakeStreamState>,
}

impl FakeSampleStream {
    fn new(duration_us: i64) -> Arc<Self> {
        // One sample every 100ms, or a single sample when the duration is
        // unknown.
        let sample_times_us = if duration_us == TIME_UNSET || duration_us <= 0 {
            vec![0]
        } else {
            (0..duration_us).step_by(100_000).collect()
        };
        Arc::new(Self {
            sample_times_us,
            state: Mutex::new(FakeStreamState {
                cursor: 0,
                error: None,
            }),
        })
    }

    fn seek_to(&self, position_us: i64) {
        let mut state = self.state.lock().unwrap();
        state.cursor = self
            .sample_times_us
            .iter()
            .position(|&t| t >= position_us)
            .unwrap_or(self.sample_times_us.len());
    }
}

impl SampleStream for FakeSampleStream {
    fn is_ready(&self) -> bool {
        true
    }

    fn check_error(&self) -> Result<(), SourceError> {
        match &self.state.lock().unwrap().error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn read(&self) -> StreamRead {
        let mut state = self.state.lock().unwrap();
        if state.cursor < self.sample_times_us.len() {
            let time_us = self.sample_times_us[state.cursor];
            state.cursor += 1;
            StreamRead::Sample { time_us }
        } else {
            StreamRead::EndOfStream
        }
    }

    fn skip_to(&self, position_us: i64) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut skipped = 0;
        while state.cursor < self.sample_times_us.len()
            && self.sample_times_us[state.cursor] < position_us
        {
            state.cursor += 1;
            skipped += 1;
        }
        skipped
    }
}

// Media periods.

pub struct FakeMediaPeriod {
    duration_us: i64,
    track_groups: TrackGroupArray,
    streams: Vec<Arc<FakeSampleStream>>,
    pending_discontinuity_us: i64,
    released: Arc<AtomicUsize>,
}

impl FakeMediaPeriod {
    fn new(duration_us: i64, track_groups: TrackGroupArray, released: Arc<AtomicUsize>) -> Self {
        Self {
            duration_us,
            track_groups,
            streams: Vec::new(),
            pending_discontinuity_us: TIME_UNSET,
            released,
        }
    }
}

impl MediaPeriod for FakeMediaPeriod {
    fn prepare(&mut self, callback: Arc<dyn MediaPeriodCallback>, _start_position_us: i64) {
        // Periods buffer instantly: report prepared right away.
        callback.on_prepared();
    }

    fn check_prepare_error(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn track_groups(&self) -> TrackGroupArray {
        self.track_groups.clone()
    }

    fn select_tracks(
        &mut self,
        selections: &[Option<TrackSelection>],
        streams: &mut [Option<Arc<dyn SampleStream>>],
        stream_reset_flags: &mut [bool],
        position_us: i64,
    ) -> i64 {
        for (index, selection) in selections.iter().enumerate() {
            match selection {
                None => streams[index] = None,
                Some(_) => {
                    if streams[index].is_none() {
                        let stream = FakeSampleStream::new(self.duration_us);
                        stream.seek_to(position_us);
                        self.streams.push(Arc::clone(&stream));
                        streams[index] = Some(stream);
                        stream_reset_flags[index] = true;
                    }
                }
            }
        }
        position_us
    }

    fn discard_buffer(&mut self, _position_us: i64, _to_keyframe: bool) {}

    fn read_discontinuity(&mut self) -> i64 {
        std::mem::replace(&mut self.pending_discontinuity_us, TIME_UNSET)
    }

    fn buffered_position_us(&self) -> i64 {
        TIME_END_OF_SOURCE
    }

    fn next_load_position_us(&self) -> i64 {
        TIME_END_OF_SOURCE
    }

    fn continue_loading(&mut self, _position_us: i64) -> bool {
        false
    }

    fn reevaluate_buffer(&mut self, _position_us: i64) {}

    fn seek_to_us(&mut self, position_us: i64) -> i64 {
        for stream in &self.streams {
            stream.seek_to(position_us);
        }
        position_us
    }

    fn adjusted_seek_position_us(
        &self,
        position_us: i64,
        _seek_parameters: ramp_common::SeekParameters,
    ) -> i64 {
        position_us
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// Media source.

pub struct FakeSourceHandle {
    timeline: Mutex<Arc<Timeline>>,
    listener: Mutex<Option<Arc<dyn MediaSourceCallback>>>,
    pub periods_created: AtomicUsize,
    pub periods_released: Arc<AtomicUsize>,
    pub source_released: AtomicBool,
}

impl FakeSourceHandle {
    /// Publishes a new timeline through the engine's refresh path, as a
    /// live source would.
    pub fn set_new_timeline(&self, timeline: Arc<Timeline>) {
        *self.timeline.lock().unwrap() = Arc::clone(&timeline);
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_source_info_refreshed(timeline, None);
        }
    }
}

pub struct FakeMediaSource {
    handle: Arc<FakeSourceHandle>,
}

impl FakeMediaSource {
    pub fn new(timeline: Arc<Timeline>) -> (Box<dyn MediaSource>, Arc<FakeSourceHandle>) {
        let handle = Arc::new(FakeSourceHandle {
            timeline: Mutex::new(timeline),
            listener: Mutex::new(None),
            periods_created: AtomicUsize::new(0),
            periods_released: Arc::new(AtomicUsize::new(0)),
            source_released: AtomicBool::new(false),
        });
        (
            Box::new(FakeMediaSource {
                handle: Arc::clone(&handle),
            }),
            handle,
        )
    }
}

impl MediaSource for FakeMediaSource {
    fn prepare_source(
        &mut self,
        listener: Arc<dyn MediaSourceCallback>,
        _transfer_listener: Option<Arc<dyn TransferListener>>,
    ) {
        let timeline = Arc::clone(&self.handle.timeline.lock().unwrap());
        *self.handle.listener.lock().unwrap() = Some(Arc::clone(&listener));
        listener.on_source_info_refreshed(timeline, None);
    }

    fn check_source_info_refresh_error(&self) -> Result<(), SourceError> {
        Ok(())
    }

    fn create_period(
        &mut self,
        id: &MediaPeriodId,
        _allocator: Arc<dyn Allocator>,
        _start_position_us: i64,
    ) -> Box<dyn MediaPeriod> {
        self.handle.periods_created.fetch_add(1, Ordering::SeqCst);
        let timeline = self.handle.timeline.lock().unwrap();
        let period = timeline
            .period_by_uid(&id.period_uid)
            .expect("period created for a uid not in the timeline");
        let duration_us = match (id.ad_group_index, id.ad_index_in_group) {
            (Some(group), Some(index)) => period.ads.ad_duration_us(group, index),
            // Content that ends at an ad group is clipped to the group
            // position.
            _ => match id.next_ad_group_index {
                Some(group) => period.ads.groups[group].time_us,
                None => period.duration_us,
            },
        };
        let track_groups = TrackGroupArray::new(vec![TrackGroup::new(vec![Format::new(
            "audio-main",
            TrackType::Audio,
            "audio/test",
        )])]);
        Box::new(FakeMediaPeriod::new(
            duration_us,
            track_groups,
            Arc::clone(&self.handle.periods_released),
        ))
    }

    fn release_period(&mut self, mut period: Box<dyn MediaPeriod>) {
        period.release();
    }

    fn release_source(&mut self) {
        self.handle.source_released.store(true, Ordering::SeqCst);
        *self.handle.listener.lock().unwrap() = None;
    }
}

// Renderers.

#[derive(Default)]
pub struct RendererTelemetry {
    pub enables: AtomicUsize,
    pub resets: AtomicUsize,
    pub stream_replacements: AtomicUsize,
    pub renders: AtomicUsize,
}

pub struct FakeRenderer {
    index: usize,
    track_type: TrackType,
    state: RendererState,
    stream: Option<Arc<dyn SampleStream>>,
    stream_final: bool,
    read_to_end: bool,
    offset_us: i64,
    last_read_time_us: i64,
    telemetry: Arc<RendererTelemetry>,
}

impl FakeRenderer {
    pub fn new(track_type: TrackType) -> (Box<dyn Renderer>, Arc<RendererTelemetry>) {
        let telemetry = Arc::new(RendererTelemetry::default());
        (
            Box::new(FakeRenderer {
                index: 0,
                track_type,
                state: RendererState::Disabled,
                stream: None,
                stream_final: false,
                read_to_end: false,
                offset_us: 0,
                last_read_time_us: 0,
                telemetry: Arc::clone(&telemetry),
            }),
            telemetry,
        )
    }

    fn consume_stream(&mut self) {
        let Some(stream) = &self.stream else {
            return;
        };
        loop {
            match stream.read() {
                StreamRead::Sample { time_us } => {
                    self.last_read_time_us = time_us + self.offset_us;
                }
                StreamRead::EndOfStream => {
                    self.read_to_end = true;
                    break;
                }
                StreamRead::Nothing => break,
            }
        }
    }
}

impl Renderer for FakeRenderer {
    fn track_type(&self) -> TrackType {
        self.track_type
    }

    fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    fn state(&self) -> RendererState {
        self.state
    }

    fn enable(
        &mut self,
        _configuration: RendererConfiguration,
        _formats: &[Format],
        stream: Option<Arc<dyn SampleStream>>,
        _position_us: i64,
        _joining: bool,
        offset_us: i64,
    ) -> Result<(), RendererError> {
        if self.state != RendererState::Disabled {
            return Err(RendererError::IllegalState(format!(
                "enable in state {}",
                self.state
            )));
        }
        self.telemetry.enables.fetch_add(1, Ordering::SeqCst);
        self.state = RendererState::Enabled;
        self.stream = stream;
        self.stream_final = false;
        self.read_to_end = false;
        self.offset_us = offset_us;
        Ok(())
    }

    fn start(&mut self) -> Result<(), RendererError> {
        if self.state != RendererState::Enabled {
            return Err(RendererError::IllegalState(format!(
                "start in state {}",
                self.state
            )));
        }
        self.state = RendererState::Started;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RendererError> {
        if self.state != RendererState::Started {
            return Err(RendererError::IllegalState(format!(
                "stop in state {}",
                self.state
            )));
        }
        self.state = RendererState::Enabled;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), RendererError> {
        if self.state != RendererState::Enabled {
            return Err(RendererError::IllegalState(format!(
                "disable in state {}",
                self.state
            )));
        }
        self.state = RendererState::Disabled;
        self.stream = None;
        self.stream_final = false;
        self.read_to_end = false;
        Ok(())
    }

    fn reset(&mut self) {
        self.telemetry.resets.fetch_add(1, Ordering::SeqCst);
        self.state = RendererState::Disabled;
        self.stream = None;
        self.stream_final = false;
        self.read_to_end = false;
    }

    fn replace_stream(
        &mut self,
        _formats: &[Format],
        stream: Option<Arc<dyn SampleStream>>,
        offset_us: i64,
    ) -> Result<(), RendererError> {
        if self.state == RendererState::Disabled {
            return Err(RendererError::IllegalState(
                "replace_stream while disabled".into(),
            ));
        }
        if !self.read_to_end {
            return Err(RendererError::IllegalState(
                "replace_stream before the current stream was read to end".into(),
            ));
        }
        self.telemetry
            .stream_replacements
            .fetch_add(1, Ordering::SeqCst);
        self.stream = stream;
        self.stream_final = false;
        self.read_to_end = false;
        self.offset_us = offset_us;
        Ok(())
    }

    fn render(&mut self, _position_us: i64, _elapsed_realtime_us: i64) -> Result<(), RendererError> {
        if self.state == RendererState::Disabled {
            return Err(RendererError::IllegalState("render while disabled".into()));
        }
        self.telemetry.renders.fetch_add(1, Ordering::SeqCst);
        self.consume_stream();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.stream.is_some()
    }

    fn is_ended(&self) -> bool {
        self.stream_final && self.read_to_end
    }

    fn has_read_stream_to_end(&self) -> bool {
        self.read_to_end
    }

    fn stream(&self) -> Option<&Arc<dyn SampleStream>> {
        self.stream.as_ref()
    }

    fn set_current_stream_final(&mut self) {
        self.stream_final = true;
    }

    fn is_current_stream_final(&self) -> bool {
        self.stream_final
    }

    fn check_stream_error(&self) -> Result<(), SourceError> {
        match &self.stream {
            Some(stream) => stream.check_error(),
            None => Ok(()),
        }
    }

    fn reset_position(&mut self, _position_us: i64) -> Result<(), RendererError> {
        if self.state == RendererState::Disabled {
            return Err(RendererError::IllegalState(
                "reset_position while disabled".into(),
            ));
        }
        self.read_to_end = false;
        Ok(())
    }

    fn reading_position_us(&self) -> i64 {
        if self.read_to_end {
            TIME_END_OF_SOURCE
        } else {
            self.last_read_time_us
        }
    }

    fn media_clock(&mut self) -> Option<&mut dyn MediaClock> {
        None
    }
}

// Track selection.

pub struct FakeTrackSelector {
    invalidation: Arc<Mutex<Option<SelectorInvalidationHandle>>>,
    /// When set, audio selections are disabled; used to exercise
    /// reselection.
    pub disable_audio: Arc<AtomicBool>,
}

impl FakeTrackSelector {
    pub fn new() -> (Box<dyn TrackSelector>, Arc<Mutex<Option<SelectorInvalidationHandle>>>, Arc<AtomicBool>) {
        let invalidation = Arc::new(Mutex::new(None));
        let disable_audio = Arc::new(AtomicBool::new(false));
        (
            Box::new(FakeTrackSelector {
                invalidation: Arc::clone(&invalidation),
                disable_audio: Arc::clone(&disable_audio),
            }),
            invalidation,
            disable_audio,
        )
    }
}

impl TrackSelector for FakeTrackSelector {
    fn init(
        &mut self,
        invalidation: SelectorInvalidationHandle,
        _bandwidth_meter: Arc<dyn BandwidthMeter>,
    ) {
        *self.invalidation.lock().unwrap() = Some(invalidation);
    }

    fn select_tracks(
        &mut self,
        renderer_capabilities: &[ramp_engine::renderer::RendererCapabilities],
        track_groups: &TrackGroupArray,
        _period_id: &MediaPeriodId,
        _timeline: &Timeline,
    ) -> TrackSelectorResult {
        let mut result = TrackSelectorResult::empty(renderer_capabilities.len());
        for (index, capability) in renderer_capabilities.iter().enumerate() {
            if capability.track_type == TrackType::Audio
                && self.disable_audio.load(Ordering::SeqCst)
            {
                continue;
            }
            let group = track_groups
                .groups
                .iter()
                .find(|group| group.track_type() == capability.track_type);
            if let Some(group) = group {
                result.selections[index] = Some(TrackSelection::fixed(group.clone(), 0));
                result.configurations[index] = Some(RendererConfiguration::DEFAULT);
            }
        }
        result
    }
}

pub struct FixedBandwidthMeter;

impl BandwidthMeter for FixedBandwidthMeter {
    fn bitrate_estimate(&self) -> i64 {
        1_000_000
    }
}

// The assembled player under test.

pub struct TestPlayer {
    pub clock: Arc<VirtualClock>,
    pub engine: PlaybackEngine,
    pub events: mpsc::Receiver<EngineEvent>,
    pub renderer: Arc<RendererTelemetry>,
}

impl TestPlayer {
    pub fn new() -> TestPlayer {
        let clock = VirtualClock::new(0);
        let (renderer, telemetry) = FakeRenderer::new(TrackType::Audio);
        let (selector, _invalidation, _disable_audio) = FakeTrackSelector::new();
        let (event_tx, event_rx) = mpsc::channel();
        let engine = PlaybackEngine::new(
            vec![renderer],
            selector,
            Box::new(DefaultLoadControl::new()),
            Arc::new(FixedBandwidthMeter),
            false,
            RepeatMode::Off,
            false,
            event_tx,
            clock.clone(),
        );
        TestPlayer {
            clock,
            engine,
            events: event_rx,
            renderer: telemetry,
        }
    }

    /// Prepares a fake source for `timeline` and returns its handle.
    pub fn prepare(&self, timeline: Arc<Timeline>) -> Arc<FakeSourceHandle> {
        let (source, handle) = FakeMediaSource::new(timeline);
        self.engine.prepare(source, true, true);
        self.settle();
        handle
    }

    /// Lets the worker drain cascading internal messages (refreshes,
    /// prepared callbacks, rescheduled ticks) without advancing time.
    pub fn settle(&self) {
        for _ in 0..6 {
            self.engine.blocking_sync();
        }
    }

    /// Advances virtual time in scheduler-interval steps, letting the
    /// worker drain after each step.
    pub fn advance_ms(&self, total_ms: i64) {
        let mut remaining = total_ms;
        while remaining > 0 {
            let step = remaining.min(TICK_MS);
            self.clock.advance_ms(step);
            self.engine.blocking_sync();
            self.engine.blocking_sync();
            remaining -= step;
        }
    }

    /// Drains all currently queued events.
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Advances time until the reported playback state equals `state`,
    /// returning every event observed on the way. Panics after
    /// `max_ticks` scheduler intervals.
    pub fn run_until_state(&self, state: PlaybackState, max_ticks: usize) -> Vec<EngineEvent> {
        let mut observed = Vec::new();
        for _ in 0..max_ticks {
            observed.extend(self.drain_events());
            if latest_state(&observed) == Some(state) {
                return observed;
            }
            self.advance_ms(TICK_MS);
        }
        observed.extend(self.drain_events());
        if latest_state(&observed) == Some(state) {
            return observed;
        }
        panic!("state {state} not reached within {max_ticks} ticks; events: {observed:?}");
    }
}

// Event inspection helpers.

pub fn latest_state(events: &[EngineEvent]) -> Option<PlaybackState> {
    events.iter().rev().find_map(|event| match event {
        EngineEvent::PlaybackInfoChanged { playback_info, .. } => {
            Some(playback_info.playback_state)
        }
        _ => None,
    })
}

pub fn state_sequence(events: &[EngineEvent]) -> Vec<PlaybackState> {
    let mut states = Vec::new();
    for event in events {
        if let EngineEvent::PlaybackInfoChanged { playback_info, .. } = event {
            if states.last() != Some(&playback_info.playback_state) {
                states.push(playback_info.playback_state);
            }
        }
    }
    states
}

pub fn discontinuities(events: &[EngineEvent]) -> Vec<(ramp_common::DiscontinuityReason, Uuid, i64)> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::PlaybackInfoChanged {
                discontinuity: Some(reason),
                playback_info,
                ..
            } => Some((*reason, playback_info.period_id.period_uid, playback_info.position_us)),
            _ => None,
        })
        .collect()
}

pub fn last_playback_info(events: &[EngineEvent]) -> Option<&ramp_engine::playback_info::PlaybackInfo> {
    events.iter().rev().find_map(|event| match event {
        EngineEvent::PlaybackInfoChanged { playback_info, .. } => Some(playback_info),
        _ => None,
    })
}
