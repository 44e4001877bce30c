//! Media source seams: sources, periods, sample streams, buffering policy
//!
//! The engine does no I/O of its own. A [`MediaSource`] publishes a
//! timeline and mints [`MediaPeriod`]s; each period exposes
//! [`SampleStream`]s that renderers consume. Loading is cooperative:
//! periods report buffered/next-load positions and the engine tells them
//! when to continue, steered by a [`LoadControl`].

use crate::error::{EngineError, SourceError};
use crate::renderer::RendererCapabilities;
use crate::timeline::{MediaPeriodId, Timeline};
use crate::track::{TrackGroupArray, TrackSelection, TransferListener};
use ramp_common::time::TIME_UNSET;
use ramp_common::SeekParameters;
use std::any::Any;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Opaque manifest payload published alongside a timeline.
pub type Manifest = Arc<dyn Any + Send + Sync>;

/// One sample read attempt against a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRead {
    /// No sample available right now.
    Nothing,
    /// A sample with the given presentation time (period-relative, µs).
    Sample { time_us: i64 },
    /// The stream is exhausted.
    EndOfStream,
}

/// A stream of samples for one renderer, owned by a media period.
///
/// Streams are shared (`Arc`) between the owning period and the consuming
/// renderer; identity comparisons use pointer equality.
pub trait SampleStream: Send + Sync {
    /// Whether data is available to read immediately.
    fn is_ready(&self) -> bool;

    /// Surfaces an error that is blocking this stream.
    fn check_error(&self) -> Result<(), SourceError>;

    /// Reads the next sample, advancing the read position.
    fn read(&self) -> StreamRead;

    /// Skips samples with times strictly before `position_us`; returns how
    /// many were skipped.
    fn skip_to(&self, position_us: i64) -> usize;
}

/// Callback handle a media period uses to reach the engine. Both methods
/// may be called from any thread; they marshal onto the playback worker.
pub trait MediaPeriodCallback: Send + Sync {
    /// The period finished preparing and can be queried/selected.
    fn on_prepared(&self);

    /// The period wants another `continue_loading` decision.
    fn on_continue_loading_requested(&self);
}

/// A single playable span of media, minted by a [`MediaSource`] and owned
/// exclusively by the engine's period queue for its lifetime.
pub trait MediaPeriod: Send {
    /// Begins preparation; `callback.on_prepared` fires when track groups
    /// become available.
    fn prepare(&mut self, callback: Arc<dyn MediaPeriodCallback>, start_position_us: i64);

    /// Surfaces the error that is blocking preparation, if any.
    fn check_prepare_error(&self) -> Result<(), SourceError>;

    /// Track groups; only valid once prepared.
    fn track_groups(&self) -> TrackGroupArray;

    /// Applies a track selection, binding one stream per enabled renderer
    /// slot into `streams` and flagging recreated streams in
    /// `stream_reset_flags`. Returns the actual position selection started
    /// from.
    fn select_tracks(
        &mut self,
        selections: &[Option<TrackSelection>],
        streams: &mut [Option<Arc<dyn SampleStream>>],
        stream_reset_flags: &mut [bool],
        position_us: i64,
    ) -> i64;

    /// Discards buffered media up to `position_us` (or the previous
    /// keyframe when `to_keyframe` is set).
    fn discard_buffer(&mut self, position_us: i64, to_keyframe: bool);

    /// Returns and clears a pending position correction, or `TIME_UNSET`.
    fn read_discontinuity(&mut self) -> i64;

    /// Position up to which media is buffered, or `TIME_END_OF_SOURCE`
    /// when fully buffered.
    fn buffered_position_us(&self) -> i64;

    /// Position the next load starts at, or `TIME_END_OF_SOURCE` when
    /// there is nothing left to load.
    fn next_load_position_us(&self) -> i64;

    /// Asks the period to continue loading toward `position_us`; returns
    /// whether new work was started.
    fn continue_loading(&mut self, position_us: i64) -> bool;

    /// Lets the period drop buffered-ahead chunks that no longer pay off
    /// (e.g. after a track reselection).
    fn reevaluate_buffer(&mut self, position_us: i64);

    /// Seeks within the period; returns the actual (sync-point) position.
    fn seek_to_us(&mut self, position_us: i64) -> i64;

    /// The position a seek to `position_us` would snap to under the given
    /// tolerance window, without performing it.
    fn adjusted_seek_position_us(&self, position_us: i64, seek_parameters: SeekParameters) -> i64;

    /// Releases the period's resources. Called exactly once.
    fn release(&mut self);
}

/// Callback handle a media source uses to reach the engine.
pub trait MediaSourceCallback: Send + Sync {
    /// The source learned a new timeline (and optionally a manifest).
    fn on_source_info_refreshed(&self, timeline: Arc<Timeline>, manifest: Option<Manifest>);
}

/// A provider of media periods for one piece of content.
pub trait MediaSource: Send {
    /// Starts the source; it must eventually call
    /// `on_source_info_refreshed` on the listener.
    fn prepare_source(
        &mut self,
        listener: Arc<dyn MediaSourceCallback>,
        transfer_listener: Option<Arc<dyn TransferListener>>,
    );

    /// Surfaces the error blocking the next timeline refresh, if any.
    fn check_source_info_refresh_error(&self) -> Result<(), SourceError>;

    /// Mints the media period identified by `id`.
    fn create_period(
        &mut self,
        id: &MediaPeriodId,
        allocator: Arc<dyn Allocator>,
        start_position_us: i64,
    ) -> Box<dyn MediaPeriod>;

    /// Takes back and releases a period minted by `create_period`.
    fn release_period(&mut self, period: Box<dyn MediaPeriod>);

    /// Releases the source itself.
    fn release_source(&mut self);
}

/// A fixed-size buffer obtained from an [`Allocator`].
#[derive(Debug)]
pub struct Allocation {
    data: Box<[u8]>,
}

impl Allocation {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Pool of fixed-size media buffers shared across media periods.
///
/// Locking is the allocator's responsibility; all methods take `&self`.
pub trait Allocator: Send + Sync {
    /// Obtains a buffer of `individual_allocation_size` bytes.
    fn allocate(&self) -> Result<Allocation, EngineError>;

    /// Returns a buffer to the pool.
    fn release(&self, allocation: Allocation);

    fn individual_allocation_size(&self) -> usize;

    /// Bytes currently handed out (not counting pooled spares).
    fn total_bytes_allocated(&self) -> usize;

    /// Drops pooled spares above `target_bytes` of retained capacity.
    fn trim_to(&self, target_bytes: usize);
}

struct AllocatorPool {
    available: Vec<Box<[u8]>>,
    allocated_count: usize,
}

/// Default pooled allocator: recycles fixed-size buffers, with an optional
/// hard cap surfaced as an out-of-memory engine error.
pub struct DefaultAllocator {
    allocation_size: usize,
    max_allocations: Option<usize>,
    pool: Mutex<AllocatorPool>,
}

impl DefaultAllocator {
    pub const DEFAULT_ALLOCATION_SIZE: usize = 64 * 1024;

    pub fn new(allocation_size: usize, max_allocations: Option<usize>) -> Self {
        assert!(allocation_size > 0);
        Self {
            allocation_size,
            max_allocations,
            pool: Mutex::new(AllocatorPool {
                available: Vec::new(),
                allocated_count: 0,
            }),
        }
    }
}

impl Default for DefaultAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ALLOCATION_SIZE, None)
    }
}

impl Allocator for DefaultAllocator {
    fn allocate(&self) -> Result<Allocation, EngineError> {
        let mut pool = self.pool.lock().unwrap();
        if let Some(max) = self.max_allocations {
            if pool.allocated_count >= max {
                return Err(EngineError::OutOfMemory(format!(
                    "allocator cap reached: {max} allocations of {} bytes",
                    self.allocation_size
                )));
            }
        }
        pool.allocated_count += 1;
        let data = pool
            .available
            .pop()
            .unwrap_or_else(|| vec![0u8; self.allocation_size].into_boxed_slice());
        Ok(Allocation { data })
    }

    fn release(&self, allocation: Allocation) {
        let mut pool = self.pool.lock().unwrap();
        pool.allocated_count = pool.allocated_count.saturating_sub(1);
        pool.available.push(allocation.data);
    }

    fn individual_allocation_size(&self) -> usize {
        self.allocation_size
    }

    fn total_bytes_allocated(&self) -> usize {
        self.pool.lock().unwrap().allocated_count * self.allocation_size
    }

    fn trim_to(&self, target_bytes: usize) {
        let mut pool = self.pool.lock().unwrap();
        let keep = target_bytes / self.allocation_size;
        if pool.available.len() > keep {
            let dropped = pool.available.len() - keep;
            pool.available.truncate(keep);
            debug!(dropped, "allocator trimmed pooled buffers");
        }
    }
}

/// Buffering policy consulted by the engine every tick.
pub trait LoadControl: Send {
    /// A new playback session is being prepared.
    fn on_prepared(&mut self);

    /// Tracks were (re)selected for the loading period.
    fn on_tracks_selected(
        &mut self,
        renderer_capabilities: &[RendererCapabilities],
        track_groups: &TrackGroupArray,
        selections: &[Option<TrackSelection>],
    );

    fn on_stopped(&mut self);

    fn on_released(&mut self);

    /// The allocator shared by every media period of the session.
    fn allocator(&self) -> Arc<dyn Allocator>;

    /// How much already-played media to retain behind the playback
    /// position.
    fn back_buffer_duration_us(&self) -> i64;

    /// Whether the retained back-buffer is extended to the previous
    /// keyframe.
    fn retain_back_buffer_from_keyframe(&self) -> bool;

    /// Whether the loading period should keep loading given the total
    /// buffered duration ahead of the playback position.
    fn should_continue_loading(&mut self, buffered_duration_us: i64, playback_speed: f32) -> bool;

    /// Whether enough is buffered to leave BUFFERING.
    fn should_start_playback(
        &mut self,
        buffered_duration_us: i64,
        playback_speed: f32,
        rebuffering: bool,
    ) -> bool;
}

/// Watermark-based default buffering policy.
///
/// Loading runs until the high watermark, then pauses until the buffer
/// drains below the low watermark (hysteresis, so loading does not
/// flip-flop). Playback starts once a small start buffer exists; after a
/// rebuffer a larger one is required.
pub struct DefaultLoadControl {
    allocator: Arc<dyn Allocator>,
    min_buffer_us: i64,
    max_buffer_us: i64,
    buffer_for_playback_us: i64,
    buffer_for_playback_after_rebuffer_us: i64,
    back_buffer_duration_us: i64,
    retain_back_buffer_from_keyframe: bool,
    is_buffering: bool,
}

impl DefaultLoadControl {
    pub const DEFAULT_MIN_BUFFER_MS: i64 = 15_000;
    pub const DEFAULT_MAX_BUFFER_MS: i64 = 50_000;
    pub const DEFAULT_BUFFER_FOR_PLAYBACK_MS: i64 = 2_500;
    pub const DEFAULT_BUFFER_FOR_PLAYBACK_AFTER_REBUFFER_MS: i64 = 5_000;

    pub fn new() -> Self {
        Self::with_allocator(Arc::new(DefaultAllocator::default()))
    }

    pub fn with_allocator(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            allocator,
            min_buffer_us: Self::DEFAULT_MIN_BUFFER_MS * 1_000,
            max_buffer_us: Self::DEFAULT_MAX_BUFFER_MS * 1_000,
            buffer_for_playback_us: Self::DEFAULT_BUFFER_FOR_PLAYBACK_MS * 1_000,
            buffer_for_playback_after_rebuffer_us: Self::DEFAULT_BUFFER_FOR_PLAYBACK_AFTER_REBUFFER_MS
                * 1_000,
            back_buffer_duration_us: 0,
            retain_back_buffer_from_keyframe: false,
            is_buffering: false,
        }
    }

    /// Overrides the buffer watermarks, all in milliseconds.
    pub fn with_buffer_durations_ms(
        mut self,
        min_buffer_ms: i64,
        max_buffer_ms: i64,
        buffer_for_playback_ms: i64,
        buffer_for_playback_after_rebuffer_ms: i64,
    ) -> Self {
        assert!(min_buffer_ms <= max_buffer_ms);
        assert!(buffer_for_playback_ms <= min_buffer_ms);
        self.min_buffer_us = min_buffer_ms * 1_000;
        self.max_buffer_us = max_buffer_ms * 1_000;
        self.buffer_for_playback_us = buffer_for_playback_ms * 1_000;
        self.buffer_for_playback_after_rebuffer_us = buffer_for_playback_after_rebuffer_ms * 1_000;
        self
    }

    pub fn with_back_buffer(mut self, duration_us: i64, from_keyframe: bool) -> Self {
        self.back_buffer_duration_us = duration_us;
        self.retain_back_buffer_from_keyframe = from_keyframe;
        self
    }

    fn reset(&mut self, trim_allocator: bool) {
        self.is_buffering = false;
        if trim_allocator {
            self.allocator.trim_to(0);
        }
    }

    /// Scales a threshold so a faster playback speed demands a deeper
    /// buffer.
    fn scaled(threshold_us: i64, speed: f32) -> i64 {
        ((threshold_us as f64) * (speed as f64)) as i64
    }
}

impl Default for DefaultLoadControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadControl for DefaultLoadControl {
    fn on_prepared(&mut self) {
        self.reset(false);
    }

    fn on_tracks_selected(
        &mut self,
        _renderer_capabilities: &[RendererCapabilities],
        _track_groups: &TrackGroupArray,
        _selections: &[Option<TrackSelection>],
    ) {
    }

    fn on_stopped(&mut self) {
        self.reset(true);
    }

    fn on_released(&mut self) {
        self.reset(true);
    }

    fn allocator(&self) -> Arc<dyn Allocator> {
        Arc::clone(&self.allocator)
    }

    fn back_buffer_duration_us(&self) -> i64 {
        self.back_buffer_duration_us
    }

    fn retain_back_buffer_from_keyframe(&self) -> bool {
        self.retain_back_buffer_from_keyframe
    }

    fn should_continue_loading(&mut self, buffered_duration_us: i64, playback_speed: f32) -> bool {
        let min = Self::scaled(self.min_buffer_us, playback_speed);
        let max = Self::scaled(self.max_buffer_us, playback_speed);
        if buffered_duration_us < min {
            self.is_buffering = true;
        } else if buffered_duration_us >= max {
            self.is_buffering = false;
        }
        self.is_buffering
    }

    fn should_start_playback(
        &mut self,
        buffered_duration_us: i64,
        playback_speed: f32,
        rebuffering: bool,
    ) -> bool {
        let threshold = if rebuffering {
            self.buffer_for_playback_after_rebuffer_us
        } else {
            self.buffer_for_playback_us
        };
        buffered_duration_us >= Self::scaled(threshold, playback_speed)
    }
}

/// Resolves a possibly unset duration against a buffered position.
pub fn buffered_duration_us(buffered_position_us: i64, position_us: i64) -> i64 {
    if buffered_position_us == TIME_UNSET {
        0
    } else {
        (buffered_position_us - position_us).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_recycles() {
        let allocator = DefaultAllocator::new(16, None);
        let a = allocator.allocate().unwrap();
        assert_eq!(a.data().len(), 16);
        assert_eq!(allocator.total_bytes_allocated(), 16);
        allocator.release(a);
        assert_eq!(allocator.total_bytes_allocated(), 0);
        let _b = allocator.allocate().unwrap();
        assert_eq!(allocator.total_bytes_allocated(), 16);
    }

    #[test]
    fn test_allocator_cap_is_out_of_memory() {
        let allocator = DefaultAllocator::new(16, Some(1));
        let held = allocator.allocate().unwrap();
        let err = allocator.allocate().unwrap_err();
        assert!(matches!(err, EngineError::OutOfMemory(_)));
        allocator.release(held);
        assert!(allocator.allocate().is_ok());
    }

    #[test]
    fn test_allocator_trim() {
        let allocator = DefaultAllocator::new(16, None);
        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        allocator.release(a);
        allocator.release(b);
        allocator.trim_to(16);
        // One pooled spare survives, the other was dropped; both gone after
        // a full trim.
        allocator.trim_to(0);
        assert_eq!(allocator.total_bytes_allocated(), 0);
    }

    #[test]
    fn test_load_control_hysteresis() {
        let mut control = DefaultLoadControl::new().with_buffer_durations_ms(10_000, 20_000, 1_000, 2_000);
        // Below the low watermark: start loading.
        assert!(control.should_continue_loading(5_000_000, 1.0));
        // Between watermarks while loading: keep loading.
        assert!(control.should_continue_loading(15_000_000, 1.0));
        // At the high watermark: stop.
        assert!(!control.should_continue_loading(20_000_000, 1.0));
        // Between watermarks while not loading: stay stopped.
        assert!(!control.should_continue_loading(15_000_000, 1.0));
    }

    #[test]
    fn test_load_control_start_thresholds() {
        let mut control = DefaultLoadControl::new().with_buffer_durations_ms(10_000, 20_000, 1_000, 2_000);
        assert!(control.should_start_playback(1_000_000, 1.0, false));
        assert!(!control.should_start_playback(1_000_000, 1.0, true));
        assert!(control.should_start_playback(2_000_000, 1.0, true));
        // Faster playback needs a deeper start buffer.
        assert!(!control.should_start_playback(1_500_000, 2.0, false));
    }

    #[test]
    fn test_buffered_duration_helper() {
        assert_eq!(buffered_duration_us(TIME_UNSET, 0), 0);
        assert_eq!(buffered_duration_us(5_000, 2_000), 3_000);
        assert_eq!(buffered_duration_us(1_000, 2_000), 0);
    }
}
