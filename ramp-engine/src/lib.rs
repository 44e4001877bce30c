//! # RAMP Playback Engine
//!
//! The playback engine core of an adaptive media player: a cooperative
//! scheduler on a dedicated worker thread that drives abstract renderers
//! from abstract media sources, advances a queue of media periods through
//! an immutable timeline (including ad insertion), delivers user messages
//! at precise stream positions, and publishes immutable playback
//! snapshots to the embedding application.
//!
//! This crate owns no I/O and no codecs: sources, periods, renderers and
//! track-selection policy are capability traits implemented by the
//! embedder. Everything time-dependent reads a [`clock::Clock`], so the
//! whole engine can be driven deterministically by the virtual clock in
//! tests.

pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod handler;
pub mod media_clock;
pub mod message;
pub mod playback_info;
pub mod queue;
pub mod renderer;
pub mod source;
pub mod timeline;
pub mod track;

pub use engine::PlaybackEngine;
pub use error::{EngineError, RendererError, Result, SourceError};
pub use events::EngineEvent;
