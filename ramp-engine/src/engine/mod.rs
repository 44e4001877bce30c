//! The playback engine
//!
//! **Responsibilities:**
//! - Public command handle marshalling calls onto the playback worker
//! - The internal message dispatch and error policy (`core`)
//! - The cooperative scheduler tick and renderer lifecycle (`playback`)
//! - Period loading, advancement and source refresh handling (`queue`)
//! - Seek resolution (`seek`) and timed message delivery (`messages`)

mod core;
mod messages;
mod playback;
mod queue;
mod seek;

pub use self::core::{PlaybackEngine, SeekPosition};
