//! Error types for the playback engine
//!
//! Collaborators fail with their own error types (`SourceError` for media
//! sources and periods, `RendererError` for renderers); the engine wraps
//! them into the closed `EngineError` taxonomy it reports externally.

use thiserror::Error;

/// Errors raised by media sources, media periods, and sample streams.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// I/O failure while loading media data.
    #[error("source I/O error: {0}")]
    Io(String),

    /// The source failed to refresh its timeline/manifest.
    #[error("source info refresh failed: {0}")]
    Refresh(String),

    /// A media period failed to prepare.
    #[error("period prepare failed: {0}")]
    Prepare(String),

    /// Malformed or unsupported media data.
    #[error("malformed media: {0}")]
    Malformed(String),
}

/// Errors raised by renderers.
#[derive(Error, Debug, Clone)]
pub enum RendererError {
    /// The operation is not legal in the renderer's current state.
    #[error("illegal renderer state: {0}")]
    IllegalState(String),

    /// The renderer cannot handle the formats it was given.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decode or render failure.
    #[error("render failed: {0}")]
    Failed(String),
}

/// The error taxonomy reported on the engine's event channel.
///
/// The variant determines the stop policy: source errors stop without
/// resetting renderers (their codecs stay warm for a retry), everything
/// else forces a renderer reset. After any error the engine is IDLE and a
/// subsequent `prepare` restarts the pipeline.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A media source or media period failed to load.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// A renderer failed; `index` identifies it in the construction order.
    #[error("renderer {index} error: {source}")]
    Renderer {
        index: usize,
        #[source]
        source: RendererError,
    },

    /// An invariant was violated inside the engine itself.
    #[error("unexpected engine error: {0}")]
    Unexpected(String),

    /// A timed message target failed on an external thread.
    #[error("remote message delivery failed: {0}")]
    Remote(String),

    /// The allocator could not satisfy a buffer request.
    #[error("out of buffer memory: {0}")]
    OutOfMemory(String),
}

impl EngineError {
    pub fn renderer(index: usize, source: RendererError) -> Self {
        EngineError::Renderer { index, source }
    }

    /// Whether recovery requires resetting renderers to release their
    /// codec-level resources.
    pub fn requires_renderer_reset(&self) -> bool {
        !matches!(self, EngineError::Source(_))
    }
}

/// Convenience Result type for engine-internal operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_wraps() {
        let err: EngineError = SourceError::Io("timeout".into()).into();
        assert!(matches!(err, EngineError::Source(_)));
        assert!(!err.requires_renderer_reset());
    }

    #[test]
    fn test_renderer_error_carries_index() {
        let err = EngineError::renderer(2, RendererError::Failed("codec died".into()));
        assert!(err.requires_renderer_reset());
        assert!(err.to_string().contains("renderer 2"));
    }

    #[test]
    fn test_unexpected_requires_reset() {
        assert!(EngineError::Unexpected("bad cursor".into()).requires_renderer_reset());
        assert!(EngineError::OutOfMemory("pool exhausted".into()).requires_renderer_reset());
    }
}
