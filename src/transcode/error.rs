//! Error taxonomy for the transcoding pipeline.

use std::fmt;

use thiserror::Error;

/// Which of the two codec pipelines an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Decoder,
    Encoder,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Decoder => write!(f, "decoder"),
            ProcessRole::Encoder => write!(f, "encoder"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Format identifier outside the supported set. Raised before any
    /// process is spawned.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// A codec process could not be launched; the session never reaches
    /// the running state.
    #[error("failed to spawn {role} process: {source}")]
    ProcessSpawn {
        role: ProcessRole,
        #[source]
        source: std::io::Error,
    },

    /// Write or feed attempted against a session that is not running.
    #[error("transcoder is not running")]
    NotRunning,

    /// The bounded stdin feed channel for one pipeline is full. The chunk
    /// was not dropped silently; the caller decides whether to retry.
    #[error("{role} input pipe is full")]
    PipeBackpressure { role: ProcessRole },

    /// Non-fatal: a telephony chunk did not match the fixed frame size.
    #[error("frame size mismatch: {got} bytes, expected {expected}")]
    FrameSizeMismatch { got: usize, expected: usize },

    /// `start`/`begin` called twice on the same non-reusable instance.
    #[error("transcoder already started")]
    AlreadyStarted,
}
