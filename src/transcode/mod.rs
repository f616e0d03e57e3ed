//! transcode - Full-duplex telephony audio transcoding pipeline
//!
//! Bridges the fixed-format telephony leg (PCM16LE 8kHz mono, 320-byte /
//! 20ms frames) and an arbitrary external audio format using two
//! independent ffmpeg processes, one per direction, with FIFO buffering
//! and strict telephony framing on top.

mod buffer;
mod engine;
mod error;
mod formats;
mod session;

pub use buffer::{ChunkCallback, DuplexBufferManager, EngineErrorCallback, FrameCallback};
pub use engine::{CodecEngine, EngineEvent, EngineWriter, FfmpegEngine};
pub use error::{ProcessRole, TranscodeError};
pub use formats::{
    lookup, supported_ids, AudioFormat, FormatProfile, TELEPHONY_FRAME_BYTES,
    TELEPHONY_SAMPLE_RATE,
};
pub use session::CallSession;
