//! Per-call session controller: one codec engine plus one buffer manager
//! bound to a call leg pair.

use bytes::Bytes;
use uuid::Uuid;

use super::buffer::{ChunkCallback, DuplexBufferManager, EngineErrorCallback, FrameCallback};
use super::engine::FfmpegEngine;
use super::error::TranscodeError;
use super::formats;

/// Thin composition root for one call. Register observers, `begin`, feed
/// both directions, `end`. Not reusable after `end`; a fresh session is
/// created for each call leg.
pub struct CallSession {
    id: Uuid,
    manager: Option<DuplexBufferManager>,
    on_telephony_frame: Option<FrameCallback>,
    on_external_chunk: Option<ChunkCallback>,
    on_engine_error: Option<EngineErrorCallback>,
    ended: bool,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            manager: None,
            on_telephony_frame: None,
            on_external_chunk: None,
            on_engine_error: None,
            ended: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register the telephony frame observer. Set once, before `begin`.
    pub fn on_telephony_frame(&mut self, cb: FrameCallback) {
        self.on_telephony_frame = Some(cb);
    }

    /// Register the external chunk observer. Set once, before `begin`.
    pub fn on_external_chunk(&mut self, cb: ChunkCallback) {
        self.on_external_chunk = Some(cb);
    }

    /// Register the observer notified when a codec process dies mid-call.
    pub fn on_engine_error(&mut self, cb: EngineErrorCallback) {
        self.on_engine_error = Some(cb);
    }

    /// Start transcoding between `input_id` and `output_id`.
    ///
    /// On failure (unknown format, spawn failure) the session stays
    /// un-started and can be retried with different parameters.
    pub fn begin(&mut self, input_id: &str, output_id: &str) -> Result<(), TranscodeError> {
        if self.manager.is_some() || self.ended {
            return Err(TranscodeError::AlreadyStarted);
        }
        let input = formats::lookup(input_id)?;
        let output = formats::lookup(output_id)?;

        let engine = FfmpegEngine::new(input, output);
        let mut manager = DuplexBufferManager::new(Box::new(engine));
        if let Some(cb) = &self.on_telephony_frame {
            manager.set_on_telephony_frame(cb.clone());
        }
        if let Some(cb) = &self.on_external_chunk {
            manager.set_on_external_chunk(cb.clone());
        }
        if let Some(cb) = &self.on_engine_error {
            manager.set_on_engine_error(cb.clone());
        }
        manager.start()?;

        log::info!(
            "session {}: transcoding {} -> pcm_s16le -> {}",
            self.id,
            input.format,
            output.format
        );
        self.manager = Some(manager);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.manager.as_ref().is_some_and(|m| m.is_running())
    }

    /// Feed external-format bytes received from the network side.
    pub fn feed_external(&self, bytes: Bytes) -> Result<(), TranscodeError> {
        self.manager
            .as_ref()
            .ok_or(TranscodeError::NotRunning)?
            .add_external_input(bytes)
    }

    /// Feed one 320-byte telephony PCM frame.
    pub fn feed_telephony(&self, frame: Bytes) -> Result<(), TranscodeError> {
        self.manager
            .as_ref()
            .ok_or(TranscodeError::NotRunning)?
            .add_telephony_input(frame)
    }

    /// Tear the session down. Idempotent; the session is not reusable.
    pub async fn end(&mut self) {
        self.ended = true;
        if let Some(mut manager) = self.manager.take() {
            manager.stop().await;
            log::info!("session {} ended", self.id);
        }
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::mpsc;

    #[tokio::test]
    async fn begin_with_unknown_format_fails_cleanly_and_is_retryable() {
        let mut session = CallSession::new();

        for (input, output) in [("webm", "g711_alaw"), ("g711_alaw", "webm")] {
            assert!(matches!(
                session.begin(input, output),
                Err(TranscodeError::UnsupportedFormat(_))
            ));
            assert!(!session.is_running());
        }

        // still in the clean not-started state
        assert!(matches!(
            session.feed_external(Bytes::from_static(b"x")),
            Err(TranscodeError::NotRunning)
        ));
        assert!(matches!(
            session.feed_telephony(Bytes::from(vec![0u8; 320])),
            Err(TranscodeError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn end_is_idempotent_and_blocks_reuse() {
        let mut session = CallSession::new();
        session.end().await;
        session.end().await;
        assert!(matches!(
            session.begin("pcm_s16le", "pcm_s16le"),
            Err(TranscodeError::AlreadyStarted)
        ));
    }

    /// One 20ms frame of a low-amplitude 440Hz tone, PCM16LE @ 8kHz mono.
    fn tone_frame(frame_index: usize) -> Bytes {
        let mut frame = Vec::with_capacity(320);
        for n in 0..160usize {
            let t = (frame_index * 160 + n) as f32 / formats::TELEPHONY_SAMPLE_RATE as f32;
            let sample = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16;
            frame.extend_from_slice(&sample.to_le_bytes());
        }
        Bytes::from(frame)
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg on PATH"]
    async fn pcm_round_trip_reproduces_whole_frames() {
        let mut session = CallSession::new();

        let (ext_tx, mut ext_rx) = mpsc::channel::<Bytes>(256);
        session.on_external_chunk(Arc::new(move |chunk| {
            let _ = ext_tx.try_send(chunk);
        }));

        let delivered: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        session.on_telephony_frame(Arc::new(move |frame| {
            sink.lock().expect("sink lock").push(frame);
        }));

        session.begin("pcm_s16le", "pcm_s16le").expect("begin");

        // feed at roughly real-time cadence so the decoder emits aligned
        // chunks, then loop encoder output back into the decoder
        let frame_count = 50usize;
        for i in 0..frame_count {
            session.feed_telephony(tone_frame(i)).expect("feed");
            while let Ok(chunk) = ext_rx.try_recv() {
                session.feed_external(chunk).expect("loop back");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // drain stragglers
        for _ in 0..100 {
            while let Ok(chunk) = ext_rx.try_recv() {
                session.feed_external(chunk).expect("loop back");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let frames = delivered.lock().expect("sink lock").clone();
        assert!(frames.iter().all(|f| f.len() == 320));
        // pcm_s16le is lossless; allow only for frames still buffered in
        // ffmpeg or lost to batch-boundary re-chunking at the tail
        assert!(
            frames.len() >= frame_count * 8 / 10,
            "expected most frames back, got {}/{}",
            frames.len(),
            frame_count
        );

        session.end().await;
        assert!(matches!(
            session.feed_telephony(tone_frame(0)),
            Err(TranscodeError::NotRunning)
        ));
    }
}
