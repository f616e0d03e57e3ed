//! Duplex buffer manager: framing discipline and arrival-rate smoothing
//! between the call legs and the codec engine.
//!
//! Inbound chunks are queued FIFO per direction and dispatched to the
//! engine immediately on arrival; a 5ms drain timer per direction is kept
//! as a safety net so queued audio still moves when immediate dispatch is
//! disabled. Decoder output is re-sliced into exact 320-byte telephony
//! frames before delivery; encoder output is forwarded verbatim.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::{CodecEngine, EngineEvent, EngineWriter};
use super::error::{ProcessRole, TranscodeError};
use super::formats::TELEPHONY_FRAME_BYTES;

/// Safety-net drain period for the input queues.
const DRAIN_INTERVAL: Duration = Duration::from_millis(5);

/// Observer invoked once per whole 320-byte telephony frame.
pub type FrameCallback = Arc<dyn Fn(Bytes) + Send + Sync>;
/// Observer invoked once per encoder output chunk, sizes per codec.
pub type ChunkCallback = Arc<dyn Fn(Bytes) + Send + Sync>;
/// Observer invoked when a codec process dies mid-session.
pub type EngineErrorCallback = Arc<dyn Fn(ProcessRole) + Send + Sync>;

// Pipeline lifecycle, stored atomically so pump tasks can retire the
// session when a codec process dies. Idle -> Running -> Stopped, no way
// back; a new instance is required to restart.
const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

type ChunkQueue = Arc<Mutex<VecDeque<Bytes>>>;

pub struct DuplexBufferManager {
    engine: Box<dyn CodecEngine>,
    state: Arc<AtomicU8>,
    external_queue: ChunkQueue,
    telephony_queue: ChunkQueue,
    writer: Option<EngineWriter>,
    on_telephony_frame: Option<FrameCallback>,
    on_external_chunk: Option<ChunkCallback>,
    on_engine_error: Option<EngineErrorCallback>,
    immediate_dispatch: bool,
    stopped: bool,
    tasks: Vec<JoinHandle<()>>,
}

impl DuplexBufferManager {
    pub fn new(engine: Box<dyn CodecEngine>) -> Self {
        Self {
            engine,
            state: Arc::new(AtomicU8::new(STATE_IDLE)),
            external_queue: Arc::new(Mutex::new(VecDeque::new())),
            telephony_queue: Arc::new(Mutex::new(VecDeque::new())),
            writer: None,
            on_telephony_frame: None,
            on_external_chunk: None,
            on_engine_error: None,
            immediate_dispatch: true,
            stopped: false,
            tasks: Vec::new(),
        }
    }

    /// Register the telephony frame observer. Set once, before `start`.
    pub fn set_on_telephony_frame(&mut self, cb: FrameCallback) {
        self.on_telephony_frame = Some(cb);
    }

    /// Register the external chunk observer. Set once, before `start`.
    pub fn set_on_external_chunk(&mut self, cb: ChunkCallback) {
        self.on_external_chunk = Some(cb);
    }

    /// Register the engine error observer. Set once, before `start`.
    pub fn set_on_engine_error(&mut self, cb: EngineErrorCallback) {
        self.on_engine_error = Some(cb);
    }

    /// Toggle the immediate dispatch path. With it off, queued chunks move
    /// only on the drain timers.
    pub fn set_immediate_dispatch(&mut self, enabled: bool) {
        self.immediate_dispatch = enabled;
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Start the engine and arm the pump and drain tasks.
    pub fn start(&mut self) -> Result<(), TranscodeError> {
        if self.state.load(Ordering::SeqCst) != STATE_IDLE {
            return Err(TranscodeError::AlreadyStarted);
        }

        self.engine.start()?;
        let writer = self.engine.writer()?;

        // Telephony pump: re-slice decoder output into whole frames. A
        // retired session delivers nothing, even if the surface still holds
        // buffered chunks.
        if let Some(mut rx) = self.engine.take_telephony_output() {
            let cb = self.on_telephony_frame.clone();
            let state = self.state.clone();
            self.tasks.push(tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    if state.load(Ordering::SeqCst) == STATE_STOPPED {
                        break;
                    }
                    deliver_telephony_frames(batch, cb.as_ref());
                }
            }));
        }

        // External pump: encoder output may be variable-size, forward verbatim.
        if let Some(mut rx) = self.engine.take_external_output() {
            let cb = self.on_external_chunk.clone();
            let state = self.state.clone();
            self.tasks.push(tokio::spawn(async move {
                while let Some(chunk) = rx.recv().await {
                    if state.load(Ordering::SeqCst) == STATE_STOPPED {
                        break;
                    }
                    if let Some(cb) = &cb {
                        cb(chunk);
                    }
                }
            }));
        }

        // Event pump: a dead codec process retires the whole session so the
        // call is torn down instead of losing one direction of audio.
        if let Some(mut rx) = self.engine.take_events() {
            let cb = self.on_engine_error.clone();
            let state = self.state.clone();
            self.tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        EngineEvent::ProcessExited { role, status } => {
                            log::error!(
                                "{} process died (status {:?}), retiring session",
                                role,
                                status
                            );
                            state.store(STATE_STOPPED, Ordering::SeqCst);
                            if let Some(cb) = &cb {
                                cb(role);
                            }
                        }
                    }
                }
            }));
        }

        self.tasks.push(spawn_drain(
            self.external_queue.clone(),
            writer.clone(),
            self.state.clone(),
            false,
        ));
        self.tasks.push(spawn_drain(
            self.telephony_queue.clone(),
            writer.clone(),
            self.state.clone(),
            true,
        ));

        self.writer = Some(writer);
        self.state.store(STATE_RUNNING, Ordering::SeqCst);
        Ok(())
    }

    /// Queue external-format bytes for decoding.
    pub fn add_external_input(&self, chunk: Bytes) -> Result<(), TranscodeError> {
        if !self.is_running() {
            return Err(TranscodeError::NotRunning);
        }
        self.external_queue
            .lock()
            .expect("external queue lock poisoned")
            .push_back(chunk);
        if self.immediate_dispatch {
            self.dispatch_next(false)
        } else {
            Ok(())
        }
    }

    /// Queue one telephony PCM frame for encoding.
    ///
    /// Chunks that are not exactly [`TELEPHONY_FRAME_BYTES`] are rejected
    /// and not enqueued.
    pub fn add_telephony_input(&self, frame: Bytes) -> Result<(), TranscodeError> {
        if !self.is_running() {
            return Err(TranscodeError::NotRunning);
        }
        if frame.len() != TELEPHONY_FRAME_BYTES {
            log::warn!(
                "telephony PCM buffer size mismatch: {}, expected: {}",
                frame.len(),
                TELEPHONY_FRAME_BYTES
            );
            return Err(TranscodeError::FrameSizeMismatch {
                got: frame.len(),
                expected: TELEPHONY_FRAME_BYTES,
            });
        }
        self.telephony_queue
            .lock()
            .expect("telephony queue lock poisoned")
            .push_back(frame);
        if self.immediate_dispatch {
            self.dispatch_next(true)
        } else {
            Ok(())
        }
    }

    /// Pop the oldest queued chunk for one direction and hand it to the
    /// engine. On backpressure the chunk goes back to the queue front so
    /// the drain timer can retry it.
    fn dispatch_next(&self, telephony: bool) -> Result<(), TranscodeError> {
        let Some(writer) = &self.writer else {
            return Err(TranscodeError::NotRunning);
        };
        let queue = if telephony {
            &self.telephony_queue
        } else {
            &self.external_queue
        };
        dispatch_from(queue, writer, telephony)
    }

    /// Stop the engine and discard whatever is still queued. Idempotent and
    /// safe to call at any time, including mid-dispatch.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.state.store(STATE_STOPPED, Ordering::SeqCst);

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.writer = None;
        self.engine.stop().await;

        // pending audio in flight at stop time is discarded, not flushed
        self.external_queue
            .lock()
            .expect("external queue lock poisoned")
            .clear();
        self.telephony_queue
            .lock()
            .expect("telephony queue lock poisoned")
            .clear();
    }
}

/// Move one queued chunk to the engine, re-queueing it on backpressure.
fn dispatch_from(
    queue: &ChunkQueue,
    writer: &EngineWriter,
    telephony: bool,
) -> Result<(), TranscodeError> {
    let chunk = {
        let mut queue = queue.lock().expect("queue lock poisoned");
        queue.pop_front()
    };
    let Some(chunk) = chunk else {
        return Ok(());
    };

    let result = if telephony {
        writer.write_telephony(chunk.clone())
    } else {
        writer.write_external(chunk.clone())
    };
    if matches!(result, Err(TranscodeError::PipeBackpressure { .. })) {
        queue
            .lock()
            .expect("queue lock poisoned")
            .push_front(chunk);
    }
    result
}

/// Safety-net drain: pops at most one chunk per tick, a no-op when the
/// immediate dispatch path already emptied the queue.
fn spawn_drain(
    queue: ChunkQueue,
    writer: EngineWriter,
    state: Arc<AtomicU8>,
    telephony: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if state.load(Ordering::SeqCst) == STATE_STOPPED {
                break;
            }
            // backpressure leaves the chunk queued for the next tick
            let _ = dispatch_from(&queue, &writer, telephony);
        }
    })
}

/// Slice a decoder output batch into whole telephony frames, invoking the
/// observer once per frame. A trailing partial frame is dropped and logged,
/// not padded and not carried over to the next batch. Returns the number of
/// frames delivered.
fn deliver_telephony_frames(batch: Bytes, cb: Option<&FrameCallback>) -> usize {
    let mut rest = batch;
    let mut delivered = 0;
    while rest.len() >= TELEPHONY_FRAME_BYTES {
        let frame = rest.split_to(TELEPHONY_FRAME_BYTES);
        if let Some(cb) = cb {
            cb(frame);
        }
        delivered += 1;
    }
    if !rest.is_empty() {
        log::warn!(
            "PCM chunk size mismatch: {} trailing bytes, expected {}-byte frames",
            rest.len(),
            TELEPHONY_FRAME_BYTES
        );
    }
    delivered
}
