//! Codec engine: two independent ffmpeg child processes bridged via pipes.
//!
//! The decoder reads the external format on stdin and emits raw PCM16LE
//! 8kHz mono on stdout; the encoder reads that PCM and emits the external
//! format. The two pipelines have no data dependency on each other, so a
//! call leg can transmit and receive at the same time (full duplex).
//!
//! Each child is owned by a monitor task that distinguishes a requested
//! stop from a mid-session death and enforces a bounded kill grace period,
//! so teardown happens on every exit path.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::{ProcessRole, TranscodeError};
use super::formats::{FormatProfile, TELEPHONY_FRAME_BYTES};

const FFMPEG_BIN: &str = "ffmpeg";

/// Grace period between asking a codec process to exit and killing it.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Capacity of each bounded stdin feed channel; a failed `try_send` is the
/// backpressure signal to the caller.
const PIPE_CHANNEL_CAPACITY: usize = 256;

/// Output surface channel capacity.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Read size for draining process stdout.
const STDOUT_READ_BYTES: usize = 4096;

/// ffmpeg flags shared by both directions: no internal buffering, minimal
/// probing, flush packets as soon as they are produced.
const LOW_LATENCY_ARGS: &[&str] = &[
    "-flush_packets",
    "1",
    "-fflags",
    "+nobuffer+flush_packets+genpts",
    "-flags",
    "+low_delay",
    "-avoid_negative_ts",
    "make_zero",
    "-max_delay",
    "0",
    "-probesize",
    "32",
    "-analyzeduration",
    "0",
    "-bufsize",
    "64",
    "-max_muxing_queue_size",
    "1",
];

/// Raw PCM16LE @ 8kHz mono, the fixed telephony-leg format.
const TELEPHONY_PCM_OUTPUT_ARGS: &[&str] =
    &["-c:a", "pcm_s16le", "-f", "s16le", "-ar", "8000", "-ac", "1"];
const TELEPHONY_PCM_INPUT_ARGS: &[&str] = &["-f", "s16le", "-ar", "8000", "-ac", "1"];

/// Asynchronous notifications from the engine while a session runs.
#[derive(Debug)]
pub enum EngineEvent {
    /// A codec process exited while the session was still running.
    ProcessExited {
        role: ProcessRole,
        status: Option<std::process::ExitStatus>,
    },
}

// ======================== Write handle ========================

/// Cloneable write handle into the two codec pipelines.
///
/// Writes never block: they enqueue into a bounded per-pipeline channel and
/// report `PipeBackpressure` when it is full.
#[derive(Clone)]
pub struct EngineWriter {
    running: Arc<AtomicBool>,
    decoder_tx: mpsc::Sender<Bytes>,
    encoder_tx: mpsc::Sender<Bytes>,
}

impl EngineWriter {
    pub(crate) fn new(
        running: Arc<AtomicBool>,
        decoder_tx: mpsc::Sender<Bytes>,
        encoder_tx: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            running,
            decoder_tx,
            encoder_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Forward external-format bytes into the decoder.
    pub fn write_external(&self, chunk: Bytes) -> Result<(), TranscodeError> {
        self.write(ProcessRole::Decoder, &self.decoder_tx, chunk)
    }

    /// Forward one telephony PCM frame into the encoder.
    ///
    /// Frames are expected to be exactly [`TELEPHONY_FRAME_BYTES`]; a short
    /// final frame from a telephony source is forwarded with a warning
    /// rather than rejected here.
    pub fn write_telephony(&self, frame: Bytes) -> Result<(), TranscodeError> {
        if frame.len() != TELEPHONY_FRAME_BYTES {
            log::warn!(
                "PCM buffer size mismatch: {}, expected: {}",
                frame.len(),
                TELEPHONY_FRAME_BYTES
            );
        }
        self.write(ProcessRole::Encoder, &self.encoder_tx, frame)
    }

    fn write(
        &self,
        role: ProcessRole,
        tx: &mpsc::Sender<Bytes>,
        chunk: Bytes,
    ) -> Result<(), TranscodeError> {
        if !self.is_running() {
            return Err(TranscodeError::NotRunning);
        }
        tx.try_send(chunk).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TranscodeError::PipeBackpressure { role },
            mpsc::error::TrySendError::Closed(_) => TranscodeError::NotRunning,
        })
    }
}

// ======================== Engine trait ========================

/// Seam between the buffer manager and the process-backed engine, so queue
/// and framing policy can be exercised without spawning ffmpeg.
#[async_trait]
pub trait CodecEngine: Send {
    /// Arm both pipelines. Fails without reaching the running state if
    /// either process cannot be launched.
    fn start(&mut self) -> Result<(), TranscodeError>;

    /// Write handle into the pipelines; available once started.
    fn writer(&self) -> Result<EngineWriter, TranscodeError>;

    /// Decoder output surface: raw PCM chunks of arbitrary size, in
    /// emission order. Can be taken once; ends when the session stops.
    fn take_telephony_output(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Encoder output surface: external-format chunks, sizes per codec.
    fn take_external_output(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Engine event surface (process deaths). Can be taken once.
    fn take_events(&mut self) -> Option<mpsc::Receiver<EngineEvent>>;

    /// Ask both processes to finish pending output and exit, killing them
    /// after a bounded grace period. Idempotent.
    async fn stop(&mut self);
}

// ======================== ffmpeg engine ========================

/// Handles for one codec pipeline. Dropping this without an explicit stop
/// still tears the child down: the monitor task sees the closed shutdown
/// channel and runs the graceful-then-kill path.
struct CodecProcess {
    stdin_close_tx: Option<oneshot::Sender<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl CodecProcess {
    fn begin_shutdown(&mut self) {
        if let Some(tx) = self.stdin_close_tx.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct FfmpegEngine {
    input: &'static FormatProfile,
    output: &'static FormatProfile,
    running: Arc<AtomicBool>,
    started: bool,
    decoder: Option<CodecProcess>,
    encoder: Option<CodecProcess>,
    writer: Option<EngineWriter>,
    telephony_out_rx: Option<mpsc::Receiver<Bytes>>,
    external_out_rx: Option<mpsc::Receiver<Bytes>>,
    event_tx: mpsc::Sender<EngineEvent>,
    event_rx: Option<mpsc::Receiver<EngineEvent>>,
}

impl FfmpegEngine {
    pub fn new(input: &'static FormatProfile, output: &'static FormatProfile) -> Self {
        let (event_tx, event_rx) = mpsc::channel(8);
        Self {
            input,
            output,
            running: Arc::new(AtomicBool::new(false)),
            started: false,
            decoder: None,
            encoder: None,
            writer: None,
            telephony_out_rx: None,
            external_out_rx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Decoder argv: external format in, telephony PCM out.
    fn decoder_args(input: &FormatProfile) -> Vec<&'static str> {
        let mut args = Vec::new();
        args.extend_from_slice(input.ffmpeg_input);
        args.extend_from_slice(&["-i", "pipe:0"]);
        args.extend_from_slice(TELEPHONY_PCM_OUTPUT_ARGS);
        args.extend_from_slice(LOW_LATENCY_ARGS);
        args.push("pipe:1");
        args
    }

    /// Encoder argv: telephony PCM in, external format out.
    fn encoder_args(output: &FormatProfile) -> Vec<&'static str> {
        let mut args = Vec::new();
        args.extend_from_slice(TELEPHONY_PCM_INPUT_ARGS);
        args.extend_from_slice(&["-i", "pipe:0"]);
        args.extend_from_slice(output.ffmpeg_output);
        args.extend_from_slice(LOW_LATENCY_ARGS);
        args.push("pipe:1");
        args
    }

    /// Spawn one codec process and the tasks servicing its three pipes.
    ///
    /// Returns the process handles plus the stdin feed sender.
    fn spawn_codec(
        role: ProcessRole,
        args: &[&str],
        out_tx: mpsc::Sender<Bytes>,
        event_tx: mpsc::Sender<EngineEvent>,
        running: Arc<AtomicBool>,
    ) -> Result<(CodecProcess, mpsc::Sender<Bytes>), TranscodeError> {
        log::info!("{} command: {} {}", role, FFMPEG_BIN, args.join(" "));

        let mut child = Command::new(FFMPEG_BIN)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::ProcessSpawn { role, source })?;

        let (Some(mut stdin), Some(mut stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            // stdio was configured as piped above; a missing handle makes
            // the child unusable
            let _ = child.start_kill();
            return Err(TranscodeError::ProcessSpawn {
                role,
                source: std::io::Error::other("missing child stdio handles"),
            });
        };

        let (in_tx, mut in_rx) = mpsc::channel::<Bytes>(PIPE_CHANNEL_CAPACITY);
        let (stdin_close_tx, mut stdin_close_rx) = oneshot::channel::<()>();

        // stdin feed: closing stdin is the end-of-stream signal that lets
        // ffmpeg flush pending output and exit on its own.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = in_rx.recv() => match chunk {
                        Some(chunk) => {
                            if let Err(e) = stdin.write_all(&chunk).await {
                                log::warn!("{} stdin write failed: {}", role, e);
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = &mut stdin_close_rx => break,
                }
            }
            let _ = stdin.shutdown().await;
        });

        // stdout drain → output surface, one chunk per read.
        tokio::spawn(async move {
            let mut buf = vec![0u8; STDOUT_READ_BYTES];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if out_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            // surface consumer is gone
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("{} stdout read failed: {}", role, e);
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("{} stderr: {}", role, line);
            }
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        // Monitor owns the child: a wait() completing while the session is
        // running is a mid-call death; a shutdown signal starts the bounded
        // graceful-exit window.
        let monitor = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    if running.load(Ordering::SeqCst) {
                        log::error!("{} process exited unexpectedly: {:?}", role, status);
                        let _ = event_tx
                            .send(EngineEvent::ProcessExited { role, status: status.ok() })
                            .await;
                    }
                }
                _ = &mut shutdown_rx => {
                    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                        Ok(status) => {
                            log::debug!("{} process exited: {:?}", role, status);
                        }
                        Err(_) => {
                            log::warn!(
                                "{} process did not exit within {:?}, killing",
                                role,
                                STOP_GRACE
                            );
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                        }
                    }
                }
            }
        });

        let process = CodecProcess {
            stdin_close_tx: Some(stdin_close_tx),
            shutdown_tx: Some(shutdown_tx),
            monitor: Some(monitor),
        };
        Ok((process, in_tx))
    }
}

#[async_trait]
impl CodecEngine for FfmpegEngine {
    fn start(&mut self) -> Result<(), TranscodeError> {
        if self.started {
            return Err(TranscodeError::AlreadyStarted);
        }
        self.started = true;

        log::info!(
            "starting transcoder: {} -> pcm_s16le -> {}",
            self.input.format,
            self.output.format
        );

        let (tele_tx, tele_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (ext_tx, ext_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let decoder_args = Self::decoder_args(self.input);
        let (decoder, decoder_in) = Self::spawn_codec(
            ProcessRole::Decoder,
            &decoder_args,
            tele_tx,
            self.event_tx.clone(),
            self.running.clone(),
        )?;
        self.decoder = Some(decoder);

        let encoder_args = Self::encoder_args(self.output);
        let (encoder, encoder_in) = match Self::spawn_codec(
            ProcessRole::Encoder,
            &encoder_args,
            ext_tx,
            self.event_tx.clone(),
            self.running.clone(),
        ) {
            Ok(spawned) => spawned,
            Err(e) => {
                // the session never reaches running; take the decoder back down
                if let Some(mut decoder) = self.decoder.take() {
                    decoder.begin_shutdown();
                }
                return Err(e);
            }
        };
        self.encoder = Some(encoder);

        self.running.store(true, Ordering::SeqCst);
        self.writer = Some(EngineWriter::new(
            self.running.clone(),
            decoder_in,
            encoder_in,
        ));
        self.telephony_out_rx = Some(tele_rx);
        self.external_out_rx = Some(ext_rx);
        Ok(())
    }

    fn writer(&self) -> Result<EngineWriter, TranscodeError> {
        self.writer.clone().ok_or(TranscodeError::NotRunning)
    }

    fn take_telephony_output(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.telephony_out_rx.take()
    }

    fn take_external_output(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.external_out_rx.take()
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.event_rx.take()
    }

    async fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.writer = None;

        let decoder = self.decoder.take();
        let encoder = self.encoder.take();
        if decoder.is_none() && encoder.is_none() {
            return;
        }
        if was_running {
            log::info!("stopping transcoder");
        }

        for mut process in [decoder, encoder].into_iter().flatten() {
            process.begin_shutdown();
            if let Some(monitor) = process.monitor.take() {
                let _ = monitor.await;
            }
        }
        log::info!("transcoder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::formats::AudioFormat;

    #[test]
    fn decoder_args_follow_the_command_contract() {
        let args = FfmpegEngine::decoder_args(AudioFormat::G711Alaw.profile());
        let expected: Vec<&str> = vec![
            "-f", "alaw", "-ar", "8000", "-ac", "1", "-i", "pipe:0", "-c:a", "pcm_s16le", "-f",
            "s16le", "-ar", "8000", "-ac", "1", "-flush_packets", "1", "-fflags",
            "+nobuffer+flush_packets+genpts", "-flags", "+low_delay", "-avoid_negative_ts",
            "make_zero", "-max_delay", "0", "-probesize", "32", "-analyzeduration", "0",
            "-bufsize", "64", "-max_muxing_queue_size", "1", "pipe:1",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn encoder_args_follow_the_command_contract() {
        let args = FfmpegEngine::encoder_args(AudioFormat::Opus.profile());
        let expected: Vec<&str> = vec![
            "-f", "s16le", "-ar", "8000", "-ac", "1", "-i", "pipe:0", "-c:a", "libopus", "-f",
            "ogg", "-ar", "8000", "-ac", "1", "-b:a", "16k", "-flush_packets", "1", "-fflags",
            "+nobuffer+flush_packets+genpts", "-flags", "+low_delay", "-avoid_negative_ts",
            "make_zero", "-max_delay", "0", "-probesize", "32", "-analyzeduration", "0",
            "-bufsize", "64", "-max_muxing_queue_size", "1", "pipe:1",
        ];
        assert_eq!(args, expected);
    }

    #[test]
    fn writer_rejects_writes_when_not_running() {
        let (dec_tx, _dec_rx) = mpsc::channel(4);
        let (enc_tx, _enc_rx) = mpsc::channel(4);
        let writer = EngineWriter::new(Arc::new(AtomicBool::new(false)), dec_tx, enc_tx);

        assert!(matches!(
            writer.write_external(Bytes::from_static(b"xx")),
            Err(TranscodeError::NotRunning)
        ));
        assert!(matches!(
            writer.write_telephony(Bytes::from(vec![0u8; TELEPHONY_FRAME_BYTES])),
            Err(TranscodeError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn writer_signals_backpressure_when_pipe_is_full() {
        let (dec_tx, _dec_rx) = mpsc::channel(1);
        let (enc_tx, _enc_rx) = mpsc::channel(4);
        let writer = EngineWriter::new(Arc::new(AtomicBool::new(true)), dec_tx, enc_tx);

        writer
            .write_external(Bytes::from_static(b"first"))
            .expect("first chunk fits");
        assert!(matches!(
            writer.write_external(Bytes::from_static(b"second")),
            Err(TranscodeError::PipeBackpressure {
                role: ProcessRole::Decoder
            })
        ));
    }
}
