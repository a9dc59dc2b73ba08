//! Flow-controlled output pipeline
//!
//! Bridges a PTY byte stream to the per-client output buffers held by the
//! client registry. Reads happen on a blocking thread; the async pump loop
//! decodes incrementally as UTF-8, coalesces output into bounded chunks and
//! asserts backpressure against the PTY when any attached client's buffer
//! fills. Invariant: a frame handed to a client buffer is always whole and
//! always valid UTF-8.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use webmux_protocol::ServerMessage;

use crate::config::PipelineConfig;
use crate::registry::{ClientRegistry, SessionId};

/// Read buffer size for PTY reads
const READ_BUFFER_SIZE: usize = 4096;

/// Configuration for the output pump
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Chunk ceiling for output frames (bytes)
    pub chunk_max_bytes: usize,
    /// Quiescence timer before a partial chunk is flushed
    pub flush_timeout: Duration,
    /// Client buffer occupancy at which backpressure is released
    pub low_water_frames: usize,
}

impl From<&PipelineConfig> for PumpConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            chunk_max_bytes: config.chunk_max_bytes,
            flush_timeout: config.flush_timeout(),
            low_water_frames: config.low_water_frames(),
        }
    }
}

/// Notification sent when a session's producer ends
#[derive(Debug, Clone)]
pub struct SessionClosed {
    pub session_id: SessionId,
}

/// Handle for managing a running output pump
#[derive(Debug)]
pub struct PumpHandle {
    cancel_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl PumpHandle {
    /// Cancel the pump and wait for it to finish
    pub async fn stop(self) {
        self.cancel_token.cancel();
        let _ = self.join_handle.await;
    }
}

/// Result of one blocking PTY read
enum ReadResult {
    Data(Vec<u8>),
    Eof,
    Error(String),
}

/// Incremental UTF-8 decoder that never emits a torn multi-byte sequence
///
/// An incomplete trailing sequence is held back and prepended to the next
/// read. Bytes that are invalid (not merely incomplete) become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    carry: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next read, carrying any incomplete trailing sequence
    pub fn decode(&mut self, data: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(data);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(skip) => {
                            out.push('\u{FFFD}');
                            rest = &rest[valid + skip..];
                        }
                        None => {
                            // Incomplete trailing sequence, hold it back
                            self.carry = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush any held-back bytes at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let carry = std::mem::take(&mut self.carry);
        Some(String::from_utf8_lossy(&carry).into_owned())
    }

    #[cfg(test)]
    fn pending_bytes(&self) -> usize {
        self.carry.len()
    }
}

/// Split text into frames no larger than `max_bytes`, on char boundaries
pub fn split_utf8_chunks(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < text.len() {
        let end = floor_char_boundary(text, offset + max_bytes);
        chunks.push(&text[offset..end]);
        offset = end;
    }
    chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Output pump bridging one PTY reader to all clients of a session
///
/// Each Direct-mode session gets one pump instance running in a background
/// task. The pump:
/// - reads PTY output on a blocking thread via `spawn_blocking`
/// - decodes incrementally as UTF-8, carrying torn sequences between reads
/// - coalesces output up to the chunk ceiling, flushing early on quiescence
/// - pauses reading while any attached client's buffer is full, resuming
///   once every buffer has drained below the low-water mark
/// - on producer EOF, flushes, broadcasts `disconnected` and notifies the
///   session engine
pub struct OutputPump {
    session_id: SessionId,
    pty_reader: Arc<Mutex<Box<dyn Read + Send>>>,
    registry: Arc<ClientRegistry>,
    config: PumpConfig,
    cancel_token: CancellationToken,
    closed_tx: mpsc::Sender<SessionClosed>,
    carry: Utf8Carry,
    pending: String,
    paused: bool,
    last_data_time: Instant,
}

impl OutputPump {
    /// Spawn an output pump for a session, returning a stop handle
    pub fn spawn(
        session_id: SessionId,
        pty_reader: Arc<Mutex<Box<dyn Read + Send>>>,
        registry: Arc<ClientRegistry>,
        config: PumpConfig,
        closed_tx: mpsc::Sender<SessionClosed>,
    ) -> PumpHandle {
        let cancel_token = CancellationToken::new();
        let pump = Self {
            session_id,
            pty_reader,
            registry,
            config,
            cancel_token: cancel_token.clone(),
            closed_tx,
            carry: Utf8Carry::new(),
            pending: String::new(),
            paused: false,
            last_data_time: Instant::now(),
        };

        let join_handle = tokio::spawn(pump.run());

        PumpHandle {
            cancel_token,
            join_handle,
        }
    }

    async fn run(mut self) {
        debug!(session_id = %self.session_id, "Output pump started");

        let (data_tx, mut data_rx) = mpsc::channel::<ReadResult>(16);

        let reader = self.pty_reader.clone();
        let reader_cancel = self.cancel_token.clone();
        let session_id = self.session_id;
        tokio::spawn(async move {
            Self::blocking_reader_task(reader, data_tx, reader_cancel, session_id).await;
        });

        let mut flush_interval = interval(self.config.flush_timeout);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut resume_probe = interval(self.config.flush_timeout);
        resume_probe.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.paused {
                // Reads stay unconsumed while paused; the reader channel and
                // then the OS pty buffer fill, throttling the producer.
                tokio::select! {
                    _ = self.cancel_token.cancelled() => {
                        debug!(session_id = %self.session_id, "Pump cancelled");
                        return;
                    }
                    _ = resume_probe.tick() => {
                        self.try_resume();
                    }
                }
                continue;
            }

            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(session_id = %self.session_id, "Pump cancelled");
                    return;
                }

                result = data_rx.recv() => {
                    match result {
                        Some(ReadResult::Data(data)) => {
                            self.handle_output(&data);
                        }
                        Some(ReadResult::Eof) => {
                            debug!(session_id = %self.session_id, "PTY EOF");
                            break;
                        }
                        Some(ReadResult::Error(e)) => {
                            error!(session_id = %self.session_id, error = %e, "PTY read error");
                            break;
                        }
                        None => {
                            debug!(session_id = %self.session_id, "Reader channel closed");
                            break;
                        }
                    }
                }

                _ = flush_interval.tick() => {
                    if self.should_flush_timeout() {
                        self.flush();
                    }
                }
            }
        }

        // Producer is gone: drain what is left, then signal shutdown
        if let Some(tail) = self.carry.finish() {
            self.pending.push_str(&tail);
        }
        self.flush_remaining().await;

        self.registry
            .broadcast_to_session(self.session_id, ServerMessage::Disconnected)
            .await;

        if let Err(e) = self
            .closed_tx
            .send(SessionClosed {
                session_id: self.session_id,
            })
            .await
        {
            warn!(session_id = %self.session_id, error = %e, "Failed to send close notification");
        }

        debug!(session_id = %self.session_id, "Output pump exiting");
    }

    /// Blocking reader loop, run on the blocking thread pool
    async fn blocking_reader_task(
        reader: Arc<Mutex<Box<dyn Read + Send>>>,
        data_tx: mpsc::Sender<ReadResult>,
        cancel_token: CancellationToken,
        session_id: SessionId,
    ) {
        loop {
            if cancel_token.is_cancelled() {
                trace!(session_id = %session_id, "Blocking reader cancelled");
                break;
            }

            let reader_clone = reader.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                let mut reader_guard = reader_clone.lock();
                match reader_guard.read(&mut buf) {
                    Ok(0) => ReadResult::Eof,
                    Ok(n) => ReadResult::Data(buf[..n].to_vec()),
                    Err(e) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe
                            || e.kind() == std::io::ErrorKind::UnexpectedEof
                        {
                            ReadResult::Eof
                        } else {
                            ReadResult::Error(e.to_string())
                        }
                    }
                }
            })
            .await;

            match result {
                Ok(read_result) => {
                    let is_terminal = matches!(read_result, ReadResult::Eof | ReadResult::Error(_));
                    if data_tx.send(read_result).await.is_err() {
                        trace!(session_id = %session_id, "Data channel closed, reader exiting");
                        break;
                    }
                    if is_terminal {
                        break;
                    }
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "spawn_blocking failed");
                    let _ = data_tx.send(ReadResult::Error(e.to_string())).await;
                    break;
                }
            }
        }
    }

    fn handle_output(&mut self, data: &[u8]) {
        self.last_data_time = Instant::now();

        let text = self.carry.decode(data);
        self.pending.push_str(&text);

        trace!(
            session_id = %self.session_id,
            bytes = data.len(),
            pending = self.pending.len(),
            "Received PTY output"
        );

        if self.pending.len() >= self.config.chunk_max_bytes {
            self.flush();
        }
    }

    fn should_flush_timeout(&self) -> bool {
        !self.pending.is_empty() && self.last_data_time.elapsed() >= self.config.flush_timeout
    }

    /// Deliver pending output as whole frames, pausing on a full buffer
    ///
    /// Undelivered text stays parked in `pending`; nothing is dropped here.
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending);
        let mut offset = 0;

        while offset < pending.len() {
            if self.registry.session_buffer_full(self.session_id) {
                self.pending.push_str(&pending[offset..]);
                self.assert_paused();
                return;
            }

            let end = floor_char_boundary(&pending, offset + self.config.chunk_max_bytes);
            let chunk = &pending[offset..end];
            offset = end;

            let delivered = self.registry.try_broadcast_to_session(
                self.session_id,
                ServerMessage::Output {
                    data: chunk.to_string(),
                },
            );
            let attached = self.registry.session_client_count(self.session_id);
            if delivered < attached {
                debug!(
                    session_id = %self.session_id,
                    delivered,
                    attached,
                    "Backpressure drop: frame skipped for slow client"
                );
            }
        }
    }

    /// Final delivery on EOF: waits for buffer space instead of pausing
    async fn flush_remaining(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        for chunk in split_utf8_chunks(&pending, self.config.chunk_max_bytes) {
            self.registry
                .broadcast_to_session(
                    self.session_id,
                    ServerMessage::Output {
                        data: chunk.to_string(),
                    },
                )
                .await;
        }
    }

    fn assert_paused(&mut self) {
        if !self.paused {
            self.paused = true;
            warn!(session_id = %self.session_id, "Backpressure asserted, pausing PTY reads");
        }
    }

    fn try_resume(&mut self) {
        if self
            .registry
            .session_drained(self.session_id, self.config.low_water_frames)
        {
            debug!(session_id = %self.session_id, "Backpressure released, resuming PTY reads");
            self.paused = false;
            self.flush();
        }
    }
}
