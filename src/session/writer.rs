//! Ordered writer task for one connection.
//!
//! Frames for a peer are funneled through an mpsc channel into a dedicated
//! writer task, so outbound order is the submission order and no caller
//! ever blocks a thread on pipe I/O:
//!
//! ```text
//! notify()  ─┐
//! request() ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Pipe
//! response ─┘
//! ```
//!
//! The task stamps the per-connection ack counter at dequeue time (so acks
//! are monotonic in write order), batches ready frames and writes them with
//! vectored I/O.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::sequence::SequenceCounter;
use crate::error::{PeerlinkError, Result};
use crate::protocol::{encode_prefix, CommandType};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame queued for the writer task.
///
/// The ack field is stamped by the task itself; producers only supply the
/// command flags and body.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Command-type flags for the envelope.
    pub flags: CommandType,
    /// Body bytes (may be empty, e.g. for probe frames).
    pub body: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(flags: CommandType, body: Bytes) -> Self {
        Self { flags, body }
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; a session swaps in a fresh handle after reconnecting
/// while external references keep using the session itself.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits if backpressure is active, timing out after the configured
    /// duration. Fails with [`PeerlinkError::ConnectionBroken`] once the
    /// writer task has exited.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let current = self.pending.load(Ordering::Acquire);
        if current >= self.max_pending {
            self.wait_for_backpressure().await?;
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            PeerlinkError::ConnectionBroken
        })
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                return Err(PeerlinkError::BackpressureTimeout);
            }
            tokio::time::sleep(check_interval).await;
        }
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task is still accepting frames.
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn the writer task for one connection.
///
/// Returns a handle for queuing frames and the task's `JoinHandle`. The task
/// ends cleanly when every handle is dropped, or with an error on a
/// transport fault.
pub fn spawn_writer_task<W>(
    writer: W,
    header_bytes: Vec<u8>,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, header_bytes, pending));

    (handle, task)
}

/// Frame with its prefix encoded, ready for vectored I/O.
struct EncodedFrame {
    prefix: Vec<u8>,
    body: Bytes,
}

impl EncodedFrame {
    #[inline]
    fn size(&self) -> usize {
        self.prefix.len() + self.body.len()
    }
}

/// Main writer loop: dequeue, stamp the ack counter, batch, write.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    header_bytes: Vec<u8>,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let acks = SequenceCounter::new();

    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(encode_one(&header_bytes, &acks, first));

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(encode_one(&header_bytes, &acks, frame)),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);

        if let Err(e) = result {
            tracing::warn!("writer task stopping after transport fault: {}", e);
            return Err(e);
        }
    }
}

fn encode_one(header_bytes: &[u8], acks: &SequenceCounter, frame: OutboundFrame) -> EncodedFrame {
    let prefix = encode_prefix(
        header_bytes,
        acks.next(),
        frame.flags,
        frame.body.len() as u32,
    );
    EncodedFrame {
        prefix,
        body: frame.body,
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[EncodedFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.prefix));
        if !frame.body.is_empty() {
            slices.push(IoSlice::new(&frame.body));
        }
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();

    let written = writer.write_vectored(&slices).await?;
    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }
    if written == 0 {
        return Err(PeerlinkError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    // Partial write: continue with the remaining byte ranges.
    let mut total_written = written;
    while total_written < total_size {
        let remaining_slices = build_remaining_slices(batch, total_written);
        if remaining_slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining_slices).await?;
        if written == 0 {
            return Err(PeerlinkError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice array for data still unwritten after a partial write.
fn build_remaining_slices(batch: &[EncodedFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let prefix_end = skipped + frame.prefix.len();
        if skip_bytes < prefix_end {
            let start = skip_bytes.saturating_sub(skipped);
            slices.push(IoSlice::new(&frame.prefix[start..]));
        }
        skipped = prefix_end;

        if !frame.body.is_empty() {
            let body_end = skipped + frame.body.len();
            if skip_bytes < body_end {
                let start = skip_bytes.saturating_sub(skipped);
                slices.push(IoSlice::new(&frame.body[start..]));
            }
            skipped = body_end;
        }
    }

    slices
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameDecoder, DEFAULT_HEADER_BYTES};
    use tokio::io::{duplex, AsyncReadExt};

    fn spawn_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        spawn_writer_task(writer, DEFAULT_HEADER_BYTES.to_vec(), WriterConfig::default())
    }

    #[tokio::test]
    async fn test_frames_arrive_decodable() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_default(client);

        handle
            .send(OutboundFrame::new(
                CommandType::BUSINESS,
                Bytes::from_static(b"hello"),
            ))
            .await
            .unwrap();

        let mut decoder = FrameDecoder::new(DEFAULT_HEADER_BYTES.to_vec(), 1024);
        let mut buf = vec![0u8; 256];
        let mut frames = Vec::new();
        while frames.is_empty() {
            let n = server.read(&mut buf).await.unwrap();
            frames = decoder.push(&buf[..n]).unwrap();
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].body[..], b"hello");
        assert_eq!(frames[0].flags, CommandType::BUSINESS);
    }

    #[tokio::test]
    async fn test_acks_monotonic_in_write_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_default(client);

        for i in 0..20u8 {
            handle
                .send(OutboundFrame::new(
                    CommandType::BUSINESS,
                    Bytes::copy_from_slice(&[i]),
                ))
                .await
                .unwrap();
        }

        let mut decoder = FrameDecoder::new(DEFAULT_HEADER_BYTES.to_vec(), 1024);
        let mut buf = vec![0u8; 4096];
        let mut frames = Vec::new();
        while frames.len() < 20 {
            let n = server.read(&mut buf).await.unwrap();
            frames.extend(decoder.push(&buf[..n]).unwrap());
        }

        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.ack, (i + 1) as u64);
            assert_eq!(frame.body[0], i as u8);
        }
    }

    #[tokio::test]
    async fn test_send_after_task_exit_is_connection_broken() {
        let (client, server) = duplex(4096);
        let (handle, task) = spawn_default(client);

        drop(server);
        // Force a write fault, then wait for the task to notice.
        let _ = handle
            .send(OutboundFrame::new(CommandType::BUSINESS, Bytes::from_static(b"x")))
            .await;
        let _ = task.await;

        let result = handle
            .send(OutboundFrame::new(CommandType::BUSINESS, Bytes::from_static(b"y")))
            .await;
        assert!(matches!(result, Err(PeerlinkError::ConnectionBroken)));
    }

    #[tokio::test]
    async fn test_backpressure_timeout_when_transport_stalls() {
        // Tiny duplex that is never drained: the first write fills it and
        // the writer task blocks, so the pending count only climbs.
        let (client, _server) = duplex(16);
        let config = WriterConfig {
            max_pending_frames: 4,
            channel_capacity: 64,
            backpressure_timeout: Duration::from_millis(100),
        };
        let (handle, _task) =
            spawn_writer_task(client, DEFAULT_HEADER_BYTES.to_vec(), config);

        let mut result = Ok(());
        for _ in 0..16 {
            result = handle
                .send(OutboundFrame::new(
                    CommandType::BUSINESS,
                    Bytes::from(vec![0u8; 64]),
                ))
                .await;
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(PeerlinkError::BackpressureTimeout)));
        // The stalled frames are still accounted against the gate.
        assert!(handle.pending_count() >= 1);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_remaining_slices_partial_prefix() {
        let frame = EncodedFrame {
            prefix: vec![0u8; 28],
            body: Bytes::from_static(b"hello"),
        };
        let batch = vec![frame];

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), 28 - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_skip_prefix() {
        let frame = EncodedFrame {
            prefix: vec![0u8; 28],
            body: Bytes::from_static(b"hello"),
        };
        let batch = vec![frame];

        let slices = build_remaining_slices(&batch, 28);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 5);
    }
}
