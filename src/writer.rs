//! Dedicated writer task for outbound frames.
//!
//! Every connection endpoint has exactly one writer task that owns the write
//! half of the transport and drains an mpsc channel of pre-encoded frames.
//! Handlers and call surfaces submit through a cloneable [`FrameWriter`]
//! handle, so frame submission is non-blocking and never contends on a lock.
//!
//! ```text
//! call 1 ─┐
//! call 2 ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► writer task ─► transport
//! call N ─┘
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{Header, HEADER_SIZE};

/// A frame ready to be written to the transport.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (11 bytes).
    header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for close-send frames).
    payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Create a new outbound frame with empty payload.
    #[inline]
    pub fn empty(header: &Header) -> Self {
        Self {
            header: header.encode(),
            payload: Bytes::new(),
        }
    }
}

/// Handle for submitting frames to the writer task.
///
/// Cheaply cloneable; shared by every call on the connection.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl FrameWriter {
    /// Submit a frame for writing.
    ///
    /// Returns [`Error::ConnectionClosed`] if the writer task has exited.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }
}

/// Spawn the writer task for one connection.
///
/// Returns the submission handle and the task's join handle.
pub fn spawn_writer_task<W>(writer: W) -> (FrameWriter, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer));
    (FrameWriter { tx }, task)
}

/// Writer loop: drain the channel onto the transport, flushing once per
/// drained burst rather than once per frame.
async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            // all senders dropped, clean shutdown
            None => return Ok(()),
        };

        write_frame(&mut writer, &first).await?;

        while let Ok(frame) = rx.try_recv() {
            write_frame(&mut writer, &frame).await?;
        }

        writer.flush().await?;
    }
}

async fn write_frame<W>(writer: &mut W, frame: &OutboundFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.header).await?;
    if !frame.payload.is_empty() {
        writer.write_all(&frame.payload).await?;
    }
    Ok(())
}
