//! Per-connection server loop.
//!
//! One task per accepted connection: it sends the HELLO schema, then reads
//! frames and demultiplexes them by call ID. The first frame of an unknown
//! call ID opens the call and spawns its handler task; subsequent frames are
//! routed into the call's inbound queue. Handlers never touch the transport
//! directly, they write through the connection's writer task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::channel::{inbound_queue, CallWriter, InboundItem};
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::governor::CallToken;
use crate::protocol::{flags, FrameBuffer, Frame, Header, HELLO_METHOD_ID};
use crate::server::registry::{MethodRegistry, ServerCall};
use crate::status::Status;
use crate::writer::{spawn_writer_task, FrameWriter, OutboundFrame};

const READ_BUF_SIZE: usize = 16 * 1024;

/// Routing state of one in-flight call.
struct ActiveCall {
    inbound: tokio::sync::mpsc::UnboundedSender<InboundItem>,
    token: CallToken,
}

/// Demultiplexing state for one connection.
#[derive(Default)]
struct ConnectionCalls {
    active: HashMap<u32, ActiveCall>,
    /// Highest call ID ever opened. Call IDs are client-assigned in
    /// increasing order, so an unknown ID at or below this mark is a stale
    /// frame for a call that already finished, not a new call.
    high_water: u32,
}

type CallMap = Arc<Mutex<ConnectionCalls>>;

/// Serve one connection until the peer disconnects or shutdown fires.
pub(crate) async fn run_connection<IO>(
    io: IO,
    registry: Arc<MethodRegistry>,
    shutdown: CancellationToken,
) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, write_half) = tokio::io::split(io);
    let (writer, writer_task) = spawn_writer_task(write_half);

    send_hello(&registry, &writer)?;

    let calls: CallMap = Arc::new(Mutex::new(ConnectionCalls::default()));
    let mut parser = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = tokio::select! {
            res = reader.read(&mut buf) => match res {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("connection read failed: {e}");
                    break;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let frames = match parser.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("protocol violation, closing connection: {e}");
                break;
            }
        };

        for frame in frames {
            dispatch_frame(frame, &registry, &writer, &calls);
        }
    }

    // Fire every in-flight call so its handler unwinds promptly.
    let drained: Vec<ActiveCall> = match calls.lock() {
        Ok(mut state) => state.active.drain().map(|(_, call)| call).collect(),
        Err(_) => Vec::new(),
    };
    for call in drained {
        call.token.cancel();
    }

    drop(writer);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!("writer task aborted: {e}");
            Ok(())
        }
    }
}

/// Send the schema handshake as the first frame on the connection.
fn send_hello(registry: &MethodRegistry, writer: &FrameWriter) -> Result<()> {
    let schema = registry.build_schema();
    let payload = MsgPackCodec::encode(&schema)?;
    let header = Header::new(
        HELLO_METHOD_ID,
        flags::RESPONSE_DATA,
        0,
        payload.len() as u32,
    );
    writer.send(OutboundFrame::new(&header, Bytes::from(payload)))
}

/// Route one frame to its call, opening the call if this is its first frame.
fn dispatch_frame(frame: Frame, registry: &Arc<MethodRegistry>, writer: &FrameWriter, calls: &CallMap) {
    if frame.is_hello() || frame.is_response() {
        tracing::warn!(
            method_id = frame.method_id(),
            call_id = frame.call_id(),
            "ignoring server-direction frame from client"
        );
        return;
    }

    let call_id = frame.call_id();

    if frame.is_cancel() {
        let reason: Status = MsgPackCodec::decode(frame.payload())
            .unwrap_or_else(|_| Status::cancelled("call cancelled by peer"));
        let Ok(state) = calls.lock() else { return };
        if let Some(call) = state.active.get(&call_id) {
            call.token.fire_with_code(reason.code());
            let _ = call.inbound.send(InboundItem::Aborted(reason));
        }
        return;
    }

    let Ok(mut state) = calls.lock() else { return };

    if let Some(call) = state.active.get(&call_id) {
        if frame.is_data() {
            let _ = call.inbound.send(InboundItem::Data(frame.payload.clone()));
        }
        if frame.is_end_stream() {
            let _ = call.inbound.send(InboundItem::Eos);
        }
        return;
    }

    // A call emits exactly one trailer. Frames trailing in after the call
    // finished (say, a close-send delayed into a later read) must not open
    // it again.
    if call_id <= state.high_water {
        tracing::debug!(call_id, "dropping stale frame for finished call");
        return;
    }

    // First frame of a new call. A bare close-send still opens it: a
    // client-streaming call may end with zero messages sent.
    let method_id = frame.method_id();
    let Some(handler) = registry.get(method_id) else {
        state.high_water = call_id;
        drop(state);
        let name = format!("unknown method ID {method_id}");
        tracing::warn!(call_id, "{name}");
        CallWriter::new(writer.clone(), method_id, call_id)
            .send_trailer(&Status::unimplemented(name));
        return;
    };

    let (tx, rx) = inbound_queue();
    if frame.is_data() {
        let _ = tx.send(InboundItem::Data(frame.payload.clone()));
    }
    if frame.is_end_stream() {
        let _ = tx.send(InboundItem::Eos);
    }

    let token = CallToken::new();
    state.high_water = call_id;
    state.active.insert(
        call_id,
        ActiveCall {
            inbound: tx,
            token: token.clone(),
        },
    );
    drop(state);

    tracing::debug!(
        method = registry.name(method_id).unwrap_or("?"),
        call_id,
        "call opened"
    );

    let call = ServerCall {
        inbound: rx,
        writer: CallWriter::new(writer.clone(), method_id, call_id),
        token,
    };
    let fut = handler.invoke(call);
    let calls = calls.clone();
    tokio::spawn(async move {
        fut.await;
        if let Ok(mut state) = calls.lock() {
            state.active.remove(&call_id);
        }
        tracing::debug!(call_id, "call finished");
    });
}
