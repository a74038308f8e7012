//! RPC client over one persistent connection.
//!
//! [`Client::connect`] establishes the transport, reads the server's HELLO
//! schema, and spawns a read task that demultiplexes response frames into
//! per-call queues by call ID. Call IDs are assigned from an atomic counter,
//! so any number of calls can be in flight concurrently on the one
//! connection.
//!
//! Each calling convention has its own surface: [`Client::unary`] resolves
//! to the single response, [`Client::server_streaming`] returns a
//! [`CallStream`], [`Client::client_streaming`] returns a
//! [`ClientStreamCall`] sink, and [`Client::bidi_streaming`] returns an
//! independent sink/stream pair.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::{inbound_queue, InboundItem};
use crate::codec::MsgPackCodec;
use crate::error::{Error, Result};
use crate::governor::CallToken;
use crate::protocol::{flags, FrameBuffer, Header};
use crate::schema::{CallKind, MethodSpec, Schema};
use crate::status::{CallError, Status};
use crate::writer::{spawn_writer_task, FrameWriter, OutboundFrame};

const READ_BUF_SIZE: usize = 16 * 1024;

/// Routing table of in-flight calls. `closed` flips once the read loop
/// exits; it is checked under the same lock that guards insertion, so a call
/// can never register against a connection that is already gone.
#[derive(Default)]
struct PendingState {
    calls: HashMap<u32, mpsc::UnboundedSender<InboundItem>>,
    closed: bool,
}

type PendingMap = Arc<Mutex<PendingState>>;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Upper bound on how long the caller is willing to wait. When it
    /// elapses the client stops waiting, tells the server, and the call
    /// fails with `DeadlineExceeded`.
    pub deadline: Option<Duration>,
}

impl CallOptions {
    /// Options with the given deadline.
    pub fn deadline(duration: Duration) -> Self {
        Self {
            deadline: Some(duration),
        }
    }
}

/// Outbound half of one client-side call: request frames stamped with the
/// call's IDs, plus pending-map cleanup.
#[derive(Clone)]
struct CallControl {
    writer: FrameWriter,
    pending: PendingMap,
    method_id: u16,
    call_id: u32,
}

impl CallControl {
    fn send_message<T: Serialize>(&self, message: &T) -> std::result::Result<(), CallError> {
        let payload = MsgPackCodec::encode(message)?;
        let header = Header::new(
            self.method_id,
            flags::REQUEST_DATA,
            self.call_id,
            payload.len() as u32,
        );
        self.writer
            .send(OutboundFrame::new(&header, Bytes::from(payload)))?;
        Ok(())
    }

    fn send_close(&self) -> std::result::Result<(), CallError> {
        let header = Header::new(self.method_id, flags::CLOSE_SEND, self.call_id, 0);
        self.writer.send(OutboundFrame::empty(&header))?;
        Ok(())
    }

    /// Abort the call, carrying the reason so the server's governor can tell
    /// a cancel from a deadline expiry. Also stops routing for this call;
    /// a dead connection is ignored since the call is over either way.
    fn send_cancel(&self, reason: &Status) {
        self.unregister();
        let payload = match MsgPackCodec::encode(reason) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("cannot encode cancel reason: {e}");
                return;
            }
        };
        let header = Header::new(
            self.method_id,
            flags::CANCEL,
            self.call_id,
            payload.len() as u32,
        );
        let _ = self
            .writer
            .send(OutboundFrame::new(&header, Bytes::from(payload)));
    }

    fn unregister(&self) {
        if let Ok(mut state) = self.pending.lock() {
            state.calls.remove(&self.call_id);
        }
    }
}

/// RPC client bound to one connection.
pub struct Client {
    writer: FrameWriter,
    methods: HashMap<String, MethodSpec>,
    pending: PendingMap,
    next_call_id: AtomicU32,
    read_task: JoinHandle<()>,
}

impl Client {
    /// Connect over TCP and complete the schema handshake.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_transport(stream).await
    }

    /// Build a client on an already-established transport.
    ///
    /// Waits for the server's HELLO frame before returning.
    pub async fn from_transport<IO>(io: IO) -> Result<Self>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (writer, _writer_task) = spawn_writer_task(write_half);

        let pending: PendingMap = Arc::new(Mutex::new(PendingState::default()));
        let (hello_tx, hello_rx) = oneshot::channel();
        let read_task = tokio::spawn(read_loop(read_half, pending.clone(), hello_tx));

        let schema = hello_rx
            .await
            .map_err(|_| Error::Handshake("connection closed before HELLO".to_string()))??;
        tracing::debug!(methods = schema.methods().len(), "handshake complete");

        Ok(Self {
            writer,
            methods: schema.by_name(),
            pending,
            next_call_id: AtomicU32::new(1),
            read_task,
        })
    }

    /// The schema received in the handshake.
    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec> {
        self.methods.values()
    }

    fn start_call(
        &self,
        method: &str,
        kind: CallKind,
    ) -> std::result::Result<(CallControl, mpsc::UnboundedReceiver<InboundItem>), CallError> {
        let spec = self
            .methods
            .get(method)
            .ok_or_else(|| Error::UnknownMethod(method.to_string()))?;
        if spec.kind != kind {
            return Err(Error::Protocol(format!(
                "method {method} is {:?}, called as {kind:?}",
                spec.kind
            ))
            .into());
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = inbound_queue();
        {
            let mut state = self.pending.lock().map_err(|_| Error::ConnectionClosed)?;
            if state.closed {
                return Err(Error::ConnectionClosed.into());
            }
            state.calls.insert(call_id, tx);
        }

        Ok((
            CallControl {
                writer: self.writer.clone(),
                pending: self.pending.clone(),
                method_id: spec.id,
                call_id,
            },
            rx,
        ))
    }

    /// Issue a unary call and wait for its single response.
    pub async fn unary<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
    ) -> std::result::Result<Resp, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.unary_with(method, request, CallOptions::default())
            .await
    }

    /// Issue a unary call with per-call options.
    ///
    /// When the deadline elapses first, the client stops waiting, sends the
    /// server a cancel frame carrying `DeadlineExceeded`, and fails with that
    /// status. Whatever the server produces afterwards is dropped.
    pub async fn unary_with<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        options: CallOptions,
    ) -> std::result::Result<Resp, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (ctl, mut rx) = self.start_call(method, CallKind::Unary)?;
        ctl.send_message(request)?;
        ctl.send_close()?;

        let result = match options.deadline {
            None => await_single(&mut rx, &ctl).await,
            Some(limit) => {
                let deadline = CallToken::new().with_deadline(limit);
                tokio::select! {
                    result = await_single(&mut rx, &ctl) => result,
                    _ = deadline.cancelled() => {
                        let status =
                            Status::deadline_exceeded(format!("deadline of {limit:?} exceeded"));
                        ctl.send_cancel(&status);
                        Err(CallError::Status(status))
                    }
                }
            }
        };
        if result.is_err() {
            ctl.unregister();
        }
        result
    }

    /// Issue a server-streaming call. The request goes out immediately; the
    /// responses arrive on the returned stream.
    pub fn server_streaming<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
    ) -> std::result::Result<CallStream<Resp>, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (ctl, rx) = self.start_call(method, CallKind::ServerStream)?;
        ctl.send_message(request)?;
        ctl.send_close()?;
        Ok(CallStream::new(rx, ctl))
    }

    /// Open a client-streaming call. Messages go out through the returned
    /// handle; [`ClientStreamCall::finish`] half-closes and waits for the
    /// aggregate response.
    pub fn client_streaming<Req, Resp>(
        &self,
        method: &str,
    ) -> std::result::Result<ClientStreamCall<Req, Resp>, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (ctl, rx) = self.start_call(method, CallKind::ClientStream)?;
        Ok(ClientStreamCall {
            ctl,
            rx,
            closed: false,
            _marker: PhantomData,
        })
    }

    /// Open a bidirectional-streaming call.
    ///
    /// The returned halves are independent: the sink can keep sending while
    /// the stream is being drained, from different tasks if desired.
    pub fn bidi_streaming<Req, Resp>(
        &self,
        method: &str,
    ) -> std::result::Result<(CallSink<Req>, CallStream<Resp>), CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (ctl, rx) = self.start_call(method, CallKind::BidiStream)?;
        let sink = CallSink {
            ctl: ctl.clone(),
            closed: false,
            _marker: PhantomData,
        };
        Ok((sink, CallStream::new(rx, ctl)))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.read_task.abort();
        // the abort can land before the read loop's own cleanup runs, and
        // stream handles outliving the client must still observe disconnect
        if let Ok(mut state) = self.pending.lock() {
            state.closed = true;
            state.calls.clear();
        }
    }
}

/// Wait for the one response message and the trailer of a unary-shaped call.
async fn await_single<Resp: DeserializeOwned>(
    rx: &mut mpsc::UnboundedReceiver<InboundItem>,
    ctl: &CallControl,
) -> std::result::Result<Resp, CallError> {
    let mut response: Option<Resp> = None;
    loop {
        match rx.recv().await {
            Some(InboundItem::Data(bytes)) => match MsgPackCodec::decode(&bytes) {
                Ok(message) => response = Some(message),
                Err(e) => {
                    let status = Status::internal(format!("cannot decode response: {e}"));
                    ctl.send_cancel(&status);
                    return Err(CallError::Status(status));
                }
            },
            Some(InboundItem::Eos) => {
                return response.ok_or_else(|| {
                    CallError::Transport(Error::Protocol(
                        "call completed without a response message".to_string(),
                    ))
                });
            }
            Some(InboundItem::Aborted(status)) => return Err(CallError::Status(status)),
            None => return Err(CallError::Transport(Error::ConnectionClosed)),
        }
    }
}

/// Receiving half of a server-streaming or bidirectional call.
pub struct CallStream<Resp> {
    rx: mpsc::UnboundedReceiver<InboundItem>,
    ctl: CallControl,
    done: bool,
    _marker: PhantomData<fn() -> Resp>,
}

impl<Resp: DeserializeOwned> CallStream<Resp> {
    fn new(rx: mpsc::UnboundedReceiver<InboundItem>, ctl: CallControl) -> Self {
        Self {
            rx,
            ctl,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Receive the next response.
    ///
    /// `Ok(None)` once the server closes the stream with an OK trailer, and
    /// sticky afterwards. A non-OK trailer surfaces as `CallError::Status`.
    pub async fn next(&mut self) -> std::result::Result<Option<Resp>, CallError> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(InboundItem::Data(bytes)) => match MsgPackCodec::decode(&bytes) {
                Ok(message) => Ok(Some(message)),
                Err(e) => {
                    self.done = true;
                    let status = Status::internal(format!("cannot decode response: {e}"));
                    self.ctl.send_cancel(&status);
                    Err(CallError::Status(status))
                }
            },
            Some(InboundItem::Eos) => {
                self.done = true;
                Ok(None)
            }
            Some(InboundItem::Aborted(status)) => {
                self.done = true;
                Err(CallError::Status(status))
            }
            None => {
                self.done = true;
                Err(CallError::Transport(Error::ConnectionClosed))
            }
        }
    }

    /// Abandon the call. The server's governor observes the cancellation the
    /// next time the handler polls its token.
    pub fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.ctl
            .send_cancel(&Status::cancelled("call cancelled by caller"));
    }
}

/// Client-streaming call handle.
pub struct ClientStreamCall<Req, Resp> {
    ctl: CallControl,
    rx: mpsc::UnboundedReceiver<InboundItem>,
    closed: bool,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> ClientStreamCall<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    /// Send one request message.
    pub fn send(&mut self, message: &Req) -> std::result::Result<(), CallError> {
        if self.closed {
            return Err(CallError::Status(Status::failed_precondition(
                "send on closed stream",
            )));
        }
        self.ctl.send_message(message)
    }

    /// Half-close the send direction and wait for the aggregate response.
    pub async fn finish(mut self) -> std::result::Result<Resp, CallError> {
        self.closed = true;
        self.ctl.send_close()?;
        let result = await_single(&mut self.rx, &self.ctl).await;
        if result.is_err() {
            self.ctl.unregister();
        }
        result
    }

    /// Abandon the call without waiting for a response.
    pub fn cancel(self) {
        self.ctl
            .send_cancel(&Status::cancelled("call cancelled by caller"));
    }
}

/// Sending half of a bidirectional call.
pub struct CallSink<Req> {
    ctl: CallControl,
    closed: bool,
    _marker: PhantomData<fn(Req)>,
}

impl<Req: Serialize> CallSink<Req> {
    /// Send one request message.
    pub fn send(&mut self, message: &Req) -> std::result::Result<(), CallError> {
        if self.closed {
            return Err(CallError::Status(Status::failed_precondition(
                "send on closed stream",
            )));
        }
        self.ctl.send_message(message)
    }

    /// Half-close the send direction. Idempotent; the receive half keeps
    /// draining whatever the server still has to say.
    pub fn close_send(&mut self) -> std::result::Result<(), CallError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ctl.send_close()
    }

    /// Abort the whole call.
    pub fn cancel(&mut self) {
        self.closed = true;
        self.ctl
            .send_cancel(&Status::cancelled("call cancelled by caller"));
    }
}

/// Read loop: parse frames off the transport and route them by call ID.
///
/// The first frame must be the HELLO; it resolves the handshake. A trailer
/// removes its call from the pending map, so late frames for a finished or
/// abandoned call are dropped silently.
async fn read_loop<R>(
    mut reader: R,
    pending: PendingMap,
    hello_tx: oneshot::Sender<Result<Schema>>,
) where
    R: AsyncRead + Unpin,
{
    let mut hello_tx = Some(hello_tx);
    let mut parser = FrameBuffer::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    'outer: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("client read failed: {e}");
                break;
            }
        };

        let frames = match parser.push(&buf[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("protocol violation from server: {e}");
                break;
            }
        };

        for frame in frames {
            if frame.is_hello() {
                if let Some(tx) = hello_tx.take() {
                    let _ = tx.send(MsgPackCodec::decode(frame.payload()));
                }
                continue;
            }
            if hello_tx.is_some() {
                tracing::warn!("frame before HELLO, closing");
                break 'outer;
            }
            if !frame.is_response() {
                tracing::warn!(call_id = frame.call_id(), "ignoring client-direction frame");
                continue;
            }

            let Ok(mut state) = pending.lock() else {
                break 'outer;
            };
            if frame.is_data() {
                if let Some(tx) = state.calls.get(&frame.call_id()) {
                    let _ = tx.send(InboundItem::Data(frame.payload.clone()));
                }
            }
            if frame.is_end_stream() {
                if let Some(tx) = state.calls.remove(&frame.call_id()) {
                    let status: Status = MsgPackCodec::decode(frame.payload())
                        .unwrap_or_else(|e| Status::internal(format!("cannot decode trailer: {e}")));
                    let item = if status.is_ok() {
                        InboundItem::Eos
                    } else {
                        InboundItem::Aborted(status)
                    };
                    let _ = tx.send(item);
                }
            }
        }
    }

    if let Some(tx) = hello_tx.take() {
        let _ = tx.send(Err(Error::Handshake(
            "connection closed before HELLO".to_string(),
        )));
    }
    // all routing senders drop here, so in-flight calls observe disconnect;
    // the closed flag keeps later calls from registering into the void
    if let Ok(mut state) = pending.lock() {
        state.closed = true;
        state.calls.clear();
    }
}
