//! Stream channel: typed send/receive halves over one call's message queues.
//!
//! Each direction of a call is an ordered FIFO of messages followed by a
//! single end-of-stream signal. The halves enforce the channel contract:
//! sending after close is `FailedPrecondition`, end-of-stream is delivered
//! exactly once and is sticky afterwards, and cancellation/deadline expiry
//! surfaces as the governor's status instead of a message.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::codec::MsgPackCodec;
use crate::governor::CallToken;
use crate::protocol::{flags, Header};
use crate::status::{Status, StatusCode};
use crate::writer::{FrameWriter, OutboundFrame};

/// One item routed from the connection read loop into a call's inbound queue.
#[derive(Debug)]
pub(crate) enum InboundItem {
    /// One message payload, in arrival order.
    Data(Bytes),
    /// The peer half-closed its direction; no further messages will arrive.
    Eos,
    /// The call was aborted with the given status.
    Aborted(Status),
}

/// Create the inbound queue for one call.
pub(crate) fn inbound_queue() -> (
    mpsc::UnboundedSender<InboundItem>,
    mpsc::UnboundedReceiver<InboundItem>,
) {
    mpsc::unbounded_channel()
}

/// Raw outbound half of a server-side call: frames stamped with this call's
/// method and call IDs.
#[derive(Clone)]
pub(crate) struct CallWriter {
    writer: FrameWriter,
    method_id: u16,
    call_id: u32,
}

impl CallWriter {
    pub(crate) fn new(writer: FrameWriter, method_id: u16, call_id: u32) -> Self {
        Self {
            writer,
            method_id,
            call_id,
        }
    }

    /// Send one response message.
    pub(crate) fn send_message<T: Serialize>(&self, message: &T) -> Result<(), Status> {
        let payload = MsgPackCodec::encode(message)
            .map_err(|e| Status::internal(format!("cannot encode response: {e}")))?;
        let header = Header::new(
            self.method_id,
            flags::RESPONSE_DATA,
            self.call_id,
            payload.len() as u32,
        );
        self.writer
            .send(OutboundFrame::new(&header, Bytes::from(payload)))
            .map_err(|_| Status::cancelled("connection closed"))
    }

    /// Send the call's terminal status.
    ///
    /// A dead connection is not an error here: the peer is gone and there is
    /// nobody left to tell.
    pub(crate) fn send_trailer(&self, status: &Status) {
        let payload = match MsgPackCodec::encode(status) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("cannot encode trailer status: {e}");
                return;
            }
        };
        let header = Header::new(
            self.method_id,
            flags::TRAILER,
            self.call_id,
            payload.len() as u32,
        );
        if self.writer.send(OutboundFrame::new(&header, Bytes::from(payload))).is_err() {
            tracing::debug!(call_id = self.call_id, "trailer dropped, peer gone");
        }
    }
}

/// Typed sending half of a server-side stream.
pub struct StreamSender<T> {
    writer: CallWriter,
    token: CallToken,
    closed: bool,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> StreamSender<T> {
    pub(crate) fn new(writer: CallWriter, token: CallToken) -> Self {
        Self {
            writer,
            token,
            closed: false,
            _marker: PhantomData,
        }
    }

    /// Send one message on the stream.
    ///
    /// Fails with `FailedPrecondition` once the send direction is closed,
    /// and with the governor's status once the call is cancelled or past its
    /// deadline. A send after expiry never reaches the peer.
    pub fn send(&mut self, message: &T) -> Result<(), Status> {
        if self.closed {
            return Err(Status::failed_precondition("send on closed stream"));
        }
        self.token.check()?;
        self.writer.send_message(message)
    }

    /// Close the send direction. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// The call's cancellation token, for manual polling during long work.
    pub fn token(&self) -> &CallToken {
        &self.token
    }
}

/// Typed receiving half of a stream.
pub struct StreamReceiver<T> {
    rx: mpsc::UnboundedReceiver<InboundItem>,
    token: CallToken,
    /// Status code for undecodable messages: `InvalidArgument` for requests
    /// (malformed caller input), `Internal` for responses.
    malformed: StatusCode,
    eos: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StreamReceiver<T> {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<InboundItem>,
        token: CallToken,
        malformed: StatusCode,
    ) -> Self {
        Self {
            rx,
            token,
            malformed,
            eos: false,
            _marker: PhantomData,
        }
    }

    /// Receive the next message.
    ///
    /// Suspends until a message arrives, the peer half-closes (`Ok(None)`,
    /// sticky on repeated calls), or the call is aborted (the governor's or
    /// the peer's status). Messages arrive in the order they were sent.
    pub async fn recv(&mut self) -> Result<Option<T>, Status> {
        if self.eos {
            return Ok(None);
        }

        let item = tokio::select! {
            item = self.rx.recv() => item,
            _ = self.token.cancelled() => {
                self.eos = true;
                return Err(self
                    .token
                    .cancel_status()
                    .unwrap_or_else(|| Status::cancelled("call cancelled")));
            }
        };

        match item {
            Some(InboundItem::Data(bytes)) => match MsgPackCodec::decode(&bytes) {
                Ok(message) => Ok(Some(message)),
                Err(e) => {
                    self.eos = true;
                    Err(Status::new(
                        self.malformed,
                        format!("cannot decode message: {e}"),
                    ))
                }
            },
            Some(InboundItem::Eos) => {
                self.eos = true;
                Ok(None)
            }
            Some(InboundItem::Aborted(status)) => {
                self.eos = true;
                Err(status)
            }
            // read loop gone: the peer vanished mid-call
            None => {
                self.eos = true;
                Err(Status::cancelled("peer disconnected"))
            }
        }
    }

    /// The call's cancellation token.
    pub fn token(&self) -> &CallToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::spawn_writer_task;
    use tokio::io::duplex;

    fn test_writer() -> CallWriter {
        let (local, _remote) = duplex(4096);
        let (writer, _task) = spawn_writer_task(local);
        CallWriter::new(writer, 1, 7)
    }

    #[tokio::test]
    async fn test_send_after_close_is_failed_precondition() {
        let mut sender: StreamSender<i64> = StreamSender::new(test_writer(), CallToken::new());

        assert!(sender.send(&1).is_ok());
        sender.close();
        sender.close(); // idempotent

        let err = sender.send(&2).unwrap_err();
        assert_eq!(err.code(), StatusCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_send_after_deadline_is_deadline_exceeded() {
        let token = CallToken::new();
        let mut sender: StreamSender<i64> = StreamSender::new(test_writer(), token.clone());

        token.expire();
        let err = sender.send(&1).unwrap_err();
        assert_eq!(err.code(), StatusCode::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_receiver_yields_messages_in_order_then_sticky_eos() {
        let (tx, rx) = inbound_queue();
        let mut receiver: StreamReceiver<i64> =
            StreamReceiver::new(rx, CallToken::new(), StatusCode::InvalidArgument);

        for n in [3i64, 1, 4] {
            let bytes = Bytes::from(MsgPackCodec::encode(&n).unwrap());
            tx.send(InboundItem::Data(bytes)).unwrap();
        }
        tx.send(InboundItem::Eos).unwrap();

        assert_eq!(receiver.recv().await.unwrap(), Some(3));
        assert_eq!(receiver.recv().await.unwrap(), Some(1));
        assert_eq!(receiver.recv().await.unwrap(), Some(4));
        assert_eq!(receiver.recv().await.unwrap(), None);
        // end-of-stream is idempotent
        assert_eq!(receiver.recv().await.unwrap(), None);
        assert_eq!(receiver.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_receiver_maps_malformed_payload() {
        let (tx, rx) = inbound_queue();
        let mut receiver: StreamReceiver<String> =
            StreamReceiver::new(rx, CallToken::new(), StatusCode::InvalidArgument);

        tx.send(InboundItem::Data(Bytes::from_static(&[0xc1])))
            .unwrap();
        let err = receiver.recv().await.unwrap_err();
        assert_eq!(err.code(), StatusCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_receiver_surfaces_cancellation() {
        let (_tx, rx) = inbound_queue();
        let token = CallToken::new();
        let mut receiver: StreamReceiver<i64> =
            StreamReceiver::new(rx, token.clone(), StatusCode::InvalidArgument);

        token.cancel();
        let err = receiver.recv().await.unwrap_err();
        assert_eq!(err.code(), StatusCode::Cancelled);
    }

    #[tokio::test]
    async fn test_receiver_surfaces_peer_disconnect() {
        let (tx, rx) = inbound_queue();
        let mut receiver: StreamReceiver<i64> =
            StreamReceiver::new(rx, CallToken::new(), StatusCode::InvalidArgument);

        drop(tx);
        let err = receiver.recv().await.unwrap_err();
        assert_eq!(err.code(), StatusCode::Cancelled);
    }
}
