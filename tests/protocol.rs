//! Wire-level tests: hand-built frames against a real server, and a
//! hand-built server against a real client.

use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use wirecall::codec::MsgPackCodec;
use wirecall::protocol::{build_frame, flags, Frame, FrameBuffer, Header, HELLO_METHOD_ID};
use wirecall::services::calculator::SumRequest;
use wirecall::services::greeter::{GreetRequest, GreetWithDeadlineRequest, Greeting};
use wirecall::services::{CalculatorService, GreeterService};
use wirecall::{CallError, CallKind, Client, Schema, Server, Status, StatusCode};

/// Drives one side of a duplex transport frame by frame.
struct RawPeer {
    io: DuplexStream,
    parser: FrameBuffer,
    queue: Vec<Frame>,
}

impl RawPeer {
    fn new(io: DuplexStream) -> Self {
        Self {
            io,
            parser: FrameBuffer::new(),
            queue: Vec::new(),
        }
    }

    async fn send(&mut self, header: Header, payload: &[u8]) {
        self.io
            .write_all(&build_frame(&header, payload))
            .await
            .unwrap();
    }

    async fn read_frame(&mut self) -> Frame {
        loop {
            if !self.queue.is_empty() {
                return self.queue.remove(0);
            }
            let mut buf = vec![0u8; 4096];
            let n = self.io.read(&mut buf).await.unwrap();
            assert_ne!(n, 0, "peer closed while a frame was expected");
            self.queue.extend(self.parser.push(&buf[..n]).unwrap());
        }
    }
}

fn spawn_server() -> RawPeer {
    let (raw_io, server_io) = duplex(64 * 1024);
    let mut builder = Server::builder();
    builder = GreeterService::with_work_unit(Duration::from_millis(100)).register(builder);
    builder = CalculatorService.register(builder);
    let server = builder.build();
    server.serve_connection(server_io);
    RawPeer::new(raw_io)
}

async fn read_hello(peer: &mut RawPeer) -> Schema {
    let frame = peer.read_frame().await;
    assert!(frame.is_hello());
    MsgPackCodec::decode(frame.payload()).unwrap()
}

#[tokio::test]
async fn test_hello_is_the_first_frame_and_lists_every_method() {
    let mut peer = spawn_server();

    let frame = peer.read_frame().await;
    assert_eq!(frame.method_id(), HELLO_METHOD_ID);
    assert_eq!(frame.call_id(), 0);
    assert!(frame.is_response());
    assert!(frame.is_data());

    let schema: Schema = MsgPackCodec::decode(frame.payload()).unwrap();
    let greet = schema.get("greet.Greet").unwrap();
    assert_eq!(greet.kind, CallKind::Unary);
    assert_ne!(greet.id, 0, "method IDs start above the HELLO ID");

    assert_eq!(
        schema.get("calculator.FindMaximum").unwrap().kind,
        CallKind::BidiStream
    );
    assert_eq!(
        schema.get("calculator.ComputeAverage").unwrap().kind,
        CallKind::ClientStream
    );

    // IDs are unique
    let mut ids: Vec<u16> = schema.methods().iter().map(|m| m.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), schema.methods().len());
}

#[tokio::test]
async fn test_unknown_method_id_yields_unimplemented_trailer() {
    let mut peer = spawn_server();
    read_hello(&mut peer).await;

    let payload = MsgPackCodec::encode(&42i64).unwrap();
    peer.send(
        Header::new(999, flags::REQUEST_DATA, 1, payload.len() as u32),
        &payload,
    )
    .await;

    let trailer = peer.read_frame().await;
    assert_eq!(trailer.header.flags, flags::TRAILER);
    assert_eq!(trailer.call_id(), 1);
    let status: Status = MsgPackCodec::decode(trailer.payload()).unwrap();
    assert_eq!(status.code(), StatusCode::Unimplemented);
}

#[tokio::test]
async fn test_cancel_reason_reaches_the_governor() {
    let mut peer = spawn_server();
    let schema = read_hello(&mut peer).await;
    let method = schema.get("greet.GreetWithDeadline").unwrap().id;

    let request = GreetWithDeadlineRequest {
        greeting: Greeting {
            first_name: "Mirela".to_string(),
            last_name: String::new(),
        },
    };
    let payload = MsgPackCodec::encode(&request).unwrap();
    peer.send(
        Header::new(method, flags::REQUEST_DATA, 1, payload.len() as u32),
        &payload,
    )
    .await;
    peer.send(Header::new(method, flags::CLOSE_SEND, 1, 0), &[])
        .await;

    // abort mid-work with a deadline reason; the handler's next token poll
    // must report DeadlineExceeded, not Cancelled
    let reason = MsgPackCodec::encode(&Status::deadline_exceeded("client-side deadline")).unwrap();
    peer.send(
        Header::new(method, flags::CANCEL, 1, reason.len() as u32),
        &reason,
    )
    .await;

    let trailer = peer.read_frame().await;
    assert_eq!(trailer.header.flags, flags::TRAILER);
    let status: Status = MsgPackCodec::decode(trailer.payload()).unwrap();
    assert_eq!(status.code(), StatusCode::DeadlineExceeded);
}

#[tokio::test]
async fn test_bare_close_send_still_opens_the_call() {
    let mut peer = spawn_server();
    let schema = read_hello(&mut peer).await;
    let method = schema.get("calculator.ComputeAverage").unwrap().id;

    // a client-streaming call may end with zero messages sent
    peer.send(Header::new(method, flags::CLOSE_SEND, 1, 0), &[])
        .await;

    let trailer = peer.read_frame().await;
    assert_eq!(trailer.header.flags, flags::TRAILER);
    let status: Status = MsgPackCodec::decode(trailer.payload()).unwrap();
    assert_eq!(status.code(), StatusCode::InvalidArgument);
}

#[tokio::test]
async fn test_late_close_send_does_not_reopen_a_finished_call() {
    let mut peer = spawn_server();
    let schema = read_hello(&mut peer).await;
    let greet = schema.get("greet.Greet").unwrap().id;
    let sum = schema.get("calculator.Sum").unwrap().id;

    let request = GreetRequest {
        greeting: Greeting {
            first_name: "Mirela".to_string(),
            last_name: String::new(),
        },
    };
    let payload = MsgPackCodec::encode(&request).unwrap();
    peer.send(
        Header::new(greet, flags::REQUEST_DATA, 1, payload.len() as u32),
        &payload,
    )
    .await;

    let response = peer.read_frame().await;
    assert_eq!(response.header.flags, flags::RESPONSE_DATA);
    assert_eq!(response.call_id(), 1);
    let trailer = peer.read_frame().await;
    assert_eq!(trailer.header.flags, flags::TRAILER);
    assert_eq!(trailer.call_id(), 1);
    let status: Status = MsgPackCodec::decode(trailer.payload()).unwrap();
    assert!(status.is_ok());

    // the close-send straggles in after the call already completed; it must
    // not produce a second trailer for call 1
    peer.send(Header::new(greet, flags::CLOSE_SEND, 1, 0), &[])
        .await;

    // frames are dispatched in order, so anything wrongly emitted for call 1
    // would arrive ahead of call 2's frames
    let sum_request = SumRequest {
        first_number: 2,
        second_number: 3,
    };
    let sum_payload = MsgPackCodec::encode(&sum_request).unwrap();
    peer.send(
        Header::new(sum, flags::REQUEST_DATA, 2, sum_payload.len() as u32),
        &sum_payload,
    )
    .await;

    let response = peer.read_frame().await;
    assert_eq!(response.call_id(), 2, "stale frame reopened a finished call");
    let trailer = peer.read_frame().await;
    assert_eq!(trailer.header.flags, flags::TRAILER);
    assert_eq!(trailer.call_id(), 2);

    // nothing further may arrive for either call
    let extra = tokio::time::timeout(Duration::from_millis(100), peer.read_frame()).await;
    assert!(extra.is_err(), "unexpected frame after both calls finished");
}

#[tokio::test]
async fn test_malformed_request_payload_is_invalid_argument() {
    let mut peer = spawn_server();
    let schema = read_hello(&mut peer).await;
    let method = schema.get("greet.Greet").unwrap().id;

    // 0xc1 is never valid msgpack
    peer.send(Header::new(method, flags::REQUEST_DATA, 1, 1), &[0xc1])
        .await;
    peer.send(Header::new(method, flags::CLOSE_SEND, 1, 0), &[])
        .await;

    let trailer = peer.read_frame().await;
    assert_eq!(trailer.header.flags, flags::TRAILER);
    let status: Status = MsgPackCodec::decode(trailer.payload()).unwrap();
    assert_eq!(status.code(), StatusCode::InvalidArgument);
}

#[tokio::test]
async fn test_peer_vanishing_mid_call_is_a_transport_failure() {
    let (client_io, mut fake_server) = duplex(4096);

    // a hand-rolled server that completes the handshake and then hangs up
    let mut schema = Schema::new();
    schema.add_method("echo", 1, CallKind::Unary);
    let payload = MsgPackCodec::encode(&schema).unwrap();
    let hello = Header::new(
        HELLO_METHOD_ID,
        flags::RESPONSE_DATA,
        0,
        payload.len() as u32,
    );
    fake_server
        .write_all(&build_frame(&hello, &payload))
        .await
        .unwrap();

    let client = Client::from_transport(client_io).await.unwrap();
    drop(fake_server);

    let err = client.unary::<_, i64>("echo", &7i64).await.unwrap_err();
    match err {
        CallError::Transport(_) => {}
        CallError::Status(status) => {
            panic!("disconnect must not masquerade as a call status, got {status}")
        }
    }
}
