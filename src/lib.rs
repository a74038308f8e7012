//! Typed RPC over one persistent connection.
//!
//! `wirecall` multiplexes any number of concurrent calls onto a single
//! framed transport. Four calling conventions are supported: unary,
//! server-streaming, client-streaming, and bidirectional streaming. Every
//! call terminates with a structured [`Status`]; connection failures are a
//! separate class ([`CallError::Transport`]) and are never conflated with
//! call outcomes.
//!
//! A server declares its methods on a [`server::ServerBuilder`] and
//! announces them to each client in a schema handshake, so callers address
//! methods by name while frames carry compact numeric IDs. Deadlines and
//! cancellation are cooperative: a [`CallToken`] travels with every
//! server-side call and handlers poll it at loop boundaries.
//!
//! Payloads are MessagePack. The wire format is an 11-byte header plus
//! payload; see [`protocol`].

pub mod codec;
pub mod protocol;
pub mod server;
pub mod services;
pub mod store;

mod channel;
mod client;
mod error;
mod governor;
mod schema;
mod status;
mod writer;

pub use channel::{StreamReceiver, StreamSender};
pub use client::{CallOptions, CallSink, CallStream, Client, ClientStreamCall};
pub use error::{Error, Result};
pub use governor::CallToken;
pub use schema::{CallKind, MethodSpec, Schema};
pub use server::{Server, ServerBuilder};
pub use status::{CallError, Status, StatusCode};
