//! Method registry and calling-convention adapters.
//!
//! The registry maps method names to handlers and assigns wire IDs
//! sequentially starting from 1 (0 is reserved for the HELLO frame). Each
//! registration wraps a typed handler closure in the adapter for its calling
//! convention. The adapter owns the convention's completion contract: how
//! many messages flow each way, when the trailer goes out, and how handler
//! results and governor state map onto the terminal status.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::channel::{CallWriter, InboundItem, StreamReceiver, StreamSender};
use crate::governor::CallToken;
use crate::schema::{CallKind, Schema};
use crate::status::{Status, StatusCode};

/// Boxed future for adapter tasks.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything a handler needs for one incoming call.
pub(crate) struct ServerCall {
    pub(crate) inbound: mpsc::UnboundedReceiver<InboundItem>,
    pub(crate) writer: CallWriter,
    pub(crate) token: CallToken,
}

/// Frame-level entry point of a registered method.
pub(crate) trait MethodHandler: Send + Sync {
    fn invoke(&self, call: ServerCall) -> BoxFuture<'static, ()>;
}

struct MethodEntry {
    handler: Box<dyn MethodHandler>,
    kind: CallKind,
    name: String,
}

/// Registry mapping method IDs to handlers.
pub(crate) struct MethodRegistry {
    methods: HashMap<u16, MethodEntry>,
    // next wire ID, 0 reserved
    next_id: u16,
}

impl MethodRegistry {
    pub(crate) fn new() -> Self {
        Self {
            methods: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, name: &str, kind: CallKind, handler: Box<dyn MethodHandler>) {
        let id = self.next_id;
        self.next_id += 1;
        self.methods.insert(
            id,
            MethodEntry {
                handler,
                kind,
                name: name.to_string(),
            },
        );
    }

    pub(crate) fn register_unary<F, Req, Resp, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Req, CallToken) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(name, CallKind::Unary, Box::new(UnaryAdapter::new(handler)));
    }

    pub(crate) fn register_server_streaming<F, Req, Resp, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Req, StreamSender<Resp>) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        self.insert(
            name,
            CallKind::ServerStream,
            Box::new(ServerStreamAdapter::new(handler)),
        );
    }

    pub(crate) fn register_client_streaming<F, Req, Resp, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(StreamReceiver<Req>, CallToken) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        self.insert(
            name,
            CallKind::ClientStream,
            Box::new(ClientStreamAdapter::new(handler)),
        );
    }

    pub(crate) fn register_bidi_streaming<F, Req, Resp, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(StreamReceiver<Req>, StreamSender<Resp>) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        self.insert(
            name,
            CallKind::BidiStream,
            Box::new(BidiStreamAdapter::new(handler)),
        );
    }

    /// Look up a method by wire ID.
    pub(crate) fn get(&self, id: u16) -> Option<&dyn MethodHandler> {
        self.methods.get(&id).map(|e| e.handler.as_ref())
    }

    /// Method name by wire ID, for logging.
    pub(crate) fn name(&self, id: u16) -> Option<&str> {
        self.methods.get(&id).map(|e| e.name.as_str())
    }

    /// Build the HELLO schema from the registered methods.
    pub(crate) fn build_schema(&self) -> Schema {
        let mut ids: Vec<_> = self.methods.keys().copied().collect();
        ids.sort_unstable();

        let mut schema = Schema::new();
        for id in ids {
            let entry = &self.methods[&id];
            schema.add_method(&entry.name, id, entry.kind);
        }
        schema
    }
}

/// Receive the single request message of a unary or server-streaming call.
async fn recv_single<Req: DeserializeOwned>(
    rx: &mut StreamReceiver<Req>,
) -> Result<Req, Status> {
    match rx.recv().await? {
        Some(req) => Ok(req),
        None => Err(Status::invalid_argument("missing request message")),
    }
}

// ---------------------------------------------------------------------------
// Unary: exactly one request, exactly one response or error, closed
// atomically by the trailer.
// ---------------------------------------------------------------------------

struct UnaryAdapter<F, Req, Resp, Fut> {
    handler: Arc<F>,
    _marker: PhantomData<fn(Req, Fut) -> Resp>,
}

impl<F, Req, Resp, Fut> UnaryAdapter<F, Req, Resp, Fut> {
    fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<F, Req, Resp, Fut> MethodHandler for UnaryAdapter<F, Req, Resp, Fut>
where
    F: Fn(Req, CallToken) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn invoke(&self, call: ServerCall) -> BoxFuture<'static, ()> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let ServerCall {
                inbound,
                writer,
                token,
            } = call;
            let mut rx =
                StreamReceiver::<Req>::new(inbound, token.clone(), StatusCode::InvalidArgument);

            let status = match recv_single(&mut rx).await {
                Err(status) => status,
                Ok(req) => match handler(req, token.clone()).await {
                    Err(status) => status,
                    // A completed result after expiry is discarded: the
                    // deadline wins the race against late completion.
                    Ok(resp) => match token.cancel_status() {
                        Some(status) => status,
                        None => match writer.send_message(&resp) {
                            Ok(()) => Status::ok(),
                            Err(status) => status,
                        },
                    },
                },
            };

            writer.send_trailer(&status);
        })
    }
}

// ---------------------------------------------------------------------------
// Server-streaming: one request, zero or more responses, trailer on return.
// ---------------------------------------------------------------------------

struct ServerStreamAdapter<F, Req, Resp, Fut> {
    handler: Arc<F>,
    _marker: PhantomData<fn(Req, Fut) -> Resp>,
}

impl<F, Req, Resp, Fut> ServerStreamAdapter<F, Req, Resp, Fut> {
    fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<F, Req, Resp, Fut> MethodHandler for ServerStreamAdapter<F, Req, Resp, Fut>
where
    F: Fn(Req, StreamSender<Resp>) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    fn invoke(&self, call: ServerCall) -> BoxFuture<'static, ()> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let ServerCall {
                inbound,
                writer,
                token,
            } = call;
            let mut rx =
                StreamReceiver::<Req>::new(inbound, token.clone(), StatusCode::InvalidArgument);

            let status = match recv_single(&mut rx).await {
                Err(status) => status,
                Ok(req) => {
                    let sender = StreamSender::new(writer.clone(), token.clone());
                    match handler(req, sender).await {
                        Ok(()) => token.cancel_status().unwrap_or_else(Status::ok),
                        Err(status) => status,
                    }
                }
            };

            writer.send_trailer(&status);
        })
    }
}

// ---------------------------------------------------------------------------
// Client-streaming: zero or more requests, one aggregate response on
// end-of-stream.
// ---------------------------------------------------------------------------

struct ClientStreamAdapter<F, Req, Resp, Fut> {
    handler: Arc<F>,
    _marker: PhantomData<fn(Req, Fut) -> Resp>,
}

impl<F, Req, Resp, Fut> ClientStreamAdapter<F, Req, Resp, Fut> {
    fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<F, Req, Resp, Fut> MethodHandler for ClientStreamAdapter<F, Req, Resp, Fut>
where
    F: Fn(StreamReceiver<Req>, CallToken) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
{
    fn invoke(&self, call: ServerCall) -> BoxFuture<'static, ()> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let ServerCall {
                inbound,
                writer,
                token,
            } = call;
            let rx =
                StreamReceiver::<Req>::new(inbound, token.clone(), StatusCode::InvalidArgument);

            let status = match handler(rx, token.clone()).await {
                Err(status) => status,
                Ok(resp) => match token.cancel_status() {
                    Some(status) => status,
                    None => match writer.send_message(&resp) {
                        Ok(()) => Status::ok(),
                        Err(status) => status,
                    },
                },
            };

            writer.send_trailer(&status);
        })
    }
}

// ---------------------------------------------------------------------------
// Bidirectional: both directions open and independent; the trailer closes
// the send side when the handler returns.
// ---------------------------------------------------------------------------

struct BidiStreamAdapter<F, Req, Resp, Fut> {
    handler: Arc<F>,
    _marker: PhantomData<fn(Req, Fut) -> Resp>,
}

impl<F, Req, Resp, Fut> BidiStreamAdapter<F, Req, Resp, Fut> {
    fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _marker: PhantomData,
        }
    }
}

impl<F, Req, Resp, Fut> MethodHandler for BidiStreamAdapter<F, Req, Resp, Fut>
where
    F: Fn(StreamReceiver<Req>, StreamSender<Resp>) -> Fut + Send + Sync + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    fn invoke(&self, call: ServerCall) -> BoxFuture<'static, ()> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let ServerCall {
                inbound,
                writer,
                token,
            } = call;
            let rx =
                StreamReceiver::<Req>::new(inbound, token.clone(), StatusCode::InvalidArgument);
            let sender = StreamSender::new(writer.clone(), token.clone());

            let status = match handler(rx, sender).await {
                Ok(()) => token.cancel_status().unwrap_or_else(Status::ok),
                Err(status) => status,
            };

            writer.send_trailer(&status);
        })
    }
}
