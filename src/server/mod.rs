//! RPC server: method registration, accept loop, graceful shutdown.
//!
//! Methods are registered on a [`ServerBuilder`] with one of the four
//! calling conventions, then the built [`Server`] serves a listener until
//! its shutdown handle fires. Shutdown is ordered: the accept loop stops
//! first, then open connections are told to wind down.

mod connection;
pub(crate) mod registry;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{StreamReceiver, StreamSender};
use crate::error::Result;
use crate::governor::CallToken;
use crate::status::Status;

use registry::MethodRegistry;

/// Builder collecting method registrations.
pub struct ServerBuilder {
    registry: MethodRegistry,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
        }
    }

    /// Register a unary method: one request in, one response out.
    pub fn unary<F, Req, Resp, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Req, CallToken) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<Resp, Status>> + Send + 'static,
    {
        self.registry.register_unary(name, handler);
        self
    }

    /// Register a server-streaming method: one request in, a stream out.
    pub fn server_streaming<F, Req, Resp, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Req, StreamSender<Resp>) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<(), Status>> + Send + 'static,
    {
        self.registry.register_server_streaming(name, handler);
        self
    }

    /// Register a client-streaming method: a stream in, one response out.
    pub fn client_streaming<F, Req, Resp, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(StreamReceiver<Req>, CallToken) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<Resp, Status>> + Send + 'static,
    {
        self.registry.register_client_streaming(name, handler);
        self
    }

    /// Register a bidirectional-streaming method: streams both ways.
    pub fn bidi_streaming<F, Req, Resp, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(StreamReceiver<Req>, StreamSender<Resp>) -> Fut + Send + Sync + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<(), Status>> + Send + 'static,
    {
        self.registry.register_bidi_streaming(name, handler);
        self
    }

    pub fn build(self) -> Server {
        Server {
            registry: Arc::new(self.registry),
            shutdown: CancellationToken::new(),
        }
    }
}

/// The built server.
pub struct Server {
    registry: Arc<MethodRegistry>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Handle that stops the accept loop and winds down open connections.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until the shutdown handle fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "listening");

        loop {
            let (stream, peer) = tokio::select! {
                res = listener.accept() => res?,
                _ = self.shutdown.cancelled() => break,
            };
            tracing::info!(%peer, "connection accepted");

            let registry = self.registry.clone();
            let shutdown = self.shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = connection::run_connection(stream, registry, shutdown).await {
                    tracing::warn!(%peer, "connection error: {e}");
                }
                tracing::info!(%peer, "connection closed");
            });
        }

        // listener drops here, so no new connections are accepted while
        // in-flight ones wind down
        tracing::info!("accept loop stopped");
        Ok(())
    }

    /// Serve a single already-established transport.
    ///
    /// Used by in-process tests over a duplex pipe.
    pub fn serve_connection<IO>(&self, io: IO) -> JoinHandle<Result<()>>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(connection::run_connection(io, registry, shutdown))
    }
}
