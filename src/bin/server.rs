//! Demo server: greeter, calculator, and blog services over TCP.
//!
//! Binds `WIRECALL_ADDR` (default `127.0.0.1:50051`) and serves until
//! Ctrl-C, then shuts down in order: stop accepting, wind down connections,
//! release the store.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use wirecall::services::{BlogService, CalculatorService, GreeterService};
use wirecall::store::MemoryCollection;
use wirecall::{Result, Server};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr =
        std::env::var("WIRECALL_ADDR").unwrap_or_else(|_| "127.0.0.1:50051".to_string());

    let blogs = Arc::new(MemoryCollection::new());

    let mut builder = Server::builder();
    builder = GreeterService::new().register(builder);
    builder = CalculatorService.register(builder);
    builder = BlogService::new(blogs.clone()).register(builder);
    let server = builder.build();

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let listener = TcpListener::bind(&addr).await?;
    server.serve(listener).await?;

    // connections are winding down; the store is dropped last
    tracing::info!(blogs = blogs.len().await, "store released, bye");
    Ok(())
}
