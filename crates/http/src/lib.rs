//! Abstract interface for the client-facing HTTP server.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use fleet_bootable::BootableError;
use tokio::task::JoinHandle;

/// Marker trait for `HttpServer` errors
pub trait HttpServerError: BootableError {}

/// An HTTP server that serves one router until it is drained.
#[async_trait]
pub trait HttpServer: Send + Sync + 'static {
    /// Error type of the server.
    type Error: HttpServerError;

    /// Address the server listens on.
    fn listen_addr(&self) -> SocketAddr;

    /// Binds the listener and starts serving `router`.
    ///
    /// Nothing is bound before this is called. The returned handle completes
    /// once the server has stopped.
    async fn start(&self, router: Router) -> Result<JoinHandle<()>, Self::Error>;

    /// Stops accepting connections and waits for in-flight requests, bounded
    /// by the server's drain timeout. Connections still open past the bound
    /// are dropped.
    async fn shutdown(&self);
}
