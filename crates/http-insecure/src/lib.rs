//! Plain HTTP server with a bounded graceful drain.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;

pub use error::Error;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_server::Handle;
use fleet_http::HttpServer;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

/// Drain bound used when none is configured.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Simple non-secure HTTP server.
#[derive(Clone, Debug)]
pub struct InsecureHttpServer {
    drain_timeout: Duration,
    handle: Handle,
    listen_addr: SocketAddr,
    task_tracker: TaskTracker,
}

impl InsecureHttpServer {
    /// Creates a new instance of `InsecureHttpServer`.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self::with_drain_timeout(listen_addr, DEFAULT_DRAIN_TIMEOUT)
    }

    /// Creates a server whose shutdown waits at most `drain_timeout` for
    /// in-flight requests.
    #[must_use]
    pub fn with_drain_timeout(listen_addr: SocketAddr, drain_timeout: Duration) -> Self {
        Self {
            drain_timeout,
            handle: Handle::new(),
            listen_addr,
            task_tracker: TaskTracker::new(),
        }
    }
}

#[async_trait]
impl HttpServer for InsecureHttpServer {
    type Error = Error;

    fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    async fn start(&self, router: Router) -> Result<JoinHandle<()>, Self::Error> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let listener = std::net::TcpListener::bind(self.listen_addr)?;
        listener.set_nonblocking(true)?;

        let server = axum_server::from_tcp(listener).handle(self.handle.clone());

        let handle = self.task_tracker.spawn(async move {
            if let Err(e) = server.serve(router.into_make_service()).await {
                error!("http server exited: {e}");
            }
        });

        self.task_tracker.close();

        info!(addr = %self.listen_addr, "http server listening");

        Ok(handle)
    }

    async fn shutdown(&self) {
        info!("http server draining...");

        self.handle.graceful_shutdown(Some(self.drain_timeout));
        self.task_tracker.wait().await;

        info!("http server shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Instant;

    use axum::routing::get;

    fn local_addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::LOCALHOST,
            fleet_util::allocate_port(),
        ))
    }

    #[tokio::test]
    async fn test_serves_and_rejects_second_start() {
        let addr = local_addr();
        let server = InsecureHttpServer::new(addr);

        server
            .start(Router::new().route("/ping", get(|| async { "pong" })))
            .await
            .unwrap();

        let body = reqwest::get(format!("http://{addr}/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");

        assert!(matches!(
            server.start(Router::new()).await,
            Err(Error::AlreadyStarted)
        ));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_lets_in_flight_request_finish() {
        let addr = local_addr();
        let server = InsecureHttpServer::with_drain_timeout(addr, Duration::from_secs(5));

        let router = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "done"
            }),
        );
        server.start(router).await.unwrap();

        let request = tokio::spawn(async move {
            reqwest::get(format!("http://{addr}/slow"))
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        server.shutdown().await;

        assert_eq!(request.await.unwrap(), "done");
        assert!(reqwest::get(format!("http://{addr}/slow")).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_is_bounded() {
        let addr = local_addr();
        let server = InsecureHttpServer::with_drain_timeout(addr, Duration::from_millis(200));

        let router = Router::new().route(
            "/stuck",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "never"
            }),
        );
        server.start(router).await.unwrap();

        let _request = tokio::spawn(reqwest::get(format!("http://{addr}/stuck")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        server.shutdown().await;

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
