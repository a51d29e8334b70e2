use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use fleet_bootable::Bootable;
use fleet_http::HttpServer;
use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::error::Error;

/// The client-facing endpoint as a bootable service.
pub struct HttpService<H>
where
    H: HttpServer,
{
    router: Mutex<Option<Router>>,
    server: Arc<H>,
    task_tracker: TaskTracker,
}

impl<H> HttpService<H>
where
    H: HttpServer,
{
    /// Wraps `server`, which will serve `router` once started.
    pub fn new(server: Arc<H>, router: Router) -> Self {
        Self {
            router: Mutex::new(Some(router)),
            server,
            task_tracker: TaskTracker::new(),
        }
    }
}

#[async_trait]
impl<H> Bootable for HttpService<H>
where
    H: HttpServer,
{
    fn name(&self) -> &'static str {
        "http"
    }

    /// Binds the listener and starts serving.
    ///
    /// # Errors
    ///
    /// This function will return an error if the service has already been
    /// started or if the listener cannot be bound.
    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(router) = self.router.lock().take() else {
            return Err(Box::new(Error::AlreadyStarted));
        };

        let handle = self
            .server
            .start(router)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.task_tracker.spawn(async move {
            if let Err(e) = handle.await {
                error!("http server task failed: {e}");
            }
        });

        self.task_tracker.close();

        info!(addr = %self.server.listen_addr(), "accepting client requests");

        Ok(())
    }

    /// Stops accepting connections and drains in-flight requests.
    async fn shutdown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.server.shutdown().await;
        self.task_tracker.wait().await;

        Ok(())
    }

    async fn wait(&self) {
        self.task_tracker.wait().await;
    }
}
