//! Abstract interface for bootable services.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for errors raised while booting a service.
pub trait BootableError: Debug + Error + Send + Sync + 'static {}

/// Trait for bootable services.
#[async_trait]
pub trait Bootable
where
    Self: Send + Sync + 'static,
{
    /// Get the name of the bootable service.
    fn name(&self) -> &str;

    /// Start the bootable service.
    async fn start(&self) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Shutdown the bootable service.
    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Wait for the bootable service to exit.
    async fn wait(&self);
}
