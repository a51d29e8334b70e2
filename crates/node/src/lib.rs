//! Runs one member of a replicated SQL fleet: resolves where the node sits in
//! the cluster, brings up its replica, applies migrations, serves the client
//! API and tears everything down in order on shutdown.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod bootstrap;
mod config;
mod error;
mod lifecycle;
mod migrations;
mod router;
mod service;

pub use bootstrap::{Node, NodeOptions, StepOutcome, TeardownReport, run, teardown};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, LifecycleState, spawn_signal_watcher};
pub use migrations::{apply_migrations, load_migrations};
pub use router::{DebugNote, DebugRecord, router};
pub use service::HttpService;
