//! Persistence for the roster, alert rules, watch lists and metrics
//!
//! The control plane consumes four repository traits (see [`backend`]).
//! Two backends implement all of them:
//!
//! - **SQLite** (default): embedded database with migrations
//! - **In-Memory**: no persistence, for tests or `storage.backend = "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetwatch::storage::{Repositories, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./fleetwatch.db").await?;
//!     let repos = Repositories::from_backend(Arc::new(backend));
//!     let hosts = repos.hosts.get_all().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{
    AlertRepository, HostRepository, MetricsRepository, Repositories, WatchListRepository,
};
pub use error::{StorageError, StorageResult};
pub use schema::{
    AlertRule, Host, HostId, HostStatus, MetricCategory, NewAlertRule, NewHost, StoredMetrics,
    WatchKind,
};
