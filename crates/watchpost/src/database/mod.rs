/// Persistence layer
///
/// Two boundaries live here: the configuration store (monitors, regions,
/// per-monitor status rows) and the time-series store (append-only check
/// events). Both are backed by libsql behind the [`Store`] trait.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{LibsqlStore, Store};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
