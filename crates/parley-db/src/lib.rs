//! Database layer for Parley.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. Every table Parley uses is created through
//! versioned migrations managed by this crate.
//!
//! Every pooled connection runs in WAL mode with foreign keys enabled, so
//! deleting a session cascades to its messages.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
