//! Database abstraction layer.
//!
//! This module provides physical database access:
//! - The `DbHandle` capability trait
//! - sqlx-backed pools and statement execution
//! - Row decoding to JSON
//! - Connection de-duplication and reader selection

pub mod executor;
pub mod factory;
pub mod handle;
pub mod physical;
pub mod policy;
pub mod pool;
pub mod types;

pub use factory::{ConnectionFactory, HandleOpener};
pub use handle::DbHandle;
pub use physical::PhysicalConnection;
pub use policy::ReaderSelector;
pub use pool::{DbPool, SqlxOpener, connection_suggestion};
