//! Database layer
//!
//! [`Database`] and [`Collection`] are the handles application code works
//! with; the backends behind them forward to MongoDB or to an in-memory store.

pub mod backend;
pub mod collection;
pub mod database;
pub mod memory;
pub mod mongo;

pub use backend::{CollectionBackend, DatabaseBackend, DocumentCursor, UpdateCounts};
pub use collection::Collection;
pub use database::Database;
pub use memory::{CursorStats, MemoryBackend};
pub use mongo::MongoBackend;
