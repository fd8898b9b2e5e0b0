//! Backend seam between the typed handles and the store that serves them
//!
//! Backends work on raw BSON documents; typed encoding and decoding happens in
//! [`crate::db::Collection`]. Implementations forward each call to their store
//! and report failures as [`DriverError`] without interpreting them.

use std::sync::Arc;

use bson::{Bson, Document};

use crate::types::DriverError;

/// Matched and modified counts reported by an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCounts {
    pub matched: u64,
    pub modified: u64,
}

/// A store that can hand out collections of one database
pub trait DatabaseBackend: Send + Sync {
    /// Name of the database this backend is bound to
    fn name(&self) -> &str;

    /// Collection backend for `name`. Must not perform I/O.
    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend>;
}

/// Document-level operations on one collection
#[async_trait::async_trait]
pub trait CollectionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, DriverError>;

    async fn find(&self, filter: Document) -> Result<Box<dyn DocumentCursor>, DriverError>;

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateCounts, DriverError>;

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateCounts, DriverError>;

    /// Insert one document, returning its `_id`
    async fn insert_one(&self, doc: Document) -> Result<Bson, DriverError>;

    /// Insert a batch, returning the `_id`s in input order
    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Bson>, DriverError>;

    /// Delete at most one document, returning the deleted count
    async fn delete_one(&self, filter: Document) -> Result<u64, DriverError>;

    async fn delete_many(&self, filter: Document) -> Result<u64, DriverError>;

    async fn drop_collection(&self) -> Result<(), DriverError>;
}

/// Server-side result cursor
#[async_trait::async_trait]
pub trait DocumentCursor: Send {
    /// Next document, `Ok(None)` once exhausted.
    async fn next_document(&mut self) -> Result<Option<Document>, DriverError>;

    /// Release the cursor's server-side resources.
    async fn close(self: Box<Self>);
}
