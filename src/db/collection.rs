//! Collection handle with typed CRUD helpers
//!
//! Documents are encoded from and decoded into caller types with serde; the
//! backend only ever sees raw BSON. Backend failures are returned as-is,
//! tagged with the kind of operation that produced them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bson::{Bson, Document};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::db::backend::{CollectionBackend, DocumentCursor, UpdateCounts};
use crate::db::database::Database;
use crate::types::{BoilerError, DriverError, Result};

/// A named collection within a [`Database`].
///
/// Holds its parent database, so the context and backend are always the
/// parent's.
#[derive(Clone)]
pub struct Collection {
    db: Database,
    inner: Arc<dyn CollectionBackend>,
}

impl Collection {
    pub(crate) fn new(db: Database, inner: Arc<dyn CollectionBackend>) -> Self {
        Self { db, inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// `<database>.<collection>`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.db.name(), self.name())
    }

    /// Run a backend call under the database context, tagging failures with `kind`.
    async fn call<T, F>(&self, fut: F, kind: fn(DriverError) -> BoilerError) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, DriverError>>,
    {
        self.db.context().run(fut).await?.map_err(kind)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Decode the first document matching `filter`.
    ///
    /// Fails with [`BoilerError::NotFound`] when nothing matches.
    pub async fn find_one<T>(&self, filter: Document) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.find_optional(filter)
            .await?
            .ok_or_else(|| BoilerError::NotFound {
                namespace: self.namespace(),
            })
    }

    /// Like [`Collection::find_one`], but "no match" is `Ok(None)`.
    pub async fn find_optional<T>(&self, filter: Document) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let found = self
            .call(self.inner.find_one(filter), BoilerError::Query)
            .await?;

        match found {
            Some(doc) => Ok(Some(bson::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Decode every document matching `filter`, in the order the store returns them.
    pub async fn find_many<T>(&self, filter: Document) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut out = Vec::new();
        self.find_many_into(filter, &mut out).await?;
        Ok(out)
    }

    /// Append every document matching `filter` to `out`, returning how many
    /// were appended.
    ///
    /// Items appended before a cursor or decode failure stay in `out`. The
    /// cursor is released exactly once, whatever the outcome. If this future
    /// is dropped mid-read, the release is handed to a background task.
    pub async fn find_many_into<T>(&self, filter: Document, out: &mut Vec<T>) -> Result<usize>
    where
        T: DeserializeOwned,
    {
        let mut cursor = OpenCursor(Some(
            self.call(self.inner.find(filter), BoilerError::Query).await?,
        ));

        let drained = self.db.context().run(drain(&mut cursor, out)).await;
        cursor.close().await;

        let appended = drained??;
        debug!(collection = %self.namespace(), count = appended, "find_many complete");
        Ok(appended)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply `update` to at most one document matching `filter`.
    pub async fn update_one(&self, filter: Document, update: Document) -> Result<UpdateCounts> {
        let counts = self
            .call(self.inner.update_one(filter, update), BoilerError::Write)
            .await?;
        debug!(
            collection = %self.namespace(),
            matched = counts.matched,
            modified = counts.modified,
            "update_one"
        );
        Ok(counts)
    }

    /// Apply `update` to every document matching `filter`.
    pub async fn update_many(&self, filter: Document, update: Document) -> Result<UpdateCounts> {
        let counts = self
            .call(self.inner.update_many(filter, update), BoilerError::Write)
            .await?;
        debug!(
            collection = %self.namespace(),
            matched = counts.matched,
            modified = counts.modified,
            "update_many"
        );
        Ok(counts)
    }

    /// Insert one document and return its `_id`.
    pub async fn insert_one<T>(&self, item: &T) -> Result<Bson>
    where
        T: Serialize,
    {
        let doc = bson::to_document(item)?;
        self.call(self.inner.insert_one(doc), BoilerError::Write).await
    }

    /// Insert `items` in order and return their `_id`s in the same order.
    ///
    /// An empty slice is a no-op.
    pub async fn insert_many<T>(&self, items: &[T]) -> Result<Vec<Bson>>
    where
        T: Serialize,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let docs = items
            .iter()
            .map(bson::to_document)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let ids = self
            .call(self.inner.insert_many(docs), BoilerError::Write)
            .await?;
        debug!(collection = %self.namespace(), count = ids.len(), "insert_many");
        Ok(ids)
    }

    /// Delete at most one document matching `filter`; returns the deleted count.
    pub async fn delete_one(&self, filter: Document) -> Result<u64> {
        self.call(self.inner.delete_one(filter), BoilerError::Write)
            .await
    }

    /// Delete every document matching `filter`; returns the deleted count.
    pub async fn delete_many(&self, filter: Document) -> Result<u64> {
        let deleted = self
            .call(self.inner.delete_many(filter), BoilerError::Write)
            .await?;
        debug!(collection = %self.namespace(), deleted = deleted, "delete_many");
        Ok(deleted)
    }

    /// Drop the whole collection, documents and metadata. Irreversible.
    pub async fn drop(&self) -> Result<()> {
        warn!(collection = %self.namespace(), "Dropping collection");
        self.call(self.inner.drop_collection(), BoilerError::Drop)
            .await
    }
}

/// A cursor that still has to be released.
///
/// Dropping it unreleased spawns the release onto the current runtime.
struct OpenCursor(Option<Box<dyn DocumentCursor>>);

impl OpenCursor {
    async fn next_document(&mut self) -> std::result::Result<Option<Document>, DriverError> {
        match self.0.as_mut() {
            Some(cursor) => cursor.next_document().await,
            None => Ok(None),
        }
    }

    async fn close(mut self) {
        if let Some(cursor) = self.0.take() {
            cursor.close().await;
        }
    }
}

impl Drop for OpenCursor {
    fn drop(&mut self) {
        let Some(cursor) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Releasing abandoned cursor in the background");
                handle.spawn(cursor.close());
            }
            Err(_) => warn!("No runtime to release abandoned cursor, dropping it"),
        }
    }
}

/// Pull every document off `cursor`, decoding into `out` as it goes.
async fn drain<T>(cursor: &mut OpenCursor, out: &mut Vec<T>) -> Result<usize>
where
    T: DeserializeOwned,
{
    let mut appended = 0;
    while let Some(doc) = cursor.next_document().await.map_err(BoilerError::Cursor)? {
        out.push(bson::from_document(doc)?);
        appended += 1;
    }
    Ok(appended)
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("namespace", &self.namespace())
            .finish()
    }
}
