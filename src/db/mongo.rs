//! MongoDB driver backend
//!
//! Every method is a direct pass-through to the `mongodb` crate. Connection
//! setup stays with the caller; this module only wraps an existing `Client`.

use std::sync::Arc;

use bson::{Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{Client, Collection, Cursor, Database};

use crate::db::backend::{CollectionBackend, DatabaseBackend, DocumentCursor, UpdateCounts};
use crate::types::DriverError;

/// Database backed by a connected MongoDB client
#[derive(Debug, Clone)]
pub struct MongoBackend {
    client: Client,
    db: Database,
}

impl MongoBackend {
    pub fn new(client: &Client, db_name: &str) -> Self {
        Self {
            client: client.clone(),
            db: client.database(db_name),
        }
    }

    /// Get the raw MongoDB client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get the raw MongoDB database
    pub fn inner(&self) -> &Database {
        &self.db
    }
}

impl DatabaseBackend for MongoBackend {
    fn name(&self) -> &str {
        self.db.name()
    }

    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend> {
        Arc::new(MongoCollectionBackend {
            inner: self.db.collection::<Document>(name),
        })
    }
}

/// Untyped MongoDB collection
#[derive(Debug, Clone)]
pub struct MongoCollectionBackend {
    inner: Collection<Document>,
}

impl MongoCollectionBackend {
    /// Get the underlying collection for advanced operations
    pub fn inner(&self) -> &Collection<Document> {
        &self.inner
    }
}

#[async_trait::async_trait]
impl CollectionBackend for MongoCollectionBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, DriverError> {
        Ok(self.inner.find_one(filter).await?)
    }

    async fn find(&self, filter: Document) -> Result<Box<dyn DocumentCursor>, DriverError> {
        let cursor = self.inner.find(filter).await?;
        Ok(Box::new(MongoCursor { inner: cursor }))
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateCounts, DriverError> {
        let result = self.inner.update_one(filter, update).await?;
        Ok(UpdateCounts {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateCounts, DriverError> {
        let result = self.inner.update_many(filter, update).await?;
        Ok(UpdateCounts {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn insert_one(&self, doc: Document) -> Result<Bson, DriverError> {
        let result = self.inner.insert_one(doc).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Bson>, DriverError> {
        let result = self.inner.insert_many(docs).await?;

        // The driver reports ids keyed by input position
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);

        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn delete_one(&self, filter: Document) -> Result<u64, DriverError> {
        Ok(self.inner.delete_one(filter).await?.deleted_count)
    }

    async fn delete_many(&self, filter: Document) -> Result<u64, DriverError> {
        Ok(self.inner.delete_many(filter).await?.deleted_count)
    }

    async fn drop_collection(&self) -> Result<(), DriverError> {
        Ok(self.inner.drop().await?)
    }
}

/// Driver cursor over raw documents
pub struct MongoCursor {
    inner: Cursor<Document>,
}

#[async_trait::async_trait]
impl DocumentCursor for MongoCursor {
    async fn next_document(&mut self) -> Result<Option<Document>, DriverError> {
        Ok(self.inner.try_next().await?)
    }

    async fn close(self: Box<Self>) {
        // Dropping a live driver cursor issues killCursors in the background
        drop(self);
    }
}
