//! In-memory backend
//!
//! Stands in for a MongoDB server in development and tests. Collections keep
//! documents in insertion order, which is also the order cursors return them.

mod filter;
mod update;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bson::{doc, oid::ObjectId, Bson, Document};
use tracing::debug;

use crate::db::backend::{CollectionBackend, DatabaseBackend, DocumentCursor, UpdateCounts};
use crate::types::DriverError;

pub use filter::matches;

/// Cursor bookkeeping shared by every collection of a [`MemoryBackend`]
#[derive(Debug, Default)]
pub struct CursorStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl CursorStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cursors opened but not yet closed
    pub fn open(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

/// In-memory database
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    name: String,
    collections: Arc<RwLock<HashMap<String, Arc<MemoryCollection>>>>,
    stats: Arc<CursorStats>,
}

impl MemoryBackend {
    pub fn new(db_name: &str) -> Self {
        Self {
            name: db_name.to_string(),
            collections: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(CursorStats::default()),
        }
    }

    pub fn cursor_stats(&self) -> &CursorStats {
        &self.stats
    }

    /// Make the next cursor opened on `collection` fail after yielding
    /// `after` documents.
    pub fn fail_next_cursor(&self, collection: &str, after: usize, message: &str) {
        let coll = self.get_or_create(collection);
        if let Ok(mut slot) = coll.cursor_failure.lock() {
            *slot = Some((after, message.to_string()));
        };
    }

    /// Number of documents currently stored in `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.get_or_create(collection)
            .docs
            .read()
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    fn get_or_create(&self, name: &str) -> Arc<MemoryCollection> {
        if let Ok(collections) = self.collections.read() {
            if let Some(existing) = collections.get(name) {
                return existing.clone();
            }
        }

        let fresh = || {
            Arc::new(MemoryCollection {
                name: name.to_string(),
                docs: RwLock::new(Vec::new()),
                cursor_failure: Mutex::new(None),
                stats: self.stats.clone(),
            })
        };

        match self.collections.write() {
            Ok(mut collections) => collections
                .entry(name.to_string())
                .or_insert_with(fresh)
                .clone(),
            // A poisoned registry still hands out a usable, if detached, collection
            Err(_) => fresh(),
        }
    }
}

impl DatabaseBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn CollectionBackend> {
        self.get_or_create(name)
    }
}

/// One in-memory collection
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    docs: RwLock<Vec<Document>>,
    cursor_failure: Mutex<Option<(usize, String)>>,
    stats: Arc<CursorStats>,
}

fn poisoned() -> DriverError {
    DriverError::backend("memory store lock poisoned")
}

impl MemoryCollection {
    fn update(
        &self,
        filter: &Document,
        changes: &Document,
        multi: bool,
    ) -> Result<UpdateCounts, DriverError> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        let mut counts = UpdateCounts::default();

        for doc in docs.iter_mut() {
            if !filter::matches(doc, filter)? {
                continue;
            }
            counts.matched += 1;
            if update::apply(doc, changes)? {
                counts.modified += 1;
            }
            if !multi {
                break;
            }
        }

        Ok(counts)
    }

    fn delete(&self, filter: &Document, multi: bool) -> Result<u64, DriverError> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;

        // Evaluate the filter up front so a bad filter deletes nothing
        let mut doomed = Vec::new();
        for (index, doc) in docs.iter().enumerate() {
            if filter::matches(doc, filter)? {
                doomed.push(index);
                if !multi {
                    break;
                }
            }
        }

        for index in doomed.iter().rev() {
            docs.remove(*index);
        }

        Ok(doomed.len() as u64)
    }

    fn insert_locked(docs: &mut Vec<Document>, doc: Document) -> Result<Bson, DriverError> {
        let (id, doc) = match doc.get("_id") {
            Some(id) => (id.clone(), doc),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = doc! { "_id": id.clone() };
                with_id.extend(doc);
                (id, with_id)
            }
        };

        if docs
            .iter()
            .any(|existing| existing.get("_id").is_some_and(|e| filter::bson_eq(e, &id)))
        {
            return Err(DriverError::backend(format!(
                "E11000 duplicate key error dup key: {{ _id: {} }}",
                id
            )));
        }

        docs.push(doc);
        Ok(id)
    }
}

#[async_trait::async_trait]
impl CollectionBackend for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: Document) -> Result<Option<Document>, DriverError> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        for doc in docs.iter() {
            if filter::matches(doc, &filter)? {
                return Ok(Some(doc.clone()));
            }
        }
        Ok(None)
    }

    async fn find(&self, filter: Document) -> Result<Box<dyn DocumentCursor>, DriverError> {
        let mut batch = VecDeque::new();
        {
            let docs = self.docs.read().map_err(|_| poisoned())?;
            for doc in docs.iter() {
                if filter::matches(doc, &filter)? {
                    batch.push_back(doc.clone());
                }
            }
        }

        let fail_after = self.cursor_failure.lock().map_err(|_| poisoned())?.take();
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        debug!(collection = %self.name, batch = batch.len(), "Opened memory cursor");

        Ok(Box::new(MemoryCursor {
            batch,
            yielded: 0,
            fail_after,
            stats: self.stats.clone(),
        }))
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateCounts, DriverError> {
        self.update(&filter, &update, false)
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
    ) -> Result<UpdateCounts, DriverError> {
        self.update(&filter, &update, true)
    }

    async fn insert_one(&self, doc: Document) -> Result<Bson, DriverError> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        Self::insert_locked(&mut docs, doc)
    }

    async fn insert_many(&self, batch: Vec<Document>) -> Result<Vec<Bson>, DriverError> {
        if batch.is_empty() {
            return Err(DriverError::backend("No documents to insert"));
        }

        // Ordered insert: stop at the first failure, keep what went in before it
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        let mut ids = Vec::with_capacity(batch.len());
        for doc in batch {
            ids.push(Self::insert_locked(&mut docs, doc)?);
        }
        Ok(ids)
    }

    async fn delete_one(&self, filter: Document) -> Result<u64, DriverError> {
        self.delete(&filter, false)
    }

    async fn delete_many(&self, filter: Document) -> Result<u64, DriverError> {
        self.delete(&filter, true)
    }

    async fn drop_collection(&self) -> Result<(), DriverError> {
        self.docs.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

/// Snapshot cursor over the documents matched when it was opened
pub struct MemoryCursor {
    batch: VecDeque<Document>,
    yielded: usize,
    fail_after: Option<(usize, String)>,
    stats: Arc<CursorStats>,
}

#[async_trait::async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_document(&mut self) -> Result<Option<Document>, DriverError> {
        if let Some((after, message)) = &self.fail_after {
            if self.yielded >= *after {
                return Err(DriverError::backend(message.clone()));
            }
        }

        let next = self.batch.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }

    async fn close(self: Box<Self>) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(cursor: &mut Box<dyn DocumentCursor>) -> Result<Vec<Document>, DriverError> {
        let mut out = Vec::new();
        while let Some(doc) = cursor.next_document().await? {
            out.push(doc);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_collection_handles_share_storage() {
        let backend = MemoryBackend::new("app");
        let a = backend.collection("users");
        let b = backend.collection("users");

        a.insert_one(doc! { "name": "a" }).await.unwrap();
        assert!(b.find_one(doc! { "name": "a" }).await.unwrap().is_some());
        assert_eq!(backend.count("users"), 1);
        assert_eq!(backend.count("other"), 0);
    }

    #[tokio::test]
    async fn test_insert_assigns_leading_object_id() {
        let backend = MemoryBackend::new("app");
        let coll = backend.collection("users");

        let id = coll.insert_one(doc! { "name": "a" }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let stored = coll.find_one(doc! {}).await.unwrap().unwrap();
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(stored.get("_id"), Some(&id));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_and_ordered_batch_stops() {
        let backend = MemoryBackend::new("app");
        let coll = backend.collection("users");

        coll.insert_one(doc! { "_id": 1, "name": "a" }).await.unwrap();
        assert!(coll.insert_one(doc! { "_id": 1 }).await.is_err());

        let result = coll
            .insert_many(vec![doc! { "_id": 2 }, doc! { "_id": 1 }, doc! { "_id": 3 }])
            .await;
        assert!(result.is_err());
        assert_eq!(backend.count("users"), 2);
    }

    #[tokio::test]
    async fn test_empty_insert_many_is_rejected() {
        let backend = MemoryBackend::new("app");
        assert!(backend.collection("users").insert_many(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_cursor_returns_insertion_order_and_counts_release() {
        let backend = MemoryBackend::new("app");
        let coll = backend.collection("items");
        for n in 0..4 {
            coll.insert_one(doc! { "n": n, "even": (n % 2 == 0) }).await.unwrap();
        }

        let mut cursor = coll.find(doc! { "even": true }).await.unwrap();
        let docs = drain(&mut cursor).await.unwrap();
        let ns: Vec<i32> = docs.iter().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(ns, vec![0, 2]);

        assert_eq!(backend.cursor_stats().open(), 1);
        cursor.close().await;
        assert_eq!(backend.cursor_stats().opened(), 1);
        assert_eq!(backend.cursor_stats().closed(), 1);
        assert_eq!(backend.cursor_stats().open(), 0);
    }

    #[tokio::test]
    async fn test_injected_cursor_failure_is_one_shot() {
        let backend = MemoryBackend::new("app");
        let coll = backend.collection("items");
        for n in 0..3 {
            coll.insert_one(doc! { "n": n }).await.unwrap();
        }

        backend.fail_next_cursor("items", 1, "cursor killed");
        let mut cursor = coll.find(doc! {}).await.unwrap();
        assert!(cursor.next_document().await.unwrap().is_some());
        let err = cursor.next_document().await.unwrap_err();
        assert_eq!(err.to_string(), "cursor killed");
        cursor.close().await;

        let mut cursor = coll.find(doc! {}).await.unwrap();
        assert_eq!(drain(&mut cursor).await.unwrap().len(), 3);
        cursor.close().await;
    }

    #[tokio::test]
    async fn test_update_counts() {
        let backend = MemoryBackend::new("app");
        let coll = backend.collection("items");
        coll.insert_many(vec![
            doc! { "k": "x", "v": 1 },
            doc! { "k": "x", "v": 2 },
            doc! { "k": "y", "v": 1 },
        ])
        .await
        .unwrap();

        let one = coll
            .update_one(doc! { "k": "x" }, doc! { "$set": { "v": 9 } })
            .await
            .unwrap();
        assert_eq!(one, UpdateCounts { matched: 1, modified: 1 });

        let many = coll
            .update_many(doc! { "k": "x" }, doc! { "$set": { "v": 9 } })
            .await
            .unwrap();
        assert_eq!(many, UpdateCounts { matched: 2, modified: 1 });

        let none = coll
            .update_many(doc! { "k": "z" }, doc! { "$set": { "v": 0 } })
            .await
            .unwrap();
        assert_eq!(none, UpdateCounts::default());
    }

    #[tokio::test]
    async fn test_delete_counts_and_drop() {
        let backend = MemoryBackend::new("app");
        let coll = backend.collection("items");
        coll.insert_many(vec![doc! { "k": 1 }, doc! { "k": 1 }, doc! { "k": 2 }])
            .await
            .unwrap();

        assert_eq!(coll.delete_one(doc! { "k": 1 }).await.unwrap(), 1);
        assert_eq!(coll.delete_many(doc! { "k": 1 }).await.unwrap(), 1);
        assert_eq!(coll.delete_many(doc! { "k": 1 }).await.unwrap(), 0);
        assert!(coll.delete_many(doc! { "$bogus": 1 }).await.is_err());
        assert_eq!(backend.count("items"), 1);

        coll.drop_collection().await.unwrap();
        assert_eq!(backend.count("items"), 0);
    }
}
