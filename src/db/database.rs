//! Database handle

use std::fmt;
use std::sync::Arc;

use mongodb::Client;

use crate::context::ExecContext;
use crate::db::backend::DatabaseBackend;
use crate::db::collection::Collection;
use crate::db::mongo::MongoBackend;

/// A named database bound to a backend and an execution context.
///
/// Cloning is cheap; clones share the backend and the context.
#[derive(Clone)]
pub struct Database {
    backend: Arc<dyn DatabaseBackend>,
    ctx: ExecContext,
}

impl Database {
    /// Bind a connected MongoDB client to database `name`.
    ///
    /// Nothing is validated here; a bad name or an unreachable server only
    /// surfaces when an operation runs.
    pub fn new(client: &Client, name: &str, ctx: ExecContext) -> Self {
        Self::with_backend(Arc::new(MongoBackend::new(client, name)), ctx)
    }

    /// Bind any backend (e.g. [`crate::db::MemoryBackend`]).
    pub fn with_backend(backend: Arc<dyn DatabaseBackend>, ctx: ExecContext) -> Self {
        Self { backend, ctx }
    }

    /// Handle for collection `name`. No I/O.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), self.backend.collection(name))
    }

    /// Same database under a different context
    pub fn with_context(&self, ctx: ExecContext) -> Self {
        Self {
            backend: self.backend.clone(),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.backend
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("ctx", &self.ctx)
            .finish()
    }
}
