//! mongo-boiler - CRUD helpers over the MongoDB driver
//!
//! Wraps a connected `mongodb::Client` in two small handles:
//!
//! - **[`Database`]**: a named database plus an [`ExecContext`] carrying
//!   cancellation and a deadline
//! - **[`Collection`]**: typed find / update / insert / delete / drop helpers
//!
//! Documents are encoded and decoded with serde, filters and updates are plain
//! `bson::Document`s, and every driver failure reaches the caller unchanged
//! inside a [`BoilerError`].
//!
//! ```no_run
//! use bson::doc;
//! use mongo_boiler::{Database, ExecContext};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! # async fn demo(client: mongodb::Client) -> mongo_boiler::Result<()> {
//! let db = Database::new(&client, "app", ExecContext::background());
//! let users = db.collection("users");
//!
//! users.insert_one(&User { name: "ada".into() }).await?;
//! let found: Vec<User> = users.find_many(doc! { "name": "ada" }).await?;
//! let deleted = users.delete_many(doc! { "name": "ada" }).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod types;

pub use context::ExecContext;
pub use db::{Collection, Database, UpdateCounts};
pub use types::{BoilerError, DriverError, Result};
