//! # Polystore
//!
//! A unified, model-oriented data-access layer over four heterogeneous
//! backends: MySQL, PostgreSQL, SQLite and MongoDB.
//!
//! Callers describe records and query predicates in an engine-neutral
//! vocabulary; the layer compiles those predicates into engine-specific
//! syntax, coordinates a transaction on whichever backend is active, and
//! returns typed results.
//!
//! ## Architecture
//!
//! - **Conditions** (`conditions` module): a nested predicate tree with
//!   `$and`/`$or` connectives, comparison operators, set membership,
//!   existence tests and JSON array/object probes. One compiler emits
//!   parameterised SQL fragments per relational dialect, another emits a
//!   BSON filter document.
//! - **Backends** (`backends` module): sqlx-based implementations of the
//!   [`DatabaseBackend`](backend::DatabaseBackend) trait plus the MongoDB
//!   document backend.
//! - **Transactions** (`transaction` module): one lifecycle over
//!   relational transactions and document sessions, with an at-most-once
//!   commit guard.
//! - **Operations** (`operations` module): `save`, `get`, `get_many`,
//!   `count`, `aggregate`, `increment`, `create_in_batches` composed from
//!   the pieces above, split into `Reader` and `Writer` capabilities.
//! - **Null-aware types** (`custom_types` module): nullable string and
//!   timestamp values participating in JSON, BSON and SQL marshalling.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use polystore::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Widget {
//!     id: String,
//!     number: i64,
//! }
//!
//! impl Model for Widget {
//!     fn model_name() -> &'static str {
//!         "Widget"
//!     }
//!     fn table_name() -> &'static str {
//!         "widgets"
//!     }
//!     fn columns() -> &'static [ColumnDef] {
//!         const COLUMNS: &[ColumnDef] = &[
//!             ColumnDef::new("id", "TEXT PRIMARY KEY"),
//!             ColumnDef::new("number", "BIGINT"),
//!         ];
//!         COLUMNS
//!     }
//!     fn id(&self) -> Option<String> {
//!         Some(self.id.clone())
//!     }
//! }
//!
//! # async fn example() -> polystore::error::Result<()> {
//! let backend = SqliteBackend::in_memory().await?;
//! let client = Client::builder()
//!     .write(Arc::new(backend))
//!     .auto_migrate(true)
//!     .build()?;
//!
//! client.migrate(&[ModelDef::of::<Widget>()]).await?;
//!
//! let widget = Widget { id: "w1".into(), number: 7 };
//! let mut tx = client.begin_tx().await?;
//! client.save(&widget, &mut tx, true, true).await?;
//!
//! let conditions = conditions_from_json(serde_json::json!({ "number": 7 }));
//! let mut found = Widget { id: String::new(), number: 0 };
//! client
//!     .get(&mut found, &conditions, Duration::from_secs(5), false)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod client;
pub mod conditions;
pub mod custom_types;
pub mod engine;
pub mod error;
pub mod index;
pub mod migrate;
pub mod model;
pub mod operations;
pub mod query;
pub mod transaction;
pub mod types;

/// Convenient imports for the common surface
pub mod prelude {
	pub use crate::backend::{DatabaseBackend, TransactionExecutor};
	pub use crate::backends::{MongoBackend, MySqlBackend, PostgresBackend, SqliteBackend};
	pub use crate::client::{Client, ClientBuilder, ReadPolicy};
	pub use crate::conditions::{conditions_from_json, ConditionValue, Conditions};
	pub use crate::custom_types::{compute_unset, NullString, NullTime};
	pub use crate::engine::Engine;
	pub use crate::error::{Error, Result};
	pub use crate::migrate::Migrator;
	pub use crate::model::{ColumnDef, Model, ModelDef, Projection};
	pub use crate::operations::{Reader, Writer};
	pub use crate::query::QueryParams;
	pub use crate::transaction::{Transaction, Transactor};
	pub use crate::types::{QueryResult, QueryValue, Row};
}

pub use client::Client;
pub use engine::Engine;
pub use error::{Error, Result};
