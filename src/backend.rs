//! Relational backend abstraction
//!
//! Each SQL engine implements [`DatabaseBackend`] over its driver pool.
//! Transactions run through a dedicated [`TransactionExecutor`] so every
//! statement inside a transaction hits the same physical connection.

use async_trait::async_trait;

use crate::engine::Engine;
use crate::error::Result;
use crate::types::{QueryResult, QueryValue, Row};

/// Low-level operations every relational backend provides
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
	/// The engine this backend speaks
	fn engine(&self) -> Engine;

	/// The positional placeholder for the 1-based parameter index
	fn placeholder(&self, index: usize) -> String;

	/// Execute a statement, returning the affected row count
	async fn execute(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult>;

	/// Fetch exactly one row
	async fn fetch_one(&self, sql: &str, params: Vec<QueryValue>) -> Result<Row>;

	/// Fetch all rows
	async fn fetch_all(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>>;

	/// Fetch zero or one row
	async fn fetch_optional(&self, sql: &str, params: Vec<QueryValue>) -> Result<Option<Row>>;

	/// Begin a transaction on a dedicated connection
	async fn begin(&self) -> Result<Box<dyn TransactionExecutor>>;
}

/// Statement execution bound to one open transaction
///
/// `commit` and `rollback` take `&mut self` so the owning façade can keep
/// the executor after a failed commit; once the underlying transaction is
/// consumed, further lifecycle calls are no-ops or driver errors.
#[async_trait]
pub trait TransactionExecutor: Send {
	async fn execute(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult>;

	async fn fetch_one(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<Row>;

	async fn fetch_all(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>>;

	async fn fetch_optional(&mut self, sql: &str, params: Vec<QueryValue>)
		-> Result<Option<Row>>;

	async fn commit(&mut self) -> Result<()>;

	async fn rollback(&mut self) -> Result<()>;
}
