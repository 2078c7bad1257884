//! SQLite backend over sqlx
//!
//! Defaults to an in-memory database, which makes this the backend of
//! choice for tests and embedded deployments.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Row as SqlxRow};
use std::sync::Arc;

use crate::backend::{DatabaseBackend, TransactionExecutor};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::types::{QueryResult, QueryValue, Row};

/// SQLite database backend
pub struct SqliteBackend {
	pool: Arc<SqlitePool>,
}

impl SqliteBackend {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool: Arc::new(pool),
		}
	}

	/// Open an in-memory database
	///
	/// The pool is capped at one connection: every pooled connection to
	/// `sqlite::memory:` would otherwise see its own private database.
	pub async fn in_memory() -> Result<Self> {
		let pool = sqlx::sqlite::SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await?;
		Ok(Self::new(pool))
	}

	fn bind_value<'q>(
		query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
		value: &'q QueryValue,
	) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
		match value {
			QueryValue::Null => query.bind(None::<i32>),
			QueryValue::Bool(b) => query.bind(b),
			QueryValue::Int(i) => query.bind(i),
			QueryValue::Float(f) => query.bind(f),
			QueryValue::String(s) => query.bind(s),
			QueryValue::Bytes(b) => query.bind(b),
			QueryValue::Timestamp(dt) => query.bind(dt),
		}
	}

	fn convert_row(sqlite_row: SqliteRow) -> Result<Row> {
		let mut row = Row::new();
		for column in sqlite_row.columns() {
			let column_name = column.name();
			if let Ok(value) = sqlite_row.try_get::<i64, _>(column_name) {
				row.insert(column_name, QueryValue::Int(value));
			} else if let Ok(value) = sqlite_row.try_get::<f64, _>(column_name) {
				row.insert(column_name, QueryValue::Float(value));
			} else if let Ok(value) = sqlite_row.try_get::<String, _>(column_name) {
				row.insert(column_name, QueryValue::String(value));
			} else if let Ok(value) = sqlite_row.try_get::<Vec<u8>, _>(column_name) {
				row.insert(column_name, QueryValue::Bytes(value));
			} else if let Ok(value) = sqlite_row.try_get::<bool, _>(column_name) {
				row.insert(column_name, QueryValue::Bool(value));
			} else {
				row.insert(column_name, QueryValue::Null);
			}
		}
		Ok(row)
	}
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
	fn engine(&self) -> Engine {
		Engine::Sqlite
	}

	fn placeholder(&self, _index: usize) -> String {
		"?".to_string()
	}

	async fn execute(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult> {
		let mut query = sqlx::query(sql);
		for param in &params {
			query = Self::bind_value(query, param);
		}
		let result = query.execute(self.pool.as_ref()).await?;
		Ok(QueryResult {
			rows_affected: result.rows_affected(),
		})
	}

	async fn fetch_one(&self, sql: &str, params: Vec<QueryValue>) -> Result<Row> {
		let mut query = sqlx::query(sql);
		for param in &params {
			query = Self::bind_value(query, param);
		}
		let sqlite_row = query.fetch_one(self.pool.as_ref()).await?;
		Self::convert_row(sqlite_row)
	}

	async fn fetch_all(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		let mut query = sqlx::query(sql);
		for param in &params {
			query = Self::bind_value(query, param);
		}
		let sqlite_rows = query.fetch_all(self.pool.as_ref()).await?;
		sqlite_rows.into_iter().map(Self::convert_row).collect()
	}

	async fn fetch_optional(&self, sql: &str, params: Vec<QueryValue>) -> Result<Option<Row>> {
		let mut query = sqlx::query(sql);
		for param in &params {
			query = Self::bind_value(query, param);
		}
		let sqlite_row = query.fetch_optional(self.pool.as_ref()).await?;
		sqlite_row.map(Self::convert_row).transpose()
	}

	async fn begin(&self) -> Result<Box<dyn TransactionExecutor>> {
		let tx = self.pool.begin().await?;
		Ok(Box::new(SqliteTransactionExecutor { tx: Some(tx) }))
	}
}

struct SqliteTransactionExecutor {
	tx: Option<sqlx::Transaction<'static, sqlx::Sqlite>>,
}

impl SqliteTransactionExecutor {
	fn tx(&mut self) -> Result<&mut sqlx::Transaction<'static, sqlx::Sqlite>> {
		self.tx
			.as_mut()
			.ok_or_else(|| Error::Driver("transaction already consumed".to_string()))
	}
}

#[async_trait]
impl TransactionExecutor for SqliteTransactionExecutor {
	async fn execute(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult> {
		let tx = self.tx()?;
		let mut query = sqlx::query(sql);
		for param in &params {
			query = SqliteBackend::bind_value(query, param);
		}
		let result = query.execute(&mut **tx).await?;
		Ok(QueryResult {
			rows_affected: result.rows_affected(),
		})
	}

	async fn fetch_one(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<Row> {
		let tx = self.tx()?;
		let mut query = sqlx::query(sql);
		for param in &params {
			query = SqliteBackend::bind_value(query, param);
		}
		let row = query.fetch_one(&mut **tx).await?;
		SqliteBackend::convert_row(row)
	}

	async fn fetch_all(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		let tx = self.tx()?;
		let mut query = sqlx::query(sql);
		for param in &params {
			query = SqliteBackend::bind_value(query, param);
		}
		let rows = query.fetch_all(&mut **tx).await?;
		rows.into_iter().map(SqliteBackend::convert_row).collect()
	}

	async fn fetch_optional(
		&mut self,
		sql: &str,
		params: Vec<QueryValue>,
	) -> Result<Option<Row>> {
		let tx = self.tx()?;
		let mut query = sqlx::query(sql);
		for param in &params {
			query = SqliteBackend::bind_value(query, param);
		}
		let row = query.fetch_optional(&mut **tx).await?;
		row.map(SqliteBackend::convert_row).transpose()
	}

	async fn commit(&mut self) -> Result<()> {
		let tx = self
			.tx
			.take()
			.ok_or_else(|| Error::Driver("transaction already consumed".to_string()))?;
		tx.commit().await?;
		Ok(())
	}

	async fn rollback(&mut self) -> Result<()> {
		match self.tx.take() {
			Some(tx) => {
				tx.rollback().await?;
				Ok(())
			}
			None => Ok(()),
		}
	}
}
