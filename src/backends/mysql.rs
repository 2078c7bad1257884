//! MySQL backend over sqlx

use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlRow};
use sqlx::{Column, Row as SqlxRow};
use std::sync::Arc;

use crate::backend::{DatabaseBackend, TransactionExecutor};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::types::{QueryResult, QueryValue, Row};

/// MySQL database backend
pub struct MySqlBackend {
	pool: Arc<MySqlPool>,
}

impl MySqlBackend {
	pub fn new(pool: MySqlPool) -> Self {
		Self {
			pool: Arc::new(pool),
		}
	}

	fn bind_value<'q>(
		query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
		value: &'q QueryValue,
	) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
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

	fn convert_row(mysql_row: MySqlRow) -> Result<Row> {
		let mut row = Row::new();
		for column in mysql_row.columns() {
			let column_name = column.name();
			if let Ok(value) = mysql_row.try_get::<bool, _>(column_name) {
				row.insert(column_name, QueryValue::Bool(value));
			} else if let Ok(value) = mysql_row.try_get::<i64, _>(column_name) {
				row.insert(column_name, QueryValue::Int(value));
			} else if let Ok(value) = mysql_row.try_get::<i32, _>(column_name) {
				row.insert(column_name, QueryValue::Int(value as i64));
			} else if let Ok(value) = mysql_row.try_get::<f64, _>(column_name) {
				row.insert(column_name, QueryValue::Float(value));
			} else if let Ok(value) = mysql_row.try_get::<String, _>(column_name) {
				row.insert(column_name, QueryValue::String(value));
			} else if let Ok(value) = mysql_row.try_get::<Vec<u8>, _>(column_name) {
				row.insert(column_name, QueryValue::Bytes(value));
			} else if let Ok(value) = mysql_row.try_get::<chrono::NaiveDateTime, _>(column_name) {
				// MySQL TIMESTAMP/DATETIME carries no timezone
				row.insert(
					column_name,
					QueryValue::Timestamp(chrono::DateTime::from_naive_utc_and_offset(
						value,
						chrono::Utc,
					)),
				);
			} else if let Ok(value) =
				mysql_row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_name)
			{
				row.insert(column_name, QueryValue::Timestamp(value));
			} else {
				row.insert(column_name, QueryValue::Null);
			}
		}
		Ok(row)
	}
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
	fn engine(&self) -> Engine {
		Engine::MySql
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
		let mysql_row = query.fetch_one(self.pool.as_ref()).await?;
		Self::convert_row(mysql_row)
	}

	async fn fetch_all(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		let mut query = sqlx::query(sql);
		for param in &params {
			query = Self::bind_value(query, param);
		}
		let mysql_rows = query.fetch_all(self.pool.as_ref()).await?;
		mysql_rows.into_iter().map(Self::convert_row).collect()
	}

	async fn fetch_optional(&self, sql: &str, params: Vec<QueryValue>) -> Result<Option<Row>> {
		let mut query = sqlx::query(sql);
		for param in &params {
			query = Self::bind_value(query, param);
		}
		let mysql_row = query.fetch_optional(self.pool.as_ref()).await?;
		mysql_row.map(Self::convert_row).transpose()
	}

	async fn begin(&self) -> Result<Box<dyn TransactionExecutor>> {
		let tx = self.pool.begin().await?;
		Ok(Box::new(MySqlTransactionExecutor { tx: Some(tx) }))
	}
}

struct MySqlTransactionExecutor {
	tx: Option<sqlx::Transaction<'static, sqlx::MySql>>,
}

impl MySqlTransactionExecutor {
	fn tx(&mut self) -> Result<&mut sqlx::Transaction<'static, sqlx::MySql>> {
		self.tx
			.as_mut()
			.ok_or_else(|| Error::Driver("transaction already consumed".to_string()))
	}
}

#[async_trait]
impl TransactionExecutor for MySqlTransactionExecutor {
	async fn execute(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult> {
		let tx = self.tx()?;
		let mut query = sqlx::query(sql);
		for param in &params {
			query = MySqlBackend::bind_value(query, param);
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
			query = MySqlBackend::bind_value(query, param);
		}
		let row = query.fetch_one(&mut **tx).await?;
		MySqlBackend::convert_row(row)
	}

	async fn fetch_all(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		let tx = self.tx()?;
		let mut query = sqlx::query(sql);
		for param in &params {
			query = MySqlBackend::bind_value(query, param);
		}
		let rows = query.fetch_all(&mut **tx).await?;
		rows.into_iter().map(MySqlBackend::convert_row).collect()
	}

	async fn fetch_optional(
		&mut self,
		sql: &str,
		params: Vec<QueryValue>,
	) -> Result<Option<Row>> {
		let tx = self.tx()?;
		let mut query = sqlx::query(sql);
		for param in &params {
			query = MySqlBackend::bind_value(query, param);
		}
		let row = query.fetch_optional(&mut **tx).await?;
		row.map(MySqlBackend::convert_row).transpose()
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
