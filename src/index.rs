//! Index existence probes
//!
//! Each engine is asked in its own catalog: `INFORMATION_SCHEMA` for
//! MySQL, `pg_indexes` for PostgreSQL, `sqlite_master` for SQLite and the
//! collection index list for the document engine. An absent index is
//! `false` with no error; only driver failures carry one.

use crate::client::Client;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::types::QueryValue;

impl Client {
	/// Whether the named index exists on the table
	pub async fn index_exists(&self, table_name: &str, index_name: &str) -> Result<bool> {
		match self.engine() {
			Engine::MySql => self.index_exists_mysql(table_name, index_name).await,
			Engine::Postgres => self.index_exists_postgres(table_name, index_name).await,
			Engine::Sqlite => self.index_exists_sqlite(table_name, index_name).await,
			Engine::MongoDb => {
				self.mongo()?
					.index_exists(&self.get_table_name(table_name), index_name)
					.await
			}
			Engine::None => Err(Error::UnknownSql),
		}
	}

	async fn index_exists_mysql(&self, table_name: &str, index_name: &str) -> Result<bool> {
		let backend = self.write_backend()?;
		let (sql, params) = if self.database_name().is_empty() {
			(
				"SELECT 1 FROM INFORMATION_SCHEMA.STATISTICS \
				 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND INDEX_NAME = ?",
				vec![
					QueryValue::from(table_name),
					QueryValue::from(index_name),
				],
			)
		} else {
			(
				"SELECT 1 FROM INFORMATION_SCHEMA.STATISTICS \
				 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND INDEX_NAME = ?",
				vec![
					QueryValue::from(self.database_name()),
					QueryValue::from(table_name),
					QueryValue::from(index_name),
				],
			)
		};
		let row = backend.fetch_optional(sql, params).await?;
		Ok(row.is_some())
	}

	async fn index_exists_postgres(&self, table_name: &str, index_name: &str) -> Result<bool> {
		let backend = self.write_backend()?;
		let row = backend
			.fetch_optional(
				"SELECT 1 FROM pg_indexes WHERE tablename = $1 AND indexname = $2",
				vec![
					QueryValue::from(table_name),
					QueryValue::from(index_name),
				],
			)
			.await?;
		Ok(row.is_some())
	}

	async fn index_exists_sqlite(&self, table_name: &str, index_name: &str) -> Result<bool> {
		let backend = self.write_backend()?;
		let row = backend
			.fetch_optional(
				"SELECT 1 FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?",
				vec![
					QueryValue::from(table_name),
					QueryValue::from(index_name),
				],
			)
			.await?;
		Ok(row.is_some())
	}
}
