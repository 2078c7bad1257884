//! Model operations
//!
//! Each operation follows the same skeleton: resolve the engine, attach
//! the request-scoped timeout, translate predicates, plan the statement,
//! execute and map the driver error. The read/write split follows the
//! capability traits so callers can depend on only what they use.

pub(crate) mod mongo;
pub(crate) mod sql;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::Client;
use crate::conditions::Conditions;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{Model, Projection};
use crate::query::QueryParams;
use crate::transaction::Transaction;
use crate::types::{QueryResult, QueryValue, Row};

/// Read operations
#[async_trait]
pub trait Reader {
	/// Fetch a single record into `model`
	///
	/// On the document engine a populated ID attribute on the input model
	/// becomes part of the filter. `force_writer` routes to the write
	/// handle on MySQL and PostgreSQL. A miss is [`Error::NoResults`].
	async fn get<M: Model>(
		&self,
		model: &mut M,
		conditions: &Conditions,
		timeout: Duration,
		force_writer: bool,
	) -> Result<()>;

	/// Fetch a single record into a projection of its columns
	async fn get_partial<M: Model, P: Projection>(
		&self,
		projection: &mut P,
		conditions: &Conditions,
		timeout: Duration,
		force_writer: bool,
	) -> Result<()>;

	/// Fetch a page of records; an empty page is [`Error::NoResults`]
	async fn get_many<M: Model>(
		&self,
		models: &mut Vec<M>,
		conditions: &Conditions,
		query_params: Option<&QueryParams>,
		timeout: Duration,
	) -> Result<()>;

	/// Fetch a page of projections
	async fn get_many_partial<M: Model, P: Projection>(
		&self,
		projections: &mut Vec<P>,
		conditions: &Conditions,
		query_params: Option<&QueryParams>,
		timeout: Duration,
	) -> Result<()>;

	/// Fetch a page of rows restricted to an explicit column list
	///
	/// The row-shaped sibling of [`Reader::get_many_partial`], for callers
	/// that name columns instead of supplying a projection type.
	async fn get_many_columns<M: Model>(
		&self,
		conditions: &Conditions,
		query_params: Option<&QueryParams>,
		columns: &[&str],
		timeout: Duration,
	) -> Result<Vec<Row>>;

	/// Count matching records; zero is not an error
	async fn count<M: Model>(&self, conditions: &Conditions, timeout: Duration) -> Result<i64>;

	/// Group by a column and count records per group key
	///
	/// When the column is a known date field and no predicate is given,
	/// the grouping key is the engine's day-granularity date expression.
	async fn aggregate<M: Model>(
		&self,
		conditions: &Conditions,
		aggregate_column: &str,
		timeout: Duration,
	) -> Result<HashMap<String, i64>>;
}

/// Write operations
#[async_trait]
pub trait Writer {
	/// Create or upsert a record through the given transaction
	///
	/// `is_new` selects INSERT over a primary-key upsert. Any error (or
	/// driver panic) rolls the transaction back; `commit_after` commits
	/// on success.
	async fn save<M: Model>(
		&self,
		model: &M,
		tx: &mut Transaction,
		is_new: bool,
		commit_after: bool,
	) -> Result<()>;

	/// Atomically add `delta` to a numeric field, returning the new value
	///
	/// A missing record reads as 0 and is not inserted.
	async fn increment<M: Model>(&self, model: &M, field_name: &str, delta: i64) -> Result<i64>;

	/// Insert records in chunks of `batch_size`
	async fn create_in_batches<M: Model>(&self, models: &[M], batch_size: usize) -> Result<()>;

	/// Execute a raw statement with bind parameters
	async fn execute_raw(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult>;

	/// Run a raw query with bind parameters
	async fn fetch_raw(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>>;
}

#[async_trait]
impl Reader for Client {
	async fn get<M: Model>(
		&self,
		model: &mut M,
		conditions: &Conditions,
		timeout: Duration,
		force_writer: bool,
	) -> Result<()> {
		match self.engine() {
			Engine::MongoDb => {
				let fetched =
					mongo::get_with_mongo::<M>(self, model.id(), conditions, timeout).await?;
				*model = fetched;
				Ok(())
			}
			engine if engine.is_sql() => {
				let fetched =
					sql::get_one::<M, M>(self, conditions, None, timeout, force_writer).await?;
				*model = fetched;
				Ok(())
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn get_partial<M: Model, P: Projection>(
		&self,
		projection: &mut P,
		conditions: &Conditions,
		timeout: Duration,
		force_writer: bool,
	) -> Result<()> {
		match self.engine() {
			Engine::MongoDb => {
				let fetched =
					mongo::get_partial_with_mongo::<M, P>(self, conditions, timeout).await?;
				*projection = fetched;
				Ok(())
			}
			engine if engine.is_sql() => {
				let fetched = sql::get_one::<M, P>(
					self,
					conditions,
					Some(P::columns()),
					timeout,
					force_writer,
				)
				.await?;
				*projection = fetched;
				Ok(())
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn get_many<M: Model>(
		&self,
		models: &mut Vec<M>,
		conditions: &Conditions,
		query_params: Option<&QueryParams>,
		timeout: Duration,
	) -> Result<()> {
		match self.engine() {
			Engine::MongoDb => {
				*models = mongo::get_many_with_mongo::<M, M>(
					self,
					conditions,
					query_params,
					None,
					timeout,
				)
				.await?;
				Ok(())
			}
			engine if engine.is_sql() => {
				*models =
					sql::get_many::<M, M>(self, conditions, query_params, None, timeout).await?;
				Ok(())
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn get_many_partial<M: Model, P: Projection>(
		&self,
		projections: &mut Vec<P>,
		conditions: &Conditions,
		query_params: Option<&QueryParams>,
		timeout: Duration,
	) -> Result<()> {
		match self.engine() {
			Engine::MongoDb => {
				*projections = mongo::get_many_with_mongo::<M, P>(
					self,
					conditions,
					query_params,
					Some(P::columns()),
					timeout,
				)
				.await?;
				Ok(())
			}
			engine if engine.is_sql() => {
				*projections = sql::get_many::<M, P>(
					self,
					conditions,
					query_params,
					Some(P::columns()),
					timeout,
				)
				.await?;
				Ok(())
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn get_many_columns<M: Model>(
		&self,
		conditions: &Conditions,
		query_params: Option<&QueryParams>,
		columns: &[&str],
		timeout: Duration,
	) -> Result<Vec<Row>> {
		match self.engine() {
			Engine::MongoDb => {
				mongo::get_many_columns_with_mongo::<M>(
					self,
					conditions,
					query_params,
					columns,
					timeout,
				)
				.await
			}
			engine if engine.is_sql() => {
				sql::get_many_columns::<M>(self, conditions, query_params, columns, timeout)
					.await
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn count<M: Model>(&self, conditions: &Conditions, timeout: Duration) -> Result<i64> {
		match self.engine() {
			Engine::MongoDb => mongo::count_with_mongo::<M>(self, conditions, timeout).await,
			engine if engine.is_sql() => sql::count::<M>(self, conditions, timeout).await,
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn aggregate<M: Model>(
		&self,
		conditions: &Conditions,
		aggregate_column: &str,
		timeout: Duration,
	) -> Result<HashMap<String, i64>> {
		match self.engine() {
			Engine::MongoDb => {
				mongo::aggregate_with_mongo::<M>(self, conditions, aggregate_column, timeout)
					.await
			}
			engine if engine.is_sql() => {
				sql::aggregate::<M>(self, conditions, aggregate_column, timeout).await
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}
}

#[async_trait]
impl Writer for Client {
	async fn save<M: Model>(
		&self,
		model: &M,
		tx: &mut Transaction,
		is_new: bool,
		commit_after: bool,
	) -> Result<()> {
		match self.engine() {
			Engine::MongoDb => mongo::save_with_mongo(self, model, tx, is_new).await,
			engine if engine.is_sql() => {
				sql::save(self, model, tx, is_new, commit_after).await
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn increment<M: Model>(&self, model: &M, field_name: &str, delta: i64) -> Result<i64> {
		match self.engine() {
			Engine::MongoDb => mongo::increment_with_mongo(self, model, field_name, delta).await,
			engine if engine.is_sql() => {
				sql::increment::<M>(self, model, field_name, delta).await
			}
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn create_in_batches<M: Model>(&self, models: &[M], batch_size: usize) -> Result<()> {
		match self.engine() {
			Engine::MongoDb => mongo::create_in_batches_mongo(self, models, batch_size).await,
			engine if engine.is_sql() => sql::create_in_batches(self, models, batch_size).await,
			_ => Err(Error::UnsupportedEngine),
		}
	}

	async fn execute_raw(&self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult> {
		if !self.engine().is_sql() {
			return Err(Error::UnknownSql);
		}
		self.write_backend()?.execute(sql, params).await
	}

	async fn fetch_raw(&self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		if !self.engine().is_sql() {
			return Err(Error::UnknownSql);
		}
		self.write_backend()?.fetch_all(sql, params).await
	}
}
