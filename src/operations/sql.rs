//! Relational implementations of the model operations

use std::collections::HashMap;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::client::Client;
use crate::conditions::dialect::aggregate_date_expression;
use crate::conditions::sql::{compile_conditions, CompiledConditions};
use crate::conditions::{Conditions, COUNT_FIELD, MONGO_ID_FIELD, SQL_ID_FIELD};
use crate::error::{Error, Result};
use crate::model::{model_values, row_to, Model};
use crate::query::{InsertQuery, QueryParams, SelectQuery, UpdateQuery};
use crate::transaction::Transaction;
use crate::types::{coerce_to_i64, QueryValue};

/// Attach the request-scoped timeout to a driver future
async fn with_timeout<T>(
	timeout: Duration,
	future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
	if timeout.is_zero() {
		return future.await;
	}
	tokio::time::timeout(timeout, future).await?
}

fn compile(client: &Client, conditions: &Conditions) -> Result<CompiledConditions> {
	let mut var_num = 0;
	compile_conditions(
		client.capabilities(),
		conditions,
		client.engine(),
		&mut var_num,
	)
}

pub(crate) async fn get_one<M: Model, T: DeserializeOwned + Send>(
	client: &Client,
	conditions: &Conditions,
	columns: Option<&[&str]>,
	timeout: Duration,
	force_writer: bool,
) -> Result<T> {
	let backend = client.read_backend(force_writer)?;
	let compiled = compile(client, conditions)?;

	let mut query = SelectQuery::new(client.get_table_name(M::table_name()));
	if let Some(columns) = columns {
		query = query.columns(columns.iter().copied());
	}
	if !compiled.is_empty() {
		query = query.conditions(compiled);
	}
	let (sql, params) = query.build(backend.as_ref());

	let row = with_timeout(timeout, backend.fetch_optional(&sql, params))
		.await?
		.ok_or(Error::NoResults)?;
	row_to(row)
}

pub(crate) async fn get_many<M: Model, T: DeserializeOwned + Send>(
	client: &Client,
	conditions: &Conditions,
	query_params: Option<&QueryParams>,
	columns: Option<&[&str]>,
	timeout: Duration,
) -> Result<Vec<T>> {
	let backend = client.read_backend(false)?;
	let compiled = compile(client, conditions)?;

	let default_params = QueryParams::default();
	let mut query = SelectQuery::new(client.get_table_name(M::table_name()))
		.apply_params(query_params.unwrap_or(&default_params));
	if let Some(columns) = columns {
		query = query.columns(columns.iter().copied());
	}
	if !compiled.is_empty() {
		query = query.conditions(compiled);
	}
	let (sql, params) = query.build(backend.as_ref());

	let rows = with_timeout(timeout, backend.fetch_all(&sql, params)).await?;
	if rows.is_empty() {
		return Err(Error::NoResults);
	}
	rows.into_iter().map(row_to).collect()
}

pub(crate) async fn get_many_columns<M: Model>(
	client: &Client,
	conditions: &Conditions,
	query_params: Option<&QueryParams>,
	columns: &[&str],
	timeout: Duration,
) -> Result<Vec<crate::types::Row>> {
	let backend = client.read_backend(false)?;
	let compiled = compile(client, conditions)?;

	let default_params = QueryParams::default();
	let mut query = SelectQuery::new(client.get_table_name(M::table_name()))
		.columns(columns.iter().copied())
		.apply_params(query_params.unwrap_or(&default_params));
	if !compiled.is_empty() {
		query = query.conditions(compiled);
	}
	let (sql, params) = query.build(backend.as_ref());

	let rows = with_timeout(timeout, backend.fetch_all(&sql, params)).await?;
	if rows.is_empty() {
		return Err(Error::NoResults);
	}
	Ok(rows)
}

pub(crate) async fn count<M: Model>(
	client: &Client,
	conditions: &Conditions,
	timeout: Duration,
) -> Result<i64> {
	let backend = client.read_backend(false)?;
	let compiled = compile(client, conditions)?;

	let mut query = SelectQuery::new(client.get_table_name(M::table_name()))
		.columns([format!("COUNT(*) AS {}", COUNT_FIELD)]);
	if !compiled.is_empty() {
		query = query.conditions(compiled);
	}
	let (sql, params) = query.build(backend.as_ref());

	let row = with_timeout(timeout, backend.fetch_one(&sql, params)).await?;
	Ok(row
		.value(COUNT_FIELD)
		.map(coerce_to_i64)
		.unwrap_or_default())
}

pub(crate) async fn aggregate<M: Model>(
	client: &Client,
	conditions: &Conditions,
	aggregate_column: &str,
	timeout: Duration,
) -> Result<HashMap<String, i64>> {
	let backend = client.read_backend(false)?;
	let compiled = compile(client, conditions)?;

	// The date wrapping only applies to unfiltered aggregations
	let group_expression = if compiled.is_empty() {
		aggregate_date_expression(client.engine(), aggregate_column)
	} else {
		aggregate_column.to_string()
	};

	let mut query = SelectQuery::new(client.get_table_name(M::table_name()))
		.columns([
			format!("{} AS {}", group_expression, MONGO_ID_FIELD),
			format!("COUNT({}) AS {}", SQL_ID_FIELD, COUNT_FIELD),
		])
		.group_by(group_expression.clone());
	if !compiled.is_empty() {
		query = query.conditions(compiled);
	}
	let (sql, params) = query.build(backend.as_ref());

	let rows = with_timeout(timeout, backend.fetch_all(&sql, params)).await?;
	let mut result = HashMap::with_capacity(rows.len());
	for row in rows {
		let key = row
			.value(MONGO_ID_FIELD)
			.map(|v| v.to_key_string())
			.unwrap_or_default();
		let total = row.value(COUNT_FIELD).map(coerce_to_i64).unwrap_or_default();
		result.insert(key, total);
	}
	Ok(result)
}

pub(crate) async fn save<M: Model>(
	client: &Client,
	model: &M,
	tx: &mut Transaction,
	is_new: bool,
	commit_after: bool,
) -> Result<()> {
	let backend = client.write_backend()?;
	let values = model_values(model)?;
	let columns: Vec<&str> = M::columns().iter().map(|c| c.name).collect();

	let mut insert = InsertQuery::new(client.get_table_name(M::table_name()), columns)
		.values(values);
	if !is_new {
		insert = insert.upsert_on(SQL_ID_FIELD);
	}
	let (sql, params) = insert.build(backend.as_ref());

	// The driver path runs inside a panic guard: a panicking driver rolls
	// the transaction back exactly once and surfaces as a driver error.
	let outcome = std::panic::AssertUnwindSafe(async {
		if tx.has_sql() {
			tx.execute(&sql, params).await.map(|_| ())
		} else {
			backend.execute(&sql, params).await.map(|_| ())
		}
	})
	.catch_unwind()
	.await;

	match outcome {
		Ok(Ok(())) => {
			if commit_after {
				tx.commit().await?;
			}
			Ok(())
		}
		Ok(Err(err)) => {
			let _ = tx.rollback().await;
			Err(err)
		}
		Err(payload) => {
			let message = panic_payload_message(payload.as_ref());
			debug!(model = M::model_name(), "panic recovered: {}", message);
			let _ = tx.rollback().await;
			Err(Error::Driver(format!("panic recovered: {}", message)))
		}
	}
}

fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unknown panic".to_string()
	}
}

pub(crate) async fn increment<M: Model>(
	client: &Client,
	model: &M,
	field_name: &str,
	delta: i64,
) -> Result<i64> {
	let id = model
		.id()
		.ok_or_else(|| Error::Driver(format!("model is missing an {} field", SQL_ID_FIELD)))?;
	let backend = client.write_backend()?;
	let table = client.get_table_name(M::table_name());

	let executor = backend.begin().await?;
	let mut tx = Transaction::from_sql(executor);

	let lookup = Conditions::from([(
		SQL_ID_FIELD.to_string(),
		crate::conditions::ConditionValue::String(id.clone()),
	)]);
	let compiled = compile(client, &lookup)?;

	let (select_sql, select_params) = SelectQuery::new(table.as_str())
		.columns([field_name])
		.conditions(compiled.clone())
		.row_lock()
		.build(backend.as_ref());

	let row = match tx.fetch_optional(&select_sql, select_params).await {
		Ok(row) => row,
		Err(err) => {
			let _ = tx.rollback().await;
			return Err(err);
		}
	};

	let new_value = match row {
		// Absent rows read as zero and are never inserted here
		None => delta,
		Some(row) => {
			let current = row.value(field_name).map(coerce_to_i64).unwrap_or_default();
			let new_value = current + delta;
			let (update_sql, update_params) = UpdateQuery::new(table.as_str())
				.set(field_name, QueryValue::Int(new_value))
				.conditions(compiled)
				.build(backend.as_ref());
			if let Err(err) = tx.execute(&update_sql, update_params).await {
				let _ = tx.rollback().await;
				return Err(err);
			}
			new_value
		}
	};

	tx.commit().await?;
	Ok(new_value)
}

pub(crate) async fn create_in_batches<M: Model>(
	client: &Client,
	models: &[M],
	batch_size: usize,
) -> Result<()> {
	if models.is_empty() {
		return Ok(());
	}
	let backend = client.write_backend()?;
	let table = client.get_table_name(M::table_name());
	let columns: Vec<&str> = M::columns().iter().map(|c| c.name).collect();
	let batch_size = batch_size.max(1);

	for chunk in models.chunks(batch_size) {
		let mut insert = InsertQuery::new(table.as_str(), columns.iter().copied());
		for model in chunk {
			insert = insert.values(model_values(model)?);
		}
		let (sql, params) = insert.build(backend.as_ref());
		backend.execute(&sql, params).await?;
	}
	Ok(())
}
