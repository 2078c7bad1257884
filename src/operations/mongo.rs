//! Document-engine implementations of the model operations

use std::collections::HashMap;
use std::time::Duration;

use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{FindOptions, ReturnDocument};
use serde::de::DeserializeOwned;

use crate::client::Client;
use crate::conditions::mongo::{build_mongo_filter, filter_to_document};
use crate::conditions::{Conditions, COUNT_FIELD, DATE_FIELDS, MONGO_ID_FIELD, SQL_ID_FIELD};
use crate::custom_types::compute_unset;
use crate::error::{Error, Result};
use crate::model::{Model, Projection};
use crate::query::QueryParams;
use crate::transaction::Transaction;

async fn with_timeout<T>(
	timeout: Duration,
	future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
	if timeout.is_zero() {
		return future.await;
	}
	tokio::time::timeout(timeout, future).await?
}

fn build_filter(client: &Client, model_id: Option<&str>, conditions: &Conditions) -> Document {
	let filter = build_mongo_filter(model_id, conditions, client.mongo_condition_processor());
	filter_to_document(&filter)
}

/// Swap the relational ID attribute for the document ID path
fn to_storage_document<M: Model>(model: &M) -> Result<Document> {
	let mut document = bson::to_document(model)?;
	if let Some(id) = document.remove(SQL_ID_FIELD) {
		document.insert(MONGO_ID_FIELD, id);
	}
	Ok(document)
}

/// Swap the document ID path back before hydration
fn from_storage_document<T: DeserializeOwned>(mut document: Document) -> Result<T> {
	if let Some(id) = document.remove(MONGO_ID_FIELD) {
		document.insert(SQL_ID_FIELD, id);
	}
	bson::from_document(document).map_err(Into::into)
}

fn find_options(query_params: Option<&QueryParams>, columns: Option<&[&str]>) -> FindOptions {
	let mut options = FindOptions::default();
	if let Some(params) = query_params {
		let params = params.normalized();
		if params.page > 0 && params.page_size > 0 {
			options.limit = Some(params.page_size as i64);
			options.skip = Some((params.page - 1) * params.page_size);
		}
		if !params.order_by_field.is_empty() {
			let direction: i32 = if params.descending() { -1 } else { 1 };
			let mut sort = Document::new();
			sort.insert(params.order_by_field.clone(), direction);
			options.sort = Some(sort);
		}
	}
	if let Some(columns) = columns {
		let mut projection = Document::new();
		for column in columns {
			let path = if *column == SQL_ID_FIELD {
				MONGO_ID_FIELD
			} else {
				*column
			};
			projection.insert(path.to_string(), 1_i32);
		}
		options.projection = Some(projection);
	}
	options
}

pub(crate) async fn get_with_mongo<M: Model>(
	client: &Client,
	model_id: Option<String>,
	conditions: &Conditions,
	timeout: Duration,
) -> Result<M> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let filter = build_filter(client, model_id.as_deref(), conditions);

	let document = with_timeout(timeout, async {
		collection.find_one(filter).await.map_err(Into::into)
	})
	.await?
	.ok_or(Error::NoResults)?;
	from_storage_document(document)
}

pub(crate) async fn get_partial_with_mongo<M: Model, P: Projection>(
	client: &Client,
	conditions: &Conditions,
	timeout: Duration,
) -> Result<P> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let filter = build_filter(client, None, conditions);
	let options = find_options(None, Some(P::columns()));

	let document = with_timeout(timeout, async {
		collection
			.find_one(filter)
			.projection(options.projection.unwrap_or_default())
			.await
			.map_err(Into::into)
	})
	.await?
	.ok_or(Error::NoResults)?;
	from_storage_document(document)
}

pub(crate) async fn get_many_with_mongo<M: Model, T: DeserializeOwned + Send>(
	client: &Client,
	conditions: &Conditions,
	query_params: Option<&QueryParams>,
	columns: Option<&[&str]>,
	timeout: Duration,
) -> Result<Vec<T>> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let filter = build_filter(client, None, conditions);
	let options = find_options(query_params, columns);

	let documents: Vec<Document> = with_timeout(timeout, async {
		let cursor = collection.find(filter).with_options(options).await?;
		cursor.try_collect().await.map_err(Into::into)
	})
	.await?;

	if documents.is_empty() {
		return Err(Error::NoResults);
	}
	documents.into_iter().map(from_storage_document).collect()
}

pub(crate) async fn get_many_columns_with_mongo<M: Model>(
	client: &Client,
	conditions: &Conditions,
	query_params: Option<&QueryParams>,
	columns: &[&str],
	timeout: Duration,
) -> Result<Vec<crate::types::Row>> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let filter = build_filter(client, None, conditions);
	let options = find_options(query_params, Some(columns));

	let documents: Vec<Document> = with_timeout(timeout, async {
		let cursor = collection.find(filter).with_options(options).await?;
		cursor.try_collect().await.map_err(Into::into)
	})
	.await?;

	if documents.is_empty() {
		return Err(Error::NoResults);
	}
	Ok(documents.into_iter().map(document_to_row).collect())
}

fn document_to_row(document: Document) -> crate::types::Row {
	let mut row = crate::types::Row::new();
	for (key, value) in document {
		let column = if key == MONGO_ID_FIELD {
			SQL_ID_FIELD.to_string()
		} else {
			key
		};
		row.insert(column, bson_to_query_value(value));
	}
	row
}

fn bson_to_query_value(value: Bson) -> crate::types::QueryValue {
	use crate::types::QueryValue;

	match value {
		Bson::Null => QueryValue::Null,
		Bson::Boolean(b) => QueryValue::Bool(b),
		Bson::Int32(i) => QueryValue::Int(i as i64),
		Bson::Int64(i) => QueryValue::Int(i),
		Bson::Double(f) => QueryValue::Float(f),
		Bson::String(s) => QueryValue::String(s),
		Bson::DateTime(dt) => QueryValue::Timestamp(dt.to_chrono()),
		other => QueryValue::String(other.to_string()),
	}
}

pub(crate) async fn count_with_mongo<M: Model>(
	client: &Client,
	conditions: &Conditions,
	timeout: Duration,
) -> Result<i64> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let filter = build_filter(client, None, conditions);

	let total = with_timeout(timeout, async {
		collection.count_documents(filter).await.map_err(Into::into)
	})
	.await?;
	Ok(total as i64)
}

/// Build the grouping pipeline for an aggregation
///
/// Unfiltered aggregations over a known date field group on a
/// `$dateToString` day key, which requires the stored value to be a
/// native date (the shape nullable timestamps persist as).
fn aggregation_pipeline(filter: Document, aggregate_column: &str) -> Vec<Document> {
	let mut pipeline: Vec<Document> = Vec::with_capacity(2);
	let unfiltered = filter.is_empty();
	if !unfiltered {
		pipeline.push(doc! { "$match": filter });
	}

	let group_key: Bson = if unfiltered && DATE_FIELDS.contains(&aggregate_column) {
		Bson::Document(doc! {
			"$dateToString": {
				"format": "%Y%m%d",
				"date": format!("${}", aggregate_column),
			},
		})
	} else {
		Bson::String(format!("${}", aggregate_column))
	};
	pipeline.push(doc! {
		"$group": {
			MONGO_ID_FIELD: group_key,
			COUNT_FIELD: { "$sum": 1 },
		},
	});
	pipeline
}

pub(crate) async fn aggregate_with_mongo<M: Model>(
	client: &Client,
	conditions: &Conditions,
	aggregate_column: &str,
	timeout: Duration,
) -> Result<HashMap<String, i64>> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));

	let filter = build_filter(client, None, conditions);
	let pipeline = aggregation_pipeline(filter, aggregate_column);

	let documents: Vec<Document> = with_timeout(timeout, async {
		let cursor = collection.aggregate(pipeline).await?;
		cursor.try_collect().await.map_err(Into::into)
	})
	.await?;

	let mut result = HashMap::with_capacity(documents.len());
	for document in documents {
		let key = match document.get(MONGO_ID_FIELD) {
			Some(Bson::String(s)) => s.clone(),
			Some(other) => other.to_string(),
			None => String::new(),
		};
		let total = match document.get(COUNT_FIELD) {
			Some(Bson::Int32(i)) => *i as i64,
			Some(Bson::Int64(i)) => *i,
			_ => 0,
		};
		result.insert(key, total);
	}
	Ok(result)
}

pub(crate) async fn save_with_mongo<M: Model>(
	client: &Client,
	model: &M,
	tx: &mut Transaction,
	is_new: bool,
) -> Result<()> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let document = to_storage_document(model)?;

	if is_new {
		match tx.mongo_session() {
			Some(session) => {
				collection.insert_one(document).session(session).await?;
			}
			None => {
				collection.insert_one(document).await?;
			}
		}
		return Ok(());
	}

	let id = model
		.id()
		.ok_or_else(|| Error::Driver(format!("model is missing an {} field", SQL_ID_FIELD)))?;

	// Invalid nullable fields are unset rather than overwritten with null
	let unset = compute_unset(model);
	let mut set_document = document;
	set_document.remove(MONGO_ID_FIELD);
	let mut unset_document = Document::new();
	for field in unset {
		set_document.remove(&field);
		unset_document.insert(field, "");
	}

	let mut update = doc! { "$set": set_document };
	if !unset_document.is_empty() {
		update.insert("$unset", unset_document);
	}

	let action = collection
		.update_one(doc! { MONGO_ID_FIELD: id }, update)
		.upsert(true);
	match tx.mongo_session() {
		Some(session) => {
			action.session(session).await?;
		}
		None => {
			action.await?;
		}
	}
	Ok(())
}

pub(crate) async fn increment_with_mongo<M: Model>(
	client: &Client,
	model: &M,
	field_name: &str,
	delta: i64,
) -> Result<i64> {
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let id = model
		.id()
		.ok_or_else(|| Error::Driver(format!("model is missing an {} field", SQL_ID_FIELD)))?;

	// No upsert: a missing document reads as zero and stays absent
	let updated = collection
		.find_one_and_update(
			doc! { MONGO_ID_FIELD: id },
			doc! { "$inc": { field_name: delta } },
		)
		.return_document(ReturnDocument::After)
		.await?;

	match updated {
		None => Ok(delta),
		Some(document) => match document.get(field_name) {
			Some(Bson::Int32(i)) => Ok(*i as i64),
			Some(Bson::Int64(i)) => Ok(*i),
			Some(Bson::Double(f)) => Ok(*f as i64),
			_ => Ok(delta),
		},
	}
}

pub(crate) async fn create_in_batches_mongo<M: Model>(
	client: &Client,
	models: &[M],
	batch_size: usize,
) -> Result<()> {
	if models.is_empty() {
		return Ok(());
	}
	let mongo = client.mongo()?;
	let collection = mongo.collection(&client.get_table_name(M::table_name()));
	let batch_size = batch_size.max(1);

	for chunk in models.chunks(batch_size) {
		let documents = chunk
			.iter()
			.map(to_storage_document)
			.collect::<Result<Vec<_>>>()?;
		collection.insert_many(documents).await?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::custom_types::{NullString, NullTime};
	use crate::model::ColumnDef;
	use chrono::TimeZone;
	use serde::{Deserialize, Serialize};

	#[derive(Debug, Clone, Serialize, Deserialize)]
	struct Widget {
		id: String,
		number: i64,
		note: NullString,
		created_at: NullTime,
	}

	impl Model for Widget {
		fn model_name() -> &'static str {
			"Widget"
		}

		fn table_name() -> &'static str {
			"widgets"
		}

		fn columns() -> &'static [ColumnDef] {
			const COLUMNS: &[ColumnDef] = &[
				ColumnDef::new("id", "TEXT PRIMARY KEY"),
				ColumnDef::new("number", "BIGINT"),
				ColumnDef::new("note", "TEXT"),
				ColumnDef::new("created_at", "TEXT"),
			];
			COLUMNS
		}

		fn id(&self) -> Option<String> {
			Some(self.id.clone())
		}
	}

	fn widget() -> Widget {
		Widget {
			id: "w1".to_string(),
			number: 9,
			note: NullString::from("n"),
			created_at: NullTime::new(
				chrono::Utc.with_ymd_and_hms(2022, 4, 4, 15, 12, 37).unwrap(),
			),
		}
	}

	#[test]
	fn storage_document_uses_the_id_path() {
		let document = to_storage_document(&widget()).unwrap();
		assert_eq!(document.get_str(MONGO_ID_FIELD).unwrap(), "w1");
		assert!(document.get(SQL_ID_FIELD).is_none());

		let back: Widget = from_storage_document(document).unwrap();
		assert_eq!(back.id, "w1");
		assert_eq!(back.number, 9);
		assert!(back.created_at.valid());
	}

	#[test]
	fn stored_date_fields_are_native_dates() {
		let document = to_storage_document(&widget()).unwrap();
		assert!(matches!(
			document.get("created_at"),
			Some(Bson::DateTime(_))
		));
	}

	#[test]
	fn aggregate_pipeline_wraps_date_fields_when_unfiltered() {
		let pipeline = aggregation_pipeline(Document::new(), "created_at");
		assert_eq!(pipeline.len(), 1);

		let group = pipeline[0].get_document("$group").unwrap();
		let key = group.get_document(MONGO_ID_FIELD).unwrap();
		let date_to_string = key.get_document("$dateToString").unwrap();
		assert_eq!(date_to_string.get_str("format").unwrap(), "%Y%m%d");
		assert_eq!(date_to_string.get_str("date").unwrap(), "$created_at");
	}

	#[test]
	fn aggregate_pipeline_date_key_matches_the_stored_shape() {
		// $dateToString needs a native date input; the storage form of a
		// nullable timestamp is exactly that.
		let document = to_storage_document(&widget()).unwrap();
		assert!(matches!(
			document.get("created_at"),
			Some(Bson::DateTime(_))
		));

		let pipeline = aggregation_pipeline(Document::new(), "created_at");
		let group = pipeline[0].get_document("$group").unwrap();
		assert!(group
			.get_document(MONGO_ID_FIELD)
			.unwrap()
			.contains_key("$dateToString"));
	}

	#[test]
	fn aggregate_pipeline_groups_raw_columns() {
		let pipeline = aggregation_pipeline(Document::new(), "number");
		let group = pipeline[0].get_document("$group").unwrap();
		assert_eq!(group.get_str(MONGO_ID_FIELD).unwrap(), "$number");
	}

	#[test]
	fn filtered_aggregations_match_first_and_skip_date_wrapping() {
		let pipeline = aggregation_pipeline(doc! { "number": 9 }, "created_at");
		assert_eq!(pipeline.len(), 2);
		assert!(pipeline[0].contains_key("$match"));

		let group = pipeline[1].get_document("$group").unwrap();
		assert_eq!(group.get_str(MONGO_ID_FIELD).unwrap(), "$created_at");
	}

	#[test]
	fn find_options_translate_pagination_and_sort() {
		let params = QueryParams {
			page: 2,
			page_size: 5,
			order_by_field: "number".to_string(),
			sort_direction: "DESC".to_string(),
		};
		let options = find_options(Some(&params), Some(&["id", "number"]));
		assert_eq!(options.limit, Some(5));
		assert_eq!(options.skip, Some(5));
		assert_eq!(options.sort, Some(doc! { "number": -1 }));
		let projection = options.projection.unwrap();
		assert!(projection.get(MONGO_ID_FIELD).is_some());
		assert!(projection.get("number").is_some());
	}
}
