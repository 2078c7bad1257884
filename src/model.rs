//! Model and projection contracts
//!
//! A model is a serde-serialisable struct with a registered schema
//! descriptor: its table name, column list and string ID attribute. The
//! descriptor replaces runtime reflection for inserts, migrations and
//! partial-update computation.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::{QueryValue, Row};

/// One column of a model's schema descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
	pub name: &'static str,
	/// The column's SQL type fragment, e.g. `TEXT PRIMARY KEY` or `BIGINT`
	pub sql_type: &'static str,
}

impl ColumnDef {
	pub const fn new(name: &'static str, sql_type: &'static str) -> Self {
		Self { name, sql_type }
	}
}

/// A persistable record type
///
/// # Examples
///
/// ```
/// use polystore::model::{ColumnDef, Model};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Widget {
///     id: String,
///     number: i64,
/// }
///
/// impl Model for Widget {
///     fn model_name() -> &'static str {
///         "Widget"
///     }
///
///     fn table_name() -> &'static str {
///         "widgets"
///     }
///
///     fn columns() -> &'static [ColumnDef] {
///         const COLUMNS: &[ColumnDef] = &[
///             ColumnDef::new("id", "TEXT PRIMARY KEY"),
///             ColumnDef::new("number", "BIGINT"),
///         ];
///         COLUMNS
///     }
///
///     fn id(&self) -> Option<String> {
///         Some(self.id.clone())
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
	/// The type identifier used by the migration registry
	fn model_name() -> &'static str;

	/// The base table (or collection) name, before any client prefix
	fn table_name() -> &'static str;

	/// The schema descriptor driving inserts and migrations
	fn columns() -> &'static [ColumnDef];

	/// The record's string ID attribute, when set
	fn id(&self) -> Option<String>;
}

/// A partial read target: a subset of a model's columns
pub trait Projection: DeserializeOwned + Send + Sync + Unpin + 'static {
	/// The columns this projection selects
	fn columns() -> &'static [&'static str];
}

/// A model's descriptor detached from its type, for migration lists
#[derive(Debug, Clone, Copy)]
pub struct ModelDef {
	pub model_name: &'static str,
	pub table_name: &'static str,
	pub columns: &'static [ColumnDef],
}

impl ModelDef {
	pub fn of<M: Model>() -> Self {
		Self {
			model_name: M::model_name(),
			table_name: M::table_name(),
			columns: M::columns(),
		}
	}
}

/// Serialise a model into its column values, ordered per the descriptor
///
/// Columns absent from the serialised form (for example serde-skipped
/// fields) contribute NULL.
pub(crate) fn model_values<M: Model>(model: &M) -> Result<Vec<QueryValue>> {
	let serialized = serde_json::to_value(model)?;
	let map = match serialized {
		serde_json::Value::Object(map) => map,
		other => {
			return Err(Error::Serialization(format!(
				"model must serialise to an object, got {}",
				other
			)))
		}
	};

	Ok(M::columns()
		.iter()
		.map(|column| {
			map.get(column.name)
				.map(json_to_query_value)
				.unwrap_or(QueryValue::Null)
		})
		.collect())
}

/// Convert a JSON value into a bind value
///
/// Composite values are stored in their JSON text form, which is what the
/// JSON probes of the dialects operate on.
pub(crate) fn json_to_query_value(value: &serde_json::Value) -> QueryValue {
	match value {
		serde_json::Value::Null => QueryValue::Null,
		serde_json::Value::Bool(b) => QueryValue::Bool(*b),
		serde_json::Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				QueryValue::Int(i)
			} else {
				QueryValue::Float(n.as_f64().unwrap_or(0.0))
			}
		}
		serde_json::Value::String(s) => QueryValue::String(s.clone()),
		composite => QueryValue::String(composite.to_string()),
	}
}

/// Hydrate a model (or projection) from a result row
///
/// Array and object fields come back from the relational engines as JSON
/// text; when direct hydration fails those cells are re-parsed into their
/// structured form and hydration retried.
pub(crate) fn row_to<T: DeserializeOwned>(row: Row) -> Result<T> {
	let json = row.into_json();
	match serde_json::from_value(json.clone()) {
		Ok(value) => Ok(value),
		Err(first_error) => {
			let relaxed = parse_embedded_json(json);
			serde_json::from_value(relaxed).map_err(|_| {
				Error::Serialization(format!("failed to hydrate row: {}", first_error))
			})
		}
	}
}

fn parse_embedded_json(value: serde_json::Value) -> serde_json::Value {
	match value {
		serde_json::Value::Object(map) => serde_json::Value::Object(
			map.into_iter()
				.map(|(key, cell)| {
					let cell = match &cell {
						serde_json::Value::String(s)
							if s.starts_with('[') || s.starts_with('{') =>
						{
							serde_json::from_str(s).unwrap_or(cell)
						}
						_ => cell,
					};
					(key, cell)
				})
				.collect(),
		),
		other => other,
	}
}
