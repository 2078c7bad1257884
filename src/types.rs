//! Common value types shared by every backend
//!
//! `QueryValue` is the parameter/result value vocabulary, `Row` the
//! engine-neutral result row, `QueryResult` the write outcome.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single bind parameter or result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Bytes(Vec<u8>),
	Timestamp(chrono::DateTime<chrono::Utc>),
}

impl QueryValue {
	/// Render the value as a grouping key string
	///
	/// Used by aggregation, where group keys of any scalar type are
	/// reported as strings.
	pub fn to_key_string(&self) -> String {
		match self {
			QueryValue::Null => String::new(),
			QueryValue::Bool(b) => b.to_string(),
			QueryValue::Int(i) => i.to_string(),
			QueryValue::Float(f) => f.to_string(),
			QueryValue::String(s) => s.clone(),
			QueryValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
			QueryValue::Timestamp(dt) => dt.to_rfc3339(),
		}
	}
}

impl From<&str> for QueryValue {
	fn from(s: &str) -> Self {
		QueryValue::String(s.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(s: String) -> Self {
		QueryValue::String(s)
	}
}

impl From<i64> for QueryValue {
	fn from(i: i64) -> Self {
		QueryValue::Int(i)
	}
}

impl From<i32> for QueryValue {
	fn from(i: i32) -> Self {
		QueryValue::Int(i as i64)
	}
}

impl From<f64> for QueryValue {
	fn from(f: f64) -> Self {
		QueryValue::Float(f)
	}
}

impl From<bool> for QueryValue {
	fn from(b: bool) -> Self {
		QueryValue::Bool(b)
	}
}

impl From<chrono::DateTime<chrono::Utc>> for QueryValue {
	fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
		QueryValue::Timestamp(dt)
	}
}

/// Outcome of a write statement
#[derive(Debug, Clone, Copy)]
pub struct QueryResult {
	pub rows_affected: u64,
}

/// A result row keyed by column name
#[derive(Debug, Clone, Default)]
pub struct Row {
	data: HashMap<String, QueryValue>,
}

impl Row {
	pub fn new() -> Self {
		Self {
			data: HashMap::new(),
		}
	}

	pub fn insert(&mut self, column: impl Into<String>, value: QueryValue) {
		self.data.insert(column.into(), value);
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Raw access to a cell
	pub fn value(&self, column: &str) -> Option<&QueryValue> {
		self.data.get(column)
	}

	/// Typed extraction of a cell
	///
	/// # Examples
	///
	/// ```
	/// use polystore::types::{QueryValue, Row};
	///
	/// let mut row = Row::new();
	/// row.insert("total", QueryValue::Int(42));
	/// let total: i64 = row.get("total").unwrap();
	/// assert_eq!(total, 42);
	/// ```
	pub fn get<T: TryFrom<QueryValue, Error = Error>>(&self, column: &str) -> Result<T, Error> {
		self.data
			.get(column)
			.cloned()
			.ok_or_else(|| Error::ColumnNotFound(column.to_string()))
			.and_then(T::try_from)
	}

	/// Iterate over all cells
	pub fn iter(&self) -> impl Iterator<Item = (&String, &QueryValue)> {
		self.data.iter()
	}

	/// Convert the row into a JSON object for serde-based model hydration
	pub fn into_json(self) -> serde_json::Value {
		let map = self
			.data
			.into_iter()
			.map(|(k, v)| (k, query_value_to_json(v)))
			.collect::<serde_json::Map<String, serde_json::Value>>();
		serde_json::Value::Object(map)
	}
}

fn query_value_to_json(value: QueryValue) -> serde_json::Value {
	match value {
		QueryValue::Null => serde_json::Value::Null,
		QueryValue::Bool(b) => serde_json::Value::Bool(b),
		QueryValue::Int(i) => serde_json::Value::Number(i.into()),
		QueryValue::Float(f) => serde_json::Number::from_f64(f)
			.map(serde_json::Value::Number)
			.unwrap_or(serde_json::Value::Null),
		QueryValue::String(s) => serde_json::Value::String(s),
		QueryValue::Bytes(b) => {
			serde_json::Value::Array(b.into_iter().map(|byte| byte.into()).collect())
		}
		QueryValue::Timestamp(dt) => serde_json::Value::String(
			dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
		),
	}
}

impl TryFrom<QueryValue> for i64 {
	type Error = Error;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Int(i) => Ok(i),
			other => Err(Error::TypeConversion(format!(
				"cannot convert {:?} to i64",
				other
			))),
		}
	}
}

impl TryFrom<QueryValue> for String {
	type Error = Error;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::String(s) => Ok(s),
			other => Err(Error::TypeConversion(format!(
				"cannot convert {:?} to String",
				other
			))),
		}
	}
}

impl TryFrom<QueryValue> for bool {
	type Error = Error;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Bool(b) => Ok(b),
			other => Err(Error::TypeConversion(format!(
				"cannot convert {:?} to bool",
				other
			))),
		}
	}
}

impl TryFrom<QueryValue> for f64 {
	type Error = Error;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Float(f) => Ok(f),
			other => Err(Error::TypeConversion(format!(
				"cannot convert {:?} to f64",
				other
			))),
		}
	}
}

impl TryFrom<QueryValue> for chrono::DateTime<chrono::Utc> {
	type Error = Error;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Timestamp(dt) => Ok(dt),
			other => Err(Error::TypeConversion(format!(
				"cannot convert {:?} to DateTime<Utc>",
				other
			))),
		}
	}
}

/// Coerce a numeric-ish cell to a signed 64-bit value
///
/// Used by atomic increments where the stored counter may come back from
/// the driver as an integer, float or numeric string. Anything else is 0.
pub(crate) fn coerce_to_i64(value: &QueryValue) -> i64 {
	match value {
		QueryValue::Int(i) => *i,
		QueryValue::Float(f) => *f as i64,
		QueryValue::String(s) => s.parse::<i64>().unwrap_or(0),
		_ => 0,
	}
}
