//! Engine-neutral predicate trees and their compilers
//!
//! A predicate is a nested mapping whose keys are either operator keywords
//! (literal strings beginning `$`) or field names. The SQL compiler in
//! [`sql`] turns a tree into parameterised WHERE fragments; the document
//! compiler in [`mongo`] turns the same tree into a BSON filter document.

pub mod dialect;
pub mod mongo;
pub mod sql;

use std::collections::BTreeMap;

use crate::custom_types::NullTime;

/// Condition for an AND statement
pub const CONDITION_AND: &str = "$and";
/// Condition for an OR statement
pub const CONDITION_OR: &str = "$or";
/// Condition for greater than (>)
pub const CONDITION_GT: &str = "$gt";
/// Condition for greater than or equal (>=)
pub const CONDITION_GTE: &str = "$gte";
/// Condition for less than (<)
pub const CONDITION_LT: &str = "$lt";
/// Condition for less than or equal (<=)
pub const CONDITION_LTE: &str = "$lte";
/// Condition for doesn't equal (!=)
pub const CONDITION_NE: &str = "$ne";
/// Condition for an EXISTS statement
pub const CONDITION_EXISTS: &str = "$exists";
/// Condition for an IN statement
pub const CONDITION_IN: &str = "$in";
/// Condition for a NOT IN statement
pub const CONDITION_NIN: &str = "$nin";
/// Condition for an INCREMENT command (document engine)
pub const CONDITION_INC: &str = "$inc";
/// Condition for a SET command (document engine)
pub const CONDITION_SET: &str = "$set";
/// Condition for an UNSET command (document engine)
pub const CONDITION_UNSET: &str = "$unset";
/// Condition for a date-to-string command (document engine)
pub const CONDITION_DATE_TO_STRING: &str = "$dateToString";

/// The metadata object field, registered on every client
pub const METADATA_FIELD: &str = "metadata";
/// The document-engine ID path
pub const MONGO_ID_FIELD: &str = "_id";
/// The relational ID column
pub const SQL_ID_FIELD: &str = "id";
/// The accumulation column used by aggregation
pub const COUNT_FIELD: &str = "count";

/// Standard known date fields
pub const DATE_FIELDS: [&str; 3] = ["created_at", "updated_at", "modified_at"];

/// A value inside a predicate tree
///
/// This mirrors a JSON value, extended with a null-aware timestamp so that
/// predicates can carry instants that format differently per engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Timestamp(NullTime),
	Array(Vec<ConditionValue>),
	Object(BTreeMap<String, ConditionValue>),
}

/// A predicate tree: field or operator keys mapped to their payloads
pub type Conditions = BTreeMap<String, ConditionValue>;

impl ConditionValue {
	/// Whether the value is a scalar (not an array or object)
	pub fn is_scalar(&self) -> bool {
		!matches!(self, ConditionValue::Array(_) | ConditionValue::Object(_))
	}

	/// Render the value as a JSON literal
	///
	/// Used by the JSON-object probes, where non-string leaves are
	/// interpolated in their JSON form.
	pub fn to_json_literal(&self) -> String {
		serde_json::to_string(&self.to_json()).unwrap_or_else(|_| "null".to_string())
	}

	/// Convert to a plain JSON value
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			ConditionValue::Null => serde_json::Value::Null,
			ConditionValue::Bool(b) => serde_json::Value::Bool(*b),
			ConditionValue::Int(i) => serde_json::Value::Number((*i).into()),
			ConditionValue::Float(f) => serde_json::Number::from_f64(*f)
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			ConditionValue::String(s) => serde_json::Value::String(s.clone()),
			ConditionValue::Timestamp(t) => match t.0 {
				Some(time) => serde_json::Value::String(
					time.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
				),
				None => serde_json::Value::Null,
			},
			ConditionValue::Array(items) => {
				serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
			}
			ConditionValue::Object(map) => serde_json::Value::Object(
				map.iter()
					.map(|(k, v)| (k.clone(), v.to_json()))
					.collect(),
			),
		}
	}
}

impl From<serde_json::Value> for ConditionValue {
	/// Normalise a deserialised JSON payload into a predicate value
	///
	/// This is the boundary that lets clients hand in structurally
	/// equivalent trees straight from deserialised request bodies.
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => ConditionValue::Null,
			serde_json::Value::Bool(b) => ConditionValue::Bool(b),
			serde_json::Value::Number(n) => {
				if let Some(i) = n.as_i64() {
					ConditionValue::Int(i)
				} else {
					ConditionValue::Float(n.as_f64().unwrap_or(0.0))
				}
			}
			serde_json::Value::String(s) => ConditionValue::String(s),
			serde_json::Value::Array(items) => {
				ConditionValue::Array(items.into_iter().map(ConditionValue::from).collect())
			}
			serde_json::Value::Object(map) => ConditionValue::Object(
				map.into_iter()
					.map(|(k, v)| (k, ConditionValue::from(v)))
					.collect(),
			),
		}
	}
}

impl From<&str> for ConditionValue {
	fn from(s: &str) -> Self {
		ConditionValue::String(s.to_string())
	}
}

impl From<String> for ConditionValue {
	fn from(s: String) -> Self {
		ConditionValue::String(s)
	}
}

impl From<i64> for ConditionValue {
	fn from(i: i64) -> Self {
		ConditionValue::Int(i)
	}
}

impl From<i32> for ConditionValue {
	fn from(i: i32) -> Self {
		ConditionValue::Int(i as i64)
	}
}

impl From<f64> for ConditionValue {
	fn from(f: f64) -> Self {
		ConditionValue::Float(f)
	}
}

impl From<bool> for ConditionValue {
	fn from(b: bool) -> Self {
		ConditionValue::Bool(b)
	}
}

impl From<NullTime> for ConditionValue {
	fn from(t: NullTime) -> Self {
		ConditionValue::Timestamp(t)
	}
}

impl<T: Into<ConditionValue>> From<Vec<T>> for ConditionValue {
	fn from(items: Vec<T>) -> Self {
		ConditionValue::Array(items.into_iter().map(Into::into).collect())
	}
}

/// Build a predicate tree from a JSON object
///
/// Non-object input yields the empty tree.
///
/// # Examples
///
/// ```
/// use polystore::conditions::conditions_from_json;
/// use serde_json::json;
///
/// let conditions = conditions_from_json(json!({
///     "ids": { "$in": ["a", "b"] },
/// }));
/// assert!(conditions.contains_key("ids"));
/// ```
pub fn conditions_from_json(value: serde_json::Value) -> Conditions {
	match ConditionValue::from(value) {
		ConditionValue::Object(map) => map,
		_ => Conditions::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn json_normalisation() {
		let conditions = conditions_from_json(json!({
			"number": 12,
			"nested": { "$gt": 1.5 },
			"flag": true,
			"missing": null,
		}));
		assert_eq!(conditions["number"], ConditionValue::Int(12));
		assert_eq!(conditions["flag"], ConditionValue::Bool(true));
		assert_eq!(conditions["missing"], ConditionValue::Null);
		match &conditions["nested"] {
			ConditionValue::Object(map) => {
				assert_eq!(map[CONDITION_GT], ConditionValue::Float(1.5));
			}
			other => panic!("expected object, got {:?}", other),
		}
	}

	#[test]
	fn json_literal_rendering() {
		assert_eq!(ConditionValue::from("x").to_json_literal(), "\"x\"");
		assert_eq!(ConditionValue::Int(7).to_json_literal(), "7");
		assert_eq!(ConditionValue::Null.to_json_literal(), "null");
	}

	#[test]
	fn non_object_input_is_empty() {
		assert!(conditions_from_json(json!([1, 2])).is_empty());
		assert!(conditions_from_json(json!("str")).is_empty());
	}
}
