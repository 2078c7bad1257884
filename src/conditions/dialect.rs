//! Per-engine emission of JSON probes, date expressions and bind values
//!
//! These are the only places where the three relational dialects diverge;
//! scalar comparators compile identically everywhere.

use crate::conditions::{ConditionValue, DATE_FIELDS};
use crate::engine::Engine;
use crate::types::QueryValue;

/// Escape a string for interpolation inside a JSON fragment
///
/// Both `'` and `"` are replaced by their backslash-prefixed forms; no
/// other character is transformed.
pub fn escape_db_string(s: &str) -> String {
	s.replace('\'', "\\'").replace('"', "\\\"")
}

/// Emit a JSON-array containment probe for the given engine
///
/// # Examples
///
/// ```
/// use polystore::conditions::dialect::json_array_contains;
/// use polystore::engine::Engine;
///
/// assert_eq!(
///     json_array_contains(Engine::MySql, "field_in_ids", "id_1"),
///     r#"JSON_CONTAINS(field_in_ids, CAST('["id_1"]' AS JSON))"#
/// );
/// assert_eq!(
///     json_array_contains(Engine::Postgres, "field_in_ids", "id_1"),
///     r#"field_in_ids::jsonb @> '["id_1"]'"#
/// );
/// ```
pub fn json_array_contains(engine: Engine, field: &str, value: &str) -> String {
	match engine {
		Engine::MySql => format!("JSON_CONTAINS({}, CAST('[\"{}\"]' AS JSON))", field, value),
		Engine::Postgres => format!("{}::jsonb @> '[\"{}\"]'", field, value),
		_ => format!(
			"EXISTS (SELECT 1 FROM json_each({}) WHERE value = \"{}\")",
			field, value
		),
	}
}

/// Emit a JSON-object path-extraction probe for the given engine
///
/// The value must be a mapping; pairs are combined with `AND` inside
/// parentheses when there is more than one. Pair order follows the
/// mapping's lexicographic key order.
///
/// # Panics
///
/// Panics when the value is not a mapping. The panic is caught by the
/// compiler entry point and surfaced as a translation error.
pub fn json_object_probe(engine: Engine, field: &str, value: &ConditionValue) -> String {
	let map = match value {
		ConditionValue::Object(map) => map,
		other => panic!("object probe on {} requires a mapping, got {:?}", field, other),
	};

	let mut query_parts: Vec<String> = Vec::new();
	for (key, entry) in map {
		match engine {
			Engine::Postgres => {
				let literal = match entry {
					ConditionValue::String(s) => format!("\"{}\"", escape_db_string(s)),
					other => other.to_json_literal(),
				};
				query_parts.push(format!(
					"{}::jsonb @> '{{\"{}\":{}}}'::jsonb",
					field, key, literal
				));
			}
			_ => match entry {
				ConditionValue::String(s) => {
					query_parts.push(format!(
						"JSON_EXTRACT({}, '$.{}') = \"{}\"",
						field,
						key,
						escape_db_string(s)
					));
				}
				ConditionValue::Object(nested) => {
					for (nested_key, nested_value) in nested {
						query_parts.push(format!(
							"JSON_EXTRACT({}, '$.{}.{}') = {}",
							field,
							key,
							nested_key,
							nested_value.to_json_literal()
						));
					}
				}
				other => {
					query_parts.push(format!(
						"JSON_EXTRACT({}, '$.{}') = {}",
						field,
						key,
						other.to_json_literal()
					));
				}
			},
		}
	}

	match query_parts.len() {
		0 => String::new(),
		1 => query_parts.remove(0),
		_ => format!("({})", query_parts.join(" AND ")),
	}
}

/// Wrap a known date column in the engine's day-granularity expression
///
/// Non-date columns pass through untouched.
pub fn aggregate_date_expression(engine: Engine, column: &str) -> String {
	if !DATE_FIELDS.contains(&column) {
		return column.to_string();
	}

	match engine {
		Engine::MySql => format!("DATE_FORMAT({}, '%Y%m%d')", column),
		Engine::Postgres => format!("to_char({}, 'YYYYMMDD')", column),
		_ => format!("strftime('%Y%m%d', {})", column),
	}
}

/// Format a predicate value into a bind value for the given engine
///
/// Integers stay native; timestamps stringify per engine; an invalid
/// timestamp binds as NULL. Arrays and objects (which never reach the
/// bind map on well-formed trees) fall back to their JSON form.
pub fn format_condition_value(value: &ConditionValue, engine: Engine) -> QueryValue {
	match value {
		ConditionValue::Null => QueryValue::Null,
		ConditionValue::Bool(b) => QueryValue::Bool(*b),
		ConditionValue::Int(i) => QueryValue::Int(*i),
		ConditionValue::Float(f) => QueryValue::Float(*f),
		ConditionValue::String(s) => QueryValue::String(s.clone()),
		ConditionValue::Timestamp(t) => match t.format_for_engine(engine) {
			Some(formatted) => QueryValue::String(formatted),
			None => QueryValue::Null,
		},
		other => QueryValue::String(other.to_json_literal()),
	}
}
