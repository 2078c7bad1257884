//! Recursive descent compiler from predicate trees to SQL WHERE fragments
//!
//! Fragments use named bind variables of the form `@var<N>`, with `N`
//! allocated from a counter local to one compilation. No user-supplied
//! string is concatenated into a fragment except field names, JSON path
//! components and the already-escaped literals of the JSON probes.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::conditions::dialect::{format_condition_value, json_array_contains, json_object_probe};
use crate::conditions::{
	ConditionValue, Conditions, CONDITION_AND, CONDITION_EXISTS, CONDITION_GT, CONDITION_GTE,
	CONDITION_IN, CONDITION_LT, CONDITION_LTE, CONDITION_NE, CONDITION_NIN, CONDITION_OR,
};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::types::QueryValue;

/// The client-configured custom field categories
///
/// Field names in the array set compile to JSON-array containment probes;
/// names in the object set compile to JSON-object path extraction. The
/// object set always contains `metadata`. Both sets are fixed at client
/// construction and never written afterwards.
#[derive(Debug, Clone, Default)]
pub struct FieldCapabilities {
	array_fields: HashSet<String>,
	object_fields: HashSet<String>,
}

impl FieldCapabilities {
	pub fn new<I, J>(array_fields: I, object_fields: J) -> Self
	where
		I: IntoIterator<Item = String>,
		J: IntoIterator<Item = String>,
	{
		let mut object_fields: HashSet<String> = object_fields.into_iter().collect();
		object_fields.insert(crate::conditions::METADATA_FIELD.to_string());
		Self {
			array_fields: array_fields.into_iter().collect(),
			object_fields,
		}
	}

	pub fn is_array_field(&self, field: &str) -> bool {
		self.array_fields.contains(field)
	}

	pub fn is_object_field(&self, field: &str) -> bool {
		self.object_fields.contains(field)
	}

	pub fn array_fields(&self) -> impl Iterator<Item = &str> {
		self.array_fields.iter().map(String::as_str)
	}

	pub fn object_fields(&self) -> impl Iterator<Item = &str> {
		self.object_fields.iter().map(String::as_str)
	}
}

/// The output of one compilation: WHERE fragments plus their bind map
///
/// Fragments are combined with `AND` by the query builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledConditions {
	pub clauses: Vec<String>,
	pub binds: HashMap<String, QueryValue>,
}

impl CompiledConditions {
	pub fn is_empty(&self) -> bool {
		self.clauses.is_empty()
	}
}

#[derive(Debug, Default)]
struct WhereAccumulator {
	clauses: Vec<String>,
	binds: HashMap<String, QueryValue>,
}

impl WhereAccumulator {
	fn push(&mut self, clause: String) {
		self.clauses.push(clause);
	}

	fn push_with_binds(&mut self, clause: String, binds: HashMap<String, QueryValue>) {
		self.clauses.push(clause);
		self.binds.extend(binds);
	}
}

/// Compile a predicate tree against one engine
///
/// The tree itself is never mutated. Internal shape violations (for
/// example a comparator without a parent field) surface as
/// [`Error::Translation`].
///
/// # Examples
///
/// ```
/// use polystore::conditions::sql::{compile_conditions, FieldCapabilities};
/// use polystore::conditions::conditions_from_json;
/// use polystore::engine::Engine;
/// use serde_json::json;
///
/// let caps = FieldCapabilities::default();
/// let conditions = conditions_from_json(json!({ "ids": { "$in": ["a", "b", "c"] } }));
/// let mut var_num = 0;
/// let compiled = compile_conditions(&caps, &conditions, Engine::MySql, &mut var_num).unwrap();
/// assert_eq!(compiled.clauses, vec!["ids IN (@var0,@var1,@var2)".to_string()]);
/// assert_eq!(var_num, 3);
/// ```
pub fn compile_conditions(
	caps: &FieldCapabilities,
	conditions: &Conditions,
	engine: Engine,
	var_num: &mut usize,
) -> Result<CompiledConditions> {
	let start = *var_num;
	let outcome = catch_unwind(AssertUnwindSafe(|| {
		let mut accumulator = WhereAccumulator::default();
		let mut counter = start;
		process_conditions(caps, &mut accumulator, conditions, engine, &mut counter, None);
		(accumulator, counter)
	}));

	match outcome {
		Ok((accumulator, counter)) => {
			*var_num = counter;
			Ok(CompiledConditions {
				clauses: accumulator.clauses,
				binds: accumulator.binds,
			})
		}
		Err(payload) => Err(Error::Translation(panic_message(payload.as_ref()))),
	}
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"unexpected predicate shape".to_string()
	}
}

fn allocate_var(var_num: &mut usize) -> String {
	let name = format!("var{}", var_num);
	*var_num += 1;
	name
}

fn process_conditions(
	caps: &FieldCapabilities,
	accumulator: &mut WhereAccumulator,
	conditions: &Conditions,
	engine: Engine,
	var_num: &mut usize,
	parent_key: Option<&str>,
) {
	for (key, condition) in conditions {
		match key.as_str() {
			CONDITION_AND => {
				process_where_and(caps, accumulator, condition, engine, var_num);
			}
			CONDITION_OR => {
				process_where_or(caps, accumulator, condition, engine, var_num);
			}
			CONDITION_GT | CONDITION_GTE | CONDITION_LT | CONDITION_LTE | CONDITION_NE => {
				let parent = expect_parent(parent_key, key);
				let operator = comparison_operator(key);
				let var_name = allocate_var(var_num);
				let mut binds = HashMap::new();
				binds.insert(var_name.clone(), format_condition_value(condition, engine));
				accumulator.push_with_binds(
					format!("{} {} @{}", parent, operator, var_name),
					binds,
				);
			}
			CONDITION_EXISTS => {
				let parent = expect_parent(parent_key, key);
				match condition {
					ConditionValue::Bool(true) => {
						accumulator.push(format!("{} IS NOT NULL", parent));
					}
					ConditionValue::Bool(false) => {
						accumulator.push(format!("{} IS NULL", parent));
					}
					other => panic!("$exists requires a boolean, got {:?}", other),
				}
			}
			CONDITION_IN | CONDITION_NIN => {
				let parent = expect_parent(parent_key, key);
				let values = expect_array(condition, key);
				let mut var_names = Vec::with_capacity(values.len());
				let mut binds = HashMap::new();
				for value in values {
					let var_name = allocate_var(var_num);
					var_names.push(format!("@{}", var_name));
					binds.insert(var_name, format_condition_value(value, engine));
				}
				let operator = if key == CONDITION_IN { "IN" } else { "NOT IN" };
				accumulator.push_with_binds(
					format!("{} {} ({})", parent, operator, var_names.join(",")),
					binds,
				);
			}
			field if caps.is_array_field(field) => {
				let formatted = format_condition_value(condition, engine);
				let value = match formatted {
					QueryValue::String(s) => s,
					other => panic!(
						"array containment on {} requires a string value, got {:?}",
						field, other
					),
				};
				accumulator.push(json_array_contains(engine, field, &value));
			}
			field if caps.is_object_field(field) => {
				let clause = json_object_probe(engine, field, condition);
				if !clause.is_empty() {
					accumulator.push(clause);
				}
			}
			field => match condition {
				ConditionValue::Null => {
					accumulator.push(format!("{} IS NULL", field));
				}
				ConditionValue::Object(nested) => {
					process_conditions(caps, accumulator, nested, engine, var_num, Some(field));
				}
				value => {
					let var_name = allocate_var(var_num);
					let mut binds = HashMap::new();
					binds.insert(var_name.clone(), format_condition_value(value, engine));
					accumulator.push_with_binds(format!("{} = @{}", field, var_name), binds);
				}
			},
		}
	}
}

fn comparison_operator(key: &str) -> &'static str {
	match key {
		CONDITION_GT => ">",
		CONDITION_GTE => ">=",
		CONDITION_LT => "<",
		CONDITION_LTE => "<=",
		CONDITION_NE => "!=",
		other => panic!("unknown comparison operator {}", other),
	}
}

fn expect_parent<'a>(parent_key: Option<&'a str>, operator: &str) -> &'a str {
	match parent_key {
		Some(parent) => parent,
		None => panic!("operator {} requires a parent field", operator),
	}
}

fn expect_array<'a>(condition: &'a ConditionValue, operator: &str) -> &'a [ConditionValue] {
	match condition {
		ConditionValue::Array(items) => items,
		other => panic!("operator {} requires a sequence, got {:?}", operator, other),
	}
}

fn process_where_and(
	caps: &FieldCapabilities,
	accumulator: &mut WhereAccumulator,
	condition: &ConditionValue,
	engine: Engine,
	var_num: &mut usize,
) {
	let elements = expect_array(condition, CONDITION_AND);
	let mut sub = WhereAccumulator::default();
	for element in elements {
		let map = expect_object(element, CONDITION_AND);
		process_conditions(caps, &mut sub, map, engine, var_num, None);
	}

	let clause = format!(" ( {} ) ", sub.clauses.join(" AND "));
	if sub.binds.is_empty() {
		accumulator.push(clause);
	} else {
		accumulator.push_with_binds(clause, sub.binds);
	}
}

fn process_where_or(
	caps: &FieldCapabilities,
	accumulator: &mut WhereAccumulator,
	condition: &ConditionValue,
	engine: Engine,
	var_num: &mut usize,
) {
	let elements = expect_array(condition, CONDITION_OR);
	let mut branches = Vec::with_capacity(elements.len());
	let mut or_binds = HashMap::new();
	for element in elements {
		let map = expect_object(element, CONDITION_OR);
		let mut branch = WhereAccumulator::default();
		process_conditions(caps, &mut branch, map, engine, var_num, None);
		branches.push(branch.clauses.join(" AND "));
		or_binds.extend(branch.binds);
	}

	let clause = format!(" ( ({}) ) ", branches.join(") OR ("));
	if or_binds.is_empty() {
		accumulator.push(clause);
	} else {
		accumulator.push_with_binds(clause, or_binds);
	}
}

fn expect_object<'a>(value: &'a ConditionValue, operator: &str) -> &'a Conditions {
	match value {
		ConditionValue::Object(map) => map,
		other => panic!(
			"elements of {} must be mappings, got {:?}",
			operator, other
		),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::conditions::conditions_from_json;
	use crate::custom_types::NullTime;
	use chrono::TimeZone;
	use rstest::rstest;
	use serde_json::json;

	fn caps_with_arrays() -> FieldCapabilities {
		FieldCapabilities::new(
			vec!["field_in_ids".to_string(), "field_out_ids".to_string()],
			vec![],
		)
	}

	#[test]
	fn in_operator_allocates_dense_variables() {
		let conditions = conditions_from_json(json!({
			"ids": { "$in": ["a", "b", "c"] },
		}));
		let mut var_num = 0;
		let compiled = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::MySql,
			&mut var_num,
		)
		.unwrap();

		assert_eq!(compiled.clauses, vec!["ids IN (@var0,@var1,@var2)"]);
		assert_eq!(compiled.binds["var0"], QueryValue::from("a"));
		assert_eq!(compiled.binds["var1"], QueryValue::from("b"));
		assert_eq!(compiled.binds["var2"], QueryValue::from("c"));
		assert_eq!(var_num, 3);
	}

	#[rstest]
	#[case(Engine::MySql, "2022-04-04 15:12:37")]
	#[case(Engine::Postgres, "2022-04-04T15:12:37Z")]
	#[case(Engine::Sqlite, "2022-04-04T15:12:37.651Z")]
	fn timestamp_binds_format_per_engine(#[case] engine: Engine, #[case] expected: &str) {
		let time = chrono::Utc.with_ymd_and_hms(2022, 4, 4, 15, 12, 37).unwrap()
			+ chrono::Duration::nanoseconds(651_387_237);
		let mut inner = Conditions::new();
		inner.insert(
			CONDITION_GT.to_string(),
			ConditionValue::Timestamp(NullTime::new(time)),
		);
		let mut conditions = Conditions::new();
		conditions.insert("created_at".to_string(), ConditionValue::Object(inner));

		let mut var_num = 0;
		let compiled = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			engine,
			&mut var_num,
		)
		.unwrap();

		assert_eq!(compiled.clauses, vec!["created_at > @var0"]);
		assert_eq!(compiled.binds["var0"], QueryValue::from(expected));
	}

	#[test]
	fn array_field_compiles_to_containment_probe() {
		let conditions = conditions_from_json(json!({ "field_in_ids": "id_1" }));
		let mut var_num = 0;
		let compiled = compile_conditions(
			&caps_with_arrays(),
			&conditions,
			Engine::Sqlite,
			&mut var_num,
		)
		.unwrap();

		assert_eq!(
			compiled.clauses,
			vec![r#"EXISTS (SELECT 1 FROM json_each(field_in_ids) WHERE value = "id_1")"#]
		);
		assert!(compiled.binds.is_empty());
		assert_eq!(var_num, 0);
	}

	#[test]
	fn nested_and_or_matches_expected_shape() {
		let conditions = conditions_from_json(json!({
			"$and": [
				{ "reference_id": "reference" },
				{ "number": 12 },
				{ "$or": [
					{ "field_in_ids": "value_id" },
					{ "field_out_ids": "value_id" },
				]},
			],
		}));

		let mut var_num = 0;
		let compiled = compile_conditions(
			&caps_with_arrays(),
			&conditions,
			Engine::Sqlite,
			&mut var_num,
		)
		.unwrap();

		let expected = concat!(
			" ( reference_id = @var0 AND number = @var1 AND ",
			r#" ( (EXISTS (SELECT 1 FROM json_each(field_in_ids) WHERE value = "value_id")) "#,
			r#"OR (EXISTS (SELECT 1 FROM json_each(field_out_ids) WHERE value = "value_id")) ) "#,
			" ) ",
		);
		assert_eq!(compiled.clauses, vec![expected]);
		assert_eq!(compiled.binds.len(), 2);
		assert_eq!(compiled.binds["var0"], QueryValue::from("reference"));
		assert_eq!(compiled.binds["var1"], QueryValue::Int(12));
		assert_eq!(var_num, 2);
	}

	#[test]
	fn empty_logical_branches_still_emit() {
		let conditions = conditions_from_json(json!({ "$and": [] }));
		let mut var_num = 0;
		let compiled = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::MySql,
			&mut var_num,
		)
		.unwrap();
		assert_eq!(compiled.clauses, vec![" (  ) "]);
	}

	#[test]
	fn exists_compiles_to_null_checks() {
		let conditions = conditions_from_json(json!({
			"a": { "$exists": true },
			"b": { "$exists": false },
		}));
		let mut var_num = 0;
		let compiled = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::Postgres,
			&mut var_num,
		)
		.unwrap();
		assert_eq!(compiled.clauses, vec!["a IS NOT NULL", "b IS NULL"]);
		assert_eq!(var_num, 0);
	}

	#[test]
	fn nin_compiles_to_not_in() {
		let conditions = conditions_from_json(json!({
			"status": { "$nin": ["draft", "void"] },
		}));
		let mut var_num = 5;
		let compiled = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::MySql,
			&mut var_num,
		)
		.unwrap();
		assert_eq!(compiled.clauses, vec!["status NOT IN (@var5,@var6)"]);
		assert_eq!(var_num, 7);
	}

	#[test]
	fn bare_null_compiles_to_is_null() {
		let conditions = conditions_from_json(json!({ "deleted_at": null }));
		let mut var_num = 0;
		let compiled = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::Sqlite,
			&mut var_num,
		)
		.unwrap();
		assert_eq!(compiled.clauses, vec!["deleted_at IS NULL"]);
	}

	#[test]
	fn scalar_predicates_compile_identically_across_sql_engines() {
		let conditions = conditions_from_json(json!({
			"$or": [
				{ "amount": { "$gte": 10 } },
				{ "status": "open" },
			],
			"kind": { "$ne": "internal" },
			"ref": { "$exists": true },
		}));

		let mut results = Vec::new();
		for engine in [Engine::MySql, Engine::Postgres, Engine::Sqlite] {
			let mut var_num = 0;
			results.push(
				compile_conditions(
					&FieldCapabilities::default(),
					&conditions,
					engine,
					&mut var_num,
				)
				.unwrap(),
			);
		}
		assert_eq!(results[0], results[1]);
		assert_eq!(results[1], results[2]);
	}

	#[test]
	fn compilation_does_not_mutate_input() {
		let conditions = conditions_from_json(json!({
			"$and": [{ "a": 1 }],
			"metadata": { "k": "v" },
		}));
		let snapshot = conditions.clone();
		let mut var_num = 0;
		compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::MySql,
			&mut var_num,
		)
		.unwrap();
		assert_eq!(conditions, snapshot);
	}

	#[test]
	fn every_referenced_variable_is_bound() {
		let conditions = conditions_from_json(json!({
			"a": { "$in": [1, 2] },
			"b": 3,
			"$and": [{ "c": { "$lt": 4 } }],
		}));
		let mut var_num = 0;
		let compiled = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::Postgres,
			&mut var_num,
		)
		.unwrap();

		let pattern = regex::Regex::new(r"@(var\d+)").unwrap();
		let mut referenced = std::collections::HashSet::new();
		for clause in &compiled.clauses {
			for capture in pattern.captures_iter(clause) {
				referenced.insert(capture[1].to_string());
			}
		}
		assert_eq!(referenced.len(), var_num);
		for name in &referenced {
			assert!(compiled.binds.contains_key(name), "unbound {}", name);
		}
	}

	#[test]
	fn operator_without_parent_is_a_translation_error() {
		let conditions = conditions_from_json(json!({ "$gt": 1 }));
		let mut var_num = 0;
		let err = compile_conditions(
			&FieldCapabilities::default(),
			&conditions,
			Engine::MySql,
			&mut var_num,
		)
		.unwrap_err();
		assert!(matches!(err, Error::Translation(_)));
	}
}
