//! Predicate tree rewriting for the document engine
//!
//! The document compiler walks the same engine-neutral tree as the SQL
//! compiler but rewrites it into a MongoDB filter document: the relational
//! ID attribute becomes the document ID path, the metadata object field
//! becomes an `$and` of key/value pair probes (the pair-list storage
//! shape), and client-registered object fields are delegated to an
//! optional processor that rewrites entries in place.

use bson::{Bson, Document};

use crate::conditions::{
	ConditionValue, Conditions, CONDITION_AND, CONDITION_OR, METADATA_FIELD, MONGO_ID_FIELD,
	SQL_ID_FIELD,
};

/// A client-registered hook that rewrites custom object-field entries
pub type ConditionProcessor = std::sync::Arc<dyn Fn(&mut Conditions) + Send + Sync>;

/// Build a document filter from a predicate tree
///
/// The input tree is cloned, never mutated. When `model_id` carries a
/// non-empty ID attribute it is added as the document ID equality. The
/// resulting top level contains at most one `$and` and one `$or` array.
pub fn build_mongo_filter(
	model_id: Option<&str>,
	conditions: &Conditions,
	processor: Option<&ConditionProcessor>,
) -> Conditions {
	let mut filter = conditions.clone();
	process_mongo_conditions(&mut filter, processor);

	if let Some(id) = model_id {
		if !id.is_empty() {
			filter.insert(
				MONGO_ID_FIELD.to_string(),
				ConditionValue::String(id.to_string()),
			);
		}
	}

	filter
}

fn process_mongo_conditions(conditions: &mut Conditions, processor: Option<&ConditionProcessor>) {
	// Custom object fields first so their $and entries join the metadata ones
	if let Some(process) = processor {
		process(conditions);
	}

	expand_metadata(conditions);

	if let Some(value) = conditions.remove(SQL_ID_FIELD) {
		conditions.insert(MONGO_ID_FIELD.to_string(), value);
	}

	for connective in [CONDITION_AND, CONDITION_OR] {
		if let Some(ConditionValue::Array(elements)) = conditions.get_mut(connective) {
			for element in elements {
				if let ConditionValue::Object(map) = element {
					process_mongo_conditions(map, processor);
				}
			}
		}
	}
}

/// Rewrite the metadata object field into pair-list probes
///
/// `{"metadata": {"k1": "v1"}}` becomes
/// `{"$and": [{"metadata.k": "k1", "metadata.v": "v1"}]}`.
fn expand_metadata(conditions: &mut Conditions) {
	let Some(value) = conditions.remove(METADATA_FIELD) else {
		return;
	};
	let ConditionValue::Object(entries) = value else {
		return;
	};

	let mut pairs: Vec<ConditionValue> = Vec::with_capacity(entries.len());
	for (key, entry) in entries {
		let mut pair = Conditions::new();
		pair.insert(
			format!("{}.k", METADATA_FIELD),
			ConditionValue::String(key),
		);
		pair.insert(format!("{}.v", METADATA_FIELD), entry);
		pairs.push(ConditionValue::Object(pair));
	}

	if pairs.is_empty() {
		return;
	}

	match conditions.get_mut(CONDITION_AND) {
		Some(ConditionValue::Array(existing)) => {
			existing.extend(pairs);
		}
		_ => {
			conditions.insert(CONDITION_AND.to_string(), ConditionValue::Array(pairs));
		}
	}
}

/// Convert a filter tree into a BSON document for the driver
pub fn filter_to_document(filter: &Conditions) -> Document {
	let mut document = Document::new();
	for (key, value) in filter {
		document.insert(key.clone(), condition_value_to_bson(value));
	}
	document
}

pub(crate) fn condition_value_to_bson(value: &ConditionValue) -> Bson {
	match value {
		ConditionValue::Null => Bson::Null,
		ConditionValue::Bool(b) => Bson::Boolean(*b),
		ConditionValue::Int(i) => Bson::Int64(*i),
		ConditionValue::Float(f) => Bson::Double(*f),
		ConditionValue::String(s) => Bson::String(s.clone()),
		// Stored timestamps are native dates, so predicates compare as dates
		ConditionValue::Timestamp(t) => match t.0 {
			Some(time) => Bson::DateTime(bson::DateTime::from_chrono(time)),
			None => Bson::Null,
		},
		ConditionValue::Array(items) => {
			Bson::Array(items.iter().map(condition_value_to_bson).collect())
		}
		ConditionValue::Object(map) => {
			let mut doc = Document::new();
			for (key, entry) in map {
				doc.insert(key.clone(), condition_value_to_bson(entry));
			}
			Bson::Document(doc)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::conditions::conditions_from_json;
	use serde_json::json;
	use std::sync::Arc;

	const OBJECT_METADATA_FIELD: &str = "object_metadata";

	fn to_json(filter: &Conditions) -> serde_json::Value {
		ConditionValue::Object(filter.clone()).to_json()
	}

	/// Rewrites `object_metadata` entries into x/k/v pair probes
	fn object_metadata_processor() -> ConditionProcessor {
		Arc::new(|conditions: &mut Conditions| {
			let Some(ConditionValue::Object(objects)) = conditions.remove(OBJECT_METADATA_FIELD)
			else {
				return;
			};

			let mut pairs: Vec<ConditionValue> = Vec::new();
			for (object, entries) in objects {
				let ConditionValue::Object(entries) = entries else {
					continue;
				};
				for (key, value) in entries {
					let mut pair = Conditions::new();
					pair.insert(
						format!("{}.x", OBJECT_METADATA_FIELD),
						ConditionValue::String(object.clone()),
					);
					pair.insert(
						format!("{}.k", OBJECT_METADATA_FIELD),
						ConditionValue::String(key),
					);
					pair.insert(format!("{}.v", OBJECT_METADATA_FIELD), value);
					pairs.push(ConditionValue::Object(pair));
				}
			}
			if pairs.is_empty() {
				return;
			}
			match conditions.get_mut(CONDITION_AND) {
				Some(ConditionValue::Array(existing)) => existing.extend(pairs),
				_ => {
					conditions
						.insert(CONDITION_AND.to_string(), ConditionValue::Array(pairs));
				}
			}
		})
	}

	#[test]
	fn empty_conditions_stay_empty() {
		let filter = build_mongo_filter(None, &Conditions::new(), None);
		assert!(filter.is_empty());
	}

	#[test]
	fn plain_equality_passes_through() {
		let conditions = conditions_from_json(json!({ "test-key": "test-value" }));
		let filter = build_mongo_filter(None, &conditions, None);
		assert_eq!(to_json(&filter), json!({ "test-key": "test-value" }));
	}

	#[test]
	fn model_id_is_injected() {
		let filter = build_mongo_filter(Some("identifier"), &Conditions::new(), None);
		assert_eq!(to_json(&filter), json!({ "_id": "identifier" }));
	}

	#[test]
	fn empty_model_id_is_ignored() {
		let filter = build_mongo_filter(Some(""), &Conditions::new(), None);
		assert!(filter.is_empty());
	}

	#[test]
	fn id_attribute_renames_inside_or() {
		let conditions = conditions_from_json(json!({
			"$or": [{ "id": "test-key" }],
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		assert_eq!(
			to_json(&filter),
			json!({ "$or": [{ "_id": "test-key" }] })
		);
	}

	#[test]
	fn empty_metadata_is_dropped_and_nesting_processed() {
		let conditions = conditions_from_json(json!({
			"metadata": {},
			"$and": [{ "$or": [{ "id": "test-key" }] }],
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		assert_eq!(
			to_json(&filter),
			json!({ "$and": [{ "$or": [{ "_id": "test-key" }] }] })
		);
	}

	#[test]
	fn metadata_becomes_pair_probe() {
		let conditions = conditions_from_json(json!({
			"metadata": { "test-key": "test-value" },
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		assert_eq!(
			to_json(&filter),
			json!({
				"$and": [{ "metadata.k": "test-key", "metadata.v": "test-value" }],
			})
		);
	}

	#[test]
	fn embedded_metadata_rewrites_in_place() {
		let conditions = conditions_from_json(json!({
			"$and": [
				{ "metadata": { "test-key": "test-value" } },
				{ "id": "identifier" },
			],
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		assert_eq!(
			to_json(&filter),
			json!({
				"$and": [
					{ "$and": [{ "metadata.k": "test-key", "metadata.v": "test-value" }] },
					{ "_id": "identifier" },
				],
			})
		);
	}

	#[test]
	fn multiple_metadata_pairs_each_get_a_probe() {
		let conditions = conditions_from_json(json!({
			"metadata": { "test-key": "test-value", "test-key2": "test-value2" },
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		let and = match &filter[CONDITION_AND] {
			ConditionValue::Array(items) => items,
			other => panic!("expected $and array, got {:?}", other),
		};
		assert_eq!(and.len(), 2);
		let rendered = to_json(&filter);
		let pairs = rendered["$and"].as_array().unwrap();
		assert!(pairs.contains(&json!({
			"metadata.k": "test-key", "metadata.v": "test-value",
		})));
		assert!(pairs.contains(&json!({
			"metadata.k": "test-key2", "metadata.v": "test-value2",
		})));
	}

	#[test]
	fn metadata_pairs_merge_into_existing_and() {
		let conditions = conditions_from_json(json!({
			"metadata": { "test-key": "test-value" },
			"$and": [{ "amount": { "$lt": 98 } }],
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		let rendered = to_json(&filter);
		let pairs = rendered["$and"].as_array().unwrap();
		assert_eq!(pairs.len(), 2);
		assert!(pairs.contains(&json!({ "amount": { "$lt": 98 } })));
		assert!(pairs.contains(&json!({
			"metadata.k": "test-key", "metadata.v": "test-value",
		})));
	}

	#[test]
	fn metadata_and_or_coexist() {
		let conditions = conditions_from_json(json!({
			"metadata": { "test-key": "test-value" },
			"$or": [{ "amount": { "$lt": 98 } }],
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		let rendered = to_json(&filter);
		assert_eq!(rendered["$and"].as_array().unwrap().len(), 1);
		assert_eq!(rendered["$or"].as_array().unwrap().len(), 1);
	}

	#[test]
	fn custom_processor_rewrites_object_fields() {
		let conditions = conditions_from_json(json!({
			"object_metadata": { "testID": { "test-key": "test-value" } },
			"$and": [{ "amount": { "$lt": 98 } }],
		}));
		let processor = object_metadata_processor();
		let filter = build_mongo_filter(None, &conditions, Some(&processor));
		let rendered = to_json(&filter);
		let pairs = rendered["$and"].as_array().unwrap();
		assert_eq!(pairs.len(), 2);
		assert!(pairs.contains(&json!({ "amount": { "$lt": 98 } })));
		assert!(pairs.contains(&json!({
			"object_metadata.x": "testID",
			"object_metadata.k": "test-key",
			"object_metadata.v": "test-value",
		})));
	}

	#[test]
	fn processor_applies_inside_nested_connectives() {
		let conditions = conditions_from_json(json!({
			"$or": [
				{ "field_in_ids": "test_id" },
				{ "field_out_ids": "test_id" },
			],
			"$and": [{
				"$or": [
					{ "metadata": { "test-key": "test-value" } },
					{ "object_metadata": { "test_id": { "test-key": "test-value" } } },
				],
			}],
		}));
		let processor = object_metadata_processor();
		let filter = build_mongo_filter(None, &conditions, Some(&processor));
		let rendered = to_json(&filter);

		assert_eq!(rendered["$or"].as_array().unwrap().len(), 2);
		let inner_or = &rendered["$and"][0]["$or"];
		assert_eq!(
			inner_or[0],
			json!({
				"$and": [{ "metadata.k": "test-key", "metadata.v": "test-value" }],
			})
		);
		assert_eq!(
			inner_or[1],
			json!({
				"$and": [{
					"object_metadata.x": "test_id",
					"object_metadata.k": "test-key",
					"object_metadata.v": "test-value",
				}],
			})
		);
	}

	#[test]
	fn operator_payloads_survive_the_rewrite() {
		let conditions = conditions_from_json(json!({
			"amount": { "$lt": 98 },
		}));
		let filter = build_mongo_filter(None, &conditions, None);
		assert_eq!(to_json(&filter), json!({ "amount": { "$lt": 98 } }));
	}

	#[test]
	fn rewrite_does_not_mutate_input() {
		let conditions = conditions_from_json(json!({
			"metadata": { "k": "v" },
			"id": "x",
		}));
		let snapshot = conditions.clone();
		let _ = build_mongo_filter(Some("y"), &conditions, None);
		assert_eq!(conditions, snapshot);
	}

	#[test]
	fn timestamp_values_convert_to_native_dates() {
		use crate::custom_types::NullTime;
		use chrono::TimeZone;

		let time = chrono::Utc.with_ymd_and_hms(2022, 4, 4, 15, 12, 37).unwrap();
		let converted = condition_value_to_bson(&ConditionValue::Timestamp(NullTime::new(time)));
		assert_eq!(converted, Bson::DateTime(bson::DateTime::from_chrono(time)));
		assert_eq!(
			condition_value_to_bson(&ConditionValue::Timestamp(NullTime::null())),
			Bson::Null
		);
	}

	#[test]
	fn document_conversion_preserves_types() {
		let conditions = conditions_from_json(json!({
			"amount": { "$lt": 98 },
			"name": "x",
			"gone": null,
		}));
		let document = filter_to_document(&build_mongo_filter(None, &conditions, None));
		assert_eq!(
			document.get_document("amount").unwrap().get("$lt"),
			Some(&Bson::Int64(98))
		);
		assert_eq!(document.get_str("name").unwrap(), "x");
		assert_eq!(document.get("gone"), Some(&Bson::Null));
	}
}
