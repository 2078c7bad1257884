//! Null-aware value types participating in JSON, BSON and SQL marshalling
//!
//! The invalid ("unset") states of these types define the unset set for
//! partial document updates, see [`compute_unset`].

mod null_string;
mod null_time;

pub use null_string::NullString;
pub use null_time::NullTime;

use std::collections::BTreeSet;

use bson::Bson;
use serde::Serialize;

/// Compute the unset set of a model
///
/// Walks the flat (top-level) field set of the model's document form and
/// collects the names whose value is null, i.e. whose null-aware
/// representation is currently invalid. Fields skipped from serialization
/// never appear. Inputs that do not serialize to a document yield the
/// empty set.
///
/// # Examples
///
/// ```
/// use polystore::custom_types::{compute_unset, NullString};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Record {
///     id: String,
///     note: NullString,
/// }
///
/// let unset = compute_unset(&Record {
///     id: "a".into(),
///     note: NullString::null(),
/// });
/// assert!(unset.contains("note"));
/// assert!(!unset.contains("id"));
/// ```
pub fn compute_unset<T: Serialize>(model: &T) -> BTreeSet<String> {
	match bson::to_document(model) {
		Ok(doc) => doc
			.iter()
			.filter(|(_, value)| matches!(value, Bson::Null))
			.map(|(name, _)| name.clone())
			.collect(),
		Err(_) => BTreeSet::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Serialize)]
	struct Record {
		id: String,
		note: NullString,
		seen_at: NullTime,
		#[serde(skip_serializing)]
		#[allow(dead_code)]
		secret: NullString,
	}

	#[test]
	fn collects_invalid_nullable_fields() {
		let unset = compute_unset(&Record {
			id: "a".into(),
			note: NullString::null(),
			seen_at: NullTime::null(),
			secret: NullString::null(),
		});
		assert_eq!(
			unset.into_iter().collect::<Vec<_>>(),
			vec!["note".to_string(), "seen_at".to_string()]
		);
	}

	#[test]
	fn valid_fields_are_not_unset() {
		let unset = compute_unset(&Record {
			id: "a".into(),
			note: NullString::from("kept"),
			seen_at: NullTime::null(),
			secret: NullString::null(),
		});
		assert_eq!(unset.into_iter().collect::<Vec<_>>(), vec!["seen_at"]);
	}

	#[test]
	fn non_document_input_yields_empty_set() {
		assert!(compute_unset(&42_u8).is_empty());
		assert!(compute_unset(&"plain").is_empty());
	}
}
