//! Nullable string value type
//!
//! Serialises to JSON/BSON `null` when invalid, to the string literal
//! otherwise. `null` or absent input deserialises to the invalid state.

use bson::Bson;
use serde::{Deserialize, Serialize};

use crate::conditions::ConditionValue;
use crate::types::QueryValue;

/// A string that distinguishes "unset" from the empty string
///
/// # Examples
///
/// ```
/// use polystore::custom_types::NullString;
///
/// let set = NullString::from("hello");
/// assert!(set.valid());
/// assert_eq!(serde_json::to_string(&set).unwrap(), "\"hello\"");
///
/// let unset = NullString::default();
/// assert!(!unset.valid());
/// assert_eq!(serde_json::to_string(&unset).unwrap(), "null");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NullString(pub Option<String>);

impl NullString {
	/// A valid value
	pub fn new(value: impl Into<String>) -> Self {
		NullString(Some(value.into()))
	}

	/// The invalid ("unset") value
	pub fn null() -> Self {
		NullString(None)
	}

	/// Whether the value is present
	pub fn valid(&self) -> bool {
		self.0.is_some()
	}

	/// Borrow the payload when valid
	pub fn as_deref(&self) -> Option<&str> {
		self.0.as_deref()
	}
}

impl From<&str> for NullString {
	fn from(s: &str) -> Self {
		NullString(Some(s.to_string()))
	}
}

impl From<String> for NullString {
	fn from(s: String) -> Self {
		NullString(Some(s))
	}
}

impl From<Option<String>> for NullString {
	fn from(opt: Option<String>) -> Self {
		NullString(opt)
	}
}

impl From<&NullString> for QueryValue {
	fn from(ns: &NullString) -> Self {
		match &ns.0 {
			Some(s) => QueryValue::String(s.clone()),
			None => QueryValue::Null,
		}
	}
}

impl From<NullString> for ConditionValue {
	fn from(ns: NullString) -> Self {
		match ns.0 {
			Some(s) => ConditionValue::String(s),
			None => ConditionValue::Null,
		}
	}
}

impl From<&NullString> for Bson {
	fn from(ns: &NullString) -> Self {
		match &ns.0 {
			Some(s) => Bson::String(s.clone()),
			None => Bson::Null,
		}
	}
}
