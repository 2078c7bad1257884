//! Nullable timestamp value type
//!
//! JSON form is RFC 3339 (or `null` when invalid); ingest enforces a year
//! within 1..=9999. BSON form is a native date, so the document engine can
//! compare and `$dateToString` over stored values. Predicate formatting is
//! engine-specific and lives in
//! [`format_for_engine`](NullTime::format_for_engine).

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::Engine;
use crate::error::{Error, Result};

/// A timestamp that distinguishes "unset" from any concrete instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullTime(pub Option<DateTime<Utc>>);

impl NullTime {
	/// A valid value
	pub fn new(time: DateTime<Utc>) -> Self {
		NullTime(Some(time))
	}

	/// The invalid ("unset") value
	pub fn null() -> Self {
		NullTime(None)
	}

	/// Whether the value is present
	pub fn valid(&self) -> bool {
		self.0.is_some()
	}

	/// Parse an RFC 3339 string, enforcing the year bounds
	///
	/// Empty input yields the invalid value. A year outside 1..=9999 is
	/// rejected with [`Error::YearOutOfBounds`].
	///
	/// # Examples
	///
	/// ```
	/// use polystore::custom_types::NullTime;
	///
	/// let t = NullTime::from_rfc3339("2022-04-04T15:12:37Z").unwrap();
	/// assert!(t.valid());
	///
	/// assert!(NullTime::from_rfc3339("0000-01-01T00:00:00Z").is_err());
	/// ```
	pub fn from_rfc3339(input: &str) -> Result<Self> {
		if input.is_empty() {
			return Ok(NullTime(None));
		}

		let parsed = DateTime::parse_from_rfc3339(input)
			.map_err(|e| Error::Serialization(format!("invalid RFC 3339 timestamp: {}", e)))?;
		let year = parsed.year();
		if !(1..=9999).contains(&year) {
			return Err(Error::YearOutOfBounds(year));
		}

		Ok(NullTime(Some(parsed.with_timezone(&Utc))))
	}

	/// Engine-specific stringification for predicate binds
	///
	/// Returns `None` for the invalid value, which binds as SQL `NULL`.
	pub fn format_for_engine(&self, engine: Engine) -> Option<String> {
		let time = self.0?;
		let formatted = match engine {
			Engine::MySql => time.format("%Y-%m-%d %H:%M:%S").to_string(),
			Engine::Postgres => time.to_rfc3339_opts(SecondsFormat::Secs, true),
			// SQLite and the fallback path share a millisecond UTC form
			_ => time.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
		};
		Some(formatted)
	}
}

impl From<DateTime<Utc>> for NullTime {
	fn from(time: DateTime<Utc>) -> Self {
		NullTime(Some(time))
	}
}

impl From<Option<DateTime<Utc>>> for NullTime {
	fn from(opt: Option<DateTime<Utc>>) -> Self {
		NullTime(opt)
	}
}

// Serde:
// - Human-readable formats (e.g. JSON) use an RFC 3339 string.
// - Non-human-readable formats (BSON persistence) use a native date.
impl Serialize for NullTime {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		match &self.0 {
			Some(time) => {
				if serializer.is_human_readable() {
					return serializer
						.serialize_str(&time.to_rfc3339_opts(SecondsFormat::AutoSi, true));
				}
				bson::DateTime::from_chrono(*time).serialize(serializer)
			}
			None => serializer.serialize_none(),
		}
	}
}

impl<'de> Deserialize<'de> for NullTime {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		if deserializer.is_human_readable() {
			let raw = Option::<String>::deserialize(deserializer)?;
			return match raw {
				None => Ok(NullTime(None)),
				Some(s) => NullTime::from_rfc3339(&s).map_err(D::Error::custom),
			};
		}

		let raw = Option::<bson::DateTime>::deserialize(deserializer)?;
		Ok(NullTime(raw.map(bson::DateTime::to_chrono)))
	}
}
