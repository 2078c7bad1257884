//! Database engine identification
//!
//! Every client is bound to exactly one engine. The `None` sentinel marks an
//! unconfigured client; operations against it fail with
//! [`Error::UnsupportedEngine`](crate::error::Error::UnsupportedEngine).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Supported datastore engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
	/// Unconfigured sentinel
	None,
	MySql,
	Postgres,
	Sqlite,
	MongoDb,
}

impl Engine {
	/// Returns true for the three relational engines
	///
	/// # Examples
	///
	/// ```
	/// use polystore::engine::Engine;
	///
	/// assert!(Engine::Sqlite.is_sql());
	/// assert!(!Engine::MongoDb.is_sql());
	/// assert!(!Engine::None.is_sql());
	/// ```
	pub fn is_sql(&self) -> bool {
		matches!(self, Engine::MySql | Engine::Postgres | Engine::Sqlite)
	}

	/// The canonical driver string for this engine
	pub fn as_str(&self) -> &'static str {
		match self {
			Engine::None => "empty",
			Engine::MySql => "mysql",
			Engine::Postgres => "postgresql",
			Engine::Sqlite => "sqlite",
			Engine::MongoDb => "mongodb",
		}
	}
}

impl fmt::Display for Engine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Engine {
	type Err = Error;

	/// Parse a driver string into an engine tag
	///
	/// The driver set is closed; anything else is
	/// [`Error::UnsupportedDriver`].
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"mysql" => Ok(Engine::MySql),
			"postgresql" | "postgres" => Ok(Engine::Postgres),
			"sqlite" => Ok(Engine::Sqlite),
			"mongodb" => Ok(Engine::MongoDb),
			other => Err(Error::UnsupportedDriver(other.to_string())),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("mysql", Engine::MySql)]
	#[case("postgresql", Engine::Postgres)]
	#[case("Postgres", Engine::Postgres)]
	#[case("sqlite", Engine::Sqlite)]
	#[case("MongoDB", Engine::MongoDb)]
	fn parses_known_drivers(#[case] input: &str, #[case] expected: Engine) {
		assert_eq!(input.parse::<Engine>().unwrap(), expected);
	}

	#[test]
	fn rejects_unknown_driver() {
		let err = "oracle".parse::<Engine>().unwrap_err();
		assert!(matches!(err, Error::UnsupportedDriver(d) if d == "oracle"));
	}

	#[test]
	fn sql_engine_detection() {
		assert!(Engine::MySql.is_sql());
		assert!(Engine::Postgres.is_sql());
		assert!(Engine::Sqlite.is_sql());
		assert!(!Engine::MongoDb.is_sql());
		assert!(!Engine::None.is_sql());
	}
}
