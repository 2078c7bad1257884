//! Unified error type for all datastore operations
//!
//! Errors surface to the caller verbatim after one translation step from the
//! underlying driver. The layer never retries.

use thiserror::Error;

/// Result type for datastore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for datastore operations
#[derive(Debug, Error)]
pub enum Error {
	/// A single-row fetch missed, or a paginated fetch returned zero rows
	#[error("no results found")]
	NoResults,

	/// Operation invoked against an unconfigured or unrecognised engine
	#[error("unsupported datastore engine")]
	UnsupportedEngine,

	/// A SQL-only path was requested on a non-SQL engine (or vice versa)
	#[error("unknown sql engine")]
	UnknownSql,

	/// Construction found no non-replica configuration
	#[error("no source database configuration found")]
	NoSource,

	/// Construction was given a driver string outside the closed set
	#[error("unsupported database driver: {0}")]
	UnsupportedDriver(String),

	/// A model type identifier was migrated twice
	#[error("model {0} was already migrated")]
	AlreadyMigrated(String),

	/// A raw transaction was requested under the document engine
	#[error("not implemented")]
	NotImplemented,

	/// Timestamp ingest with a year outside 1..=9999
	#[error("time year out of reasonable bounds: {0}")]
	YearOutOfBounds(i32),

	/// The request-scoped deadline was reached during a driver call
	#[error("query timed out")]
	Timeout,

	/// A result row was missing a requested column
	#[error("column {0} not found in result row")]
	ColumnNotFound(String),

	/// A result value could not be converted to the requested type
	#[error("type conversion failed: {0}")]
	TypeConversion(String),

	/// Internal condition translation failure (malformed predicate shape)
	#[error("condition translation failed: {0}")]
	Translation(String),

	/// Serialization or deserialization of a model failed
	#[error("serialization error: {0}")]
	Serialization(String),

	/// Any other backend-surfaced error, carrying the original message
	#[error("database driver error: {0}")]
	Driver(String),
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		match err {
			sqlx::Error::RowNotFound => Error::NoResults,
			sqlx::Error::PoolTimedOut => Error::Timeout,
			sqlx::Error::ColumnNotFound(name) => Error::ColumnNotFound(name),
			other => Error::Driver(other.to_string()),
		}
	}
}

impl From<mongodb::error::Error> for Error {
	fn from(err: mongodb::error::Error) -> Self {
		Error::Driver(err.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<bson::ser::Error> for Error {
	fn from(err: bson::ser::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<bson::de::Error> for Error {
	fn from(err: bson::de::Error) -> Self {
		Error::Serialization(err.to_string())
	}
}

impl From<tokio::time::error::Elapsed> for Error {
	fn from(_: tokio::time::error::Elapsed) -> Self {
		Error::Timeout
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sqlx_row_not_found_maps_to_no_results() {
		let err: Error = sqlx::Error::RowNotFound.into();
		assert!(matches!(err, Error::NoResults));
	}

	#[test]
	fn display_messages_are_stable() {
		assert_eq!(Error::NoResults.to_string(), "no results found");
		assert_eq!(
			Error::AlreadyMigrated("User".into()).to_string(),
			"model User was already migrated"
		);
		assert_eq!(
			Error::YearOutOfBounds(10_000).to_string(),
			"time year out of reasonable bounds: 10000"
		);
	}
}
