//! Concrete backend implementations
//!
//! Three relational backends over sqlx pools plus the MongoDB document
//! backend over the official driver.

pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use self::mongodb::MongoBackend;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
