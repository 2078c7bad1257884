//! The datastore client
//!
//! A client holds one write handle, zero-or-more read handles and the
//! field capabilities that drive the condition compilers. It is built
//! once and is safe to share across tasks; open transactions are not.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mongodb::IndexModel;
use rand::Rng;

use crate::backend::DatabaseBackend;
use crate::backends::MongoBackend;
use crate::conditions::mongo::ConditionProcessor;
use crate::conditions::sql::FieldCapabilities;
use crate::engine::Engine;
use crate::error::{Error, Result};

/// Default timeout for creating indexes
pub const DEFAULT_CREATE_INDEX_TIMEOUT: Duration = Duration::from_secs(20);
/// Default max timeout on a query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
/// Default transaction timeout
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(10);

/// An index-plan hook: collection name to the indexes it should carry
pub type MongoIndexer = Arc<dyn Fn() -> HashMap<String, Vec<IndexModel>> + Send + Sync>;

/// How reads are routed across replicas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
	#[default]
	Random,
	RoundRobin,
}

pub(crate) struct ClientOptions {
	pub(crate) engine: Engine,
	pub(crate) write: Option<Arc<dyn DatabaseBackend>>,
	pub(crate) replicas: Vec<Arc<dyn DatabaseBackend>>,
	pub(crate) read_policy: ReadPolicy,
	pub(crate) round_robin: AtomicUsize,
	pub(crate) mongo: Option<MongoBackend>,
	pub(crate) mongo_transactions: bool,
	pub(crate) mongo_condition_processor: Option<ConditionProcessor>,
	pub(crate) mongo_indexer: Option<MongoIndexer>,
	pub(crate) table_prefix: String,
	pub(crate) database_name: String,
	pub(crate) fields: FieldCapabilities,
	pub(crate) auto_migrate: bool,
	pub(crate) migrated_models: Mutex<Vec<String>>,
	pub(crate) debug: bool,
}

/// The unified datastore client
pub struct Client {
	pub(crate) options: ClientOptions,
}

impl std::fmt::Debug for Client {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Client").finish_non_exhaustive()
	}
}

impl Client {
	/// Start building a client
	pub fn builder() -> ClientBuilder {
		ClientBuilder::default()
	}

	/// The engine this client is bound to
	pub fn engine(&self) -> Engine {
		self.options.engine
	}

	/// Whether debug logging is enabled
	pub fn is_debug(&self) -> bool {
		self.options.debug
	}

	/// Toggle debug logging
	pub fn set_debug(&mut self, on: bool) {
		self.options.debug = on;
	}

	/// Whether auto-migration is enabled
	pub fn is_auto_migrate(&self) -> bool {
		self.options.auto_migrate
	}

	/// The database name handed to the client at construction
	pub fn database_name(&self) -> &str {
		if !self.options.database_name.is_empty() {
			return &self.options.database_name;
		}
		self.options
			.mongo
			.as_ref()
			.map(|m| m.database_name())
			.unwrap_or("")
	}

	/// Apply the table-name prefix policy
	///
	/// # Examples
	///
	/// ```
	/// # use polystore::client::Client;
	/// # fn example(client: &Client) {
	/// // with prefix "x": "widgets" becomes "x_widgets"
	/// let _ = client.get_table_name("widgets");
	/// # }
	/// ```
	pub fn get_table_name(&self, model_name: &str) -> String {
		if self.options.table_prefix.is_empty() {
			model_name.to_string()
		} else {
			format!("{}_{}", self.options.table_prefix, model_name)
		}
	}

	/// The client's registered array fields
	pub fn array_fields(&self) -> Vec<String> {
		self.options
			.fields
			.array_fields()
			.map(str::to_string)
			.collect()
	}

	/// The client's registered object fields (always includes `metadata`)
	pub fn object_fields(&self) -> Vec<String> {
		self.options
			.fields
			.object_fields()
			.map(str::to_string)
			.collect()
	}

	pub(crate) fn capabilities(&self) -> &FieldCapabilities {
		&self.options.fields
	}

	pub(crate) fn mongo(&self) -> Result<&MongoBackend> {
		self.options.mongo.as_ref().ok_or(Error::UnsupportedEngine)
	}

	/// The write handle, for statements that must not hit a replica
	pub(crate) fn write_backend(&self) -> Result<Arc<dyn DatabaseBackend>> {
		if !self.engine().is_sql() {
			return Err(Error::UnsupportedEngine);
		}
		self.options
			.write
			.clone()
			.ok_or(Error::UnsupportedEngine)
	}

	/// A read handle chosen by the configured policy
	///
	/// `force_writer` routes to the write handle on MySQL and PostgreSQL;
	/// the other engines have no replica topology to bypass.
	pub(crate) fn read_backend(&self, force_writer: bool) -> Result<Arc<dyn DatabaseBackend>> {
		if !self.engine().is_sql() {
			return Err(Error::UnsupportedEngine);
		}
		if force_writer && matches!(self.engine(), Engine::MySql | Engine::Postgres) {
			return self.write_backend();
		}
		if self.options.replicas.is_empty() {
			return self.write_backend();
		}

		let index = match self.options.read_policy {
			ReadPolicy::Random => rand::thread_rng().gen_range(0..self.options.replicas.len()),
			ReadPolicy::RoundRobin => {
				self.options.round_robin.fetch_add(1, Ordering::Relaxed)
					% self.options.replicas.len()
			}
		};
		Ok(self.options.replicas[index].clone())
	}

	pub(crate) fn mongo_condition_processor(&self) -> Option<&ConditionProcessor> {
		self.options.mongo_condition_processor.as_ref()
	}
}

/// Builder for [`Client`]
///
/// The construction surface expects ready driver handles; connection
/// string parsing and pool sizing belong to the configuration loader.
#[derive(Default)]
pub struct ClientBuilder {
	engine: Option<Engine>,
	write: Option<Arc<dyn DatabaseBackend>>,
	replicas: Vec<Arc<dyn DatabaseBackend>>,
	read_policy: ReadPolicy,
	mongo: Option<MongoBackend>,
	mongo_transactions: bool,
	mongo_condition_processor: Option<ConditionProcessor>,
	mongo_indexer: Option<MongoIndexer>,
	table_prefix: String,
	database_name: String,
	array_fields: Vec<String>,
	object_fields: Vec<String>,
	auto_migrate: bool,
	debug: bool,
}

impl ClientBuilder {
	/// The write handle; its engine tag becomes the client's engine
	pub fn write(mut self, backend: Arc<dyn DatabaseBackend>) -> Self {
		self.engine = Some(backend.engine());
		self.write = Some(backend);
		self
	}

	/// Add a read replica handle
	pub fn replica(mut self, backend: Arc<dyn DatabaseBackend>) -> Self {
		self.replicas.push(backend);
		self
	}

	/// How reads are routed across replicas
	pub fn read_policy(mut self, policy: ReadPolicy) -> Self {
		self.read_policy = policy;
		self
	}

	/// The document backend; switches the client to the document engine
	pub fn mongo(mut self, backend: MongoBackend) -> Self {
		self.engine = Some(Engine::MongoDb);
		self.mongo = Some(backend);
		self
	}

	/// Whether the document deployment supports transactions
	pub fn mongo_transactions(mut self, enabled: bool) -> Self {
		self.mongo_transactions = enabled;
		self
	}

	/// A hook that rewrites custom object-field predicate entries
	pub fn mongo_condition_processor(mut self, processor: ConditionProcessor) -> Self {
		self.mongo_condition_processor = Some(processor);
		self
	}

	/// The index plan walked by `migrate` on the document engine
	pub fn mongo_indexer(mut self, indexer: MongoIndexer) -> Self {
		self.mongo_indexer = Some(indexer);
		self
	}

	/// Prefix every table name with `<prefix>_`
	pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.table_prefix = prefix.into();
		self
	}

	/// The schema/database name, used by the MySQL index probe
	pub fn database_name(mut self, name: impl Into<String>) -> Self {
		self.database_name = name.into();
		self
	}

	/// Register JSON-array containment fields
	pub fn array_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.array_fields = fields.into_iter().map(Into::into).collect();
		self
	}

	/// Register JSON-object probe fields (metadata is always included)
	pub fn object_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.object_fields = fields.into_iter().map(Into::into).collect();
		self
	}

	/// Enable the `migrate` entry point
	pub fn auto_migrate(mut self, enabled: bool) -> Self {
		self.auto_migrate = enabled;
		self
	}

	/// Enable debug logging
	pub fn debug(mut self, enabled: bool) -> Self {
		self.debug = enabled;
		self
	}

	/// Build the client
	///
	/// Fails with [`Error::NoSource`] when neither a write handle nor a
	/// document backend was supplied.
	pub fn build(self) -> Result<Client> {
		if self.write.is_none() && self.mongo.is_none() {
			return Err(Error::NoSource);
		}

		let engine = self.engine.unwrap_or(Engine::None);
		Ok(Client {
			options: ClientOptions {
				engine,
				write: self.write,
				replicas: self.replicas,
				read_policy: self.read_policy,
				round_robin: AtomicUsize::new(0),
				mongo: self.mongo,
				mongo_transactions: self.mongo_transactions,
				mongo_condition_processor: self.mongo_condition_processor,
				mongo_indexer: self.mongo_indexer,
				table_prefix: self.table_prefix,
				database_name: self.database_name,
				fields: FieldCapabilities::new(self.array_fields, self.object_fields),
				auto_migrate: self.auto_migrate,
				migrated_models: Mutex::new(Vec::new()),
				debug: self.debug,
			},
		})
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	#[test]
	fn build_without_source_fails() {
		let err = Client::builder().build().unwrap_err();
		assert!(matches!(err, Error::NoSource));
	}

	#[test]
	fn table_prefix_policy() {
		let client = test_client(Engine::Sqlite);
		assert_eq!(client.get_table_name("widgets"), "x_widgets");

		let unprefixed = test_client_with(|b| b.table_prefix(""));
		assert_eq!(unprefixed.get_table_name("widgets"), "widgets");
	}

	#[test]
	fn metadata_is_always_an_object_field() {
		let client = test_client(Engine::Sqlite);
		assert!(client
			.object_fields()
			.contains(&"metadata".to_string()));
	}

	pub(crate) fn test_client(engine: Engine) -> Client {
		test_client_with(|b| b.table_prefix("x").write(mock_backend(engine)))
	}

	pub(crate) fn test_client_with(
		configure: impl FnOnce(ClientBuilder) -> ClientBuilder,
	) -> Client {
		let builder = Client::builder().write(mock_backend(Engine::Sqlite));
		configure(builder).build().unwrap()
	}

	pub(crate) fn mock_backend(engine: Engine) -> Arc<dyn DatabaseBackend> {
		Arc::new(crate::query::tests::MockBackend { engine })
	}
}
