//! MongoDB document backend
//!
//! Wraps the official driver's client, exposing the handful of primitives
//! the model operations need: collection access, session transactions and
//! index management.

use std::time::Duration;

use bson::Document;
use mongodb::options::CreateIndexOptions;
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};

use crate::error::Result;

/// MongoDB database backend
#[derive(Clone)]
pub struct MongoBackend {
	client: Client,
	database_name: String,
}

impl MongoBackend {
	/// Connect to a MongoDB deployment
	///
	/// # Example
	///
	/// ```rust,no_run
	/// use polystore::backends::MongoBackend;
	///
	/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
	/// let backend = MongoBackend::connect("mongodb://localhost:27017", "myapp").await?;
	/// # Ok(())
	/// # }
	/// ```
	pub async fn connect(uri: &str, database_name: impl Into<String>) -> Result<Self> {
		let client = Client::with_uri_str(uri).await?;
		Ok(Self {
			client,
			database_name: database_name.into(),
		})
	}

	/// Wrap an existing driver client
	pub fn from_client(client: Client, database_name: impl Into<String>) -> Self {
		Self {
			client,
			database_name: database_name.into(),
		}
	}

	pub fn database_name(&self) -> &str {
		&self.database_name
	}

	pub fn database(&self) -> Database {
		self.client.database(&self.database_name)
	}

	/// A typed handle to a collection of raw documents
	pub fn collection(&self, name: &str) -> Collection<Document> {
		self.database().collection::<Document>(name)
	}

	/// Start a session with an open transaction
	///
	/// Transactions require a replica set or sharded cluster.
	pub async fn start_transaction(&self) -> Result<ClientSession> {
		let mut session = self.client.start_session().await?;
		session.start_transaction().await?;
		Ok(session)
	}

	/// Create an index, bounding the server-side build time
	pub async fn create_index(
		&self,
		collection: &str,
		index: IndexModel,
		max_time: Duration,
	) -> Result<()> {
		let options = CreateIndexOptions::builder().max_time(max_time).build();
		self.collection(collection)
			.create_index(index)
			.with_options(options)
			.await?;
		Ok(())
	}

	/// Whether the named index exists on the collection
	pub async fn index_exists(&self, collection: &str, index_name: &str) -> Result<bool> {
		let names = self.collection(collection).list_index_names().await?;
		Ok(names.iter().any(|name| name == index_name))
	}
}
