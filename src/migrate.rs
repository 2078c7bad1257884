//! Schema migration entry point
//!
//! Relational engines get a `CREATE TABLE IF NOT EXISTS` per model from
//! its column descriptors; the document engine walks the client's index
//! plan. A model type identifier migrates at most once per client.

use async_trait::async_trait;
use tracing::debug;

use crate::client::{Client, DEFAULT_CREATE_INDEX_TIMEOUT};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::ModelDef;

/// Migration operations
#[async_trait]
pub trait Migrator {
	/// Create the schema for the given models
	///
	/// Skips silently when auto-migration is disabled. A model type that
	/// was already migrated fails with [`Error::AlreadyMigrated`].
	async fn migrate(&self, models: &[ModelDef]) -> Result<()>;

	/// Whether the model type identifier has been migrated
	fn has_migrated_model(&self, model_type: &str) -> bool;
}

#[async_trait]
impl Migrator for Client {
	async fn migrate(&self, models: &[ModelDef]) -> Result<()> {
		if !self.is_auto_migrate() {
			debug!("auto migrate is disabled, skipping...");
			return Ok(());
		}
		if self.engine() == Engine::None {
			return Err(Error::UnsupportedEngine);
		}

		{
			let mut migrated = self
				.options
				.migrated_models
				.lock()
				.map_err(|e| Error::Driver(e.to_string()))?;
			for model in models {
				if migrated.iter().any(|m| m == model.model_name) {
					return Err(Error::AlreadyMigrated(model.model_name.to_string()));
				}
				migrated.push(model.model_name.to_string());
			}
		}

		debug!(
			engine = %self.engine(),
			model_count = models.len(),
			"database migration starting..."
		);

		if self.engine() == Engine::MongoDb {
			return self.migrate_mongo().await;
		}
		self.migrate_sql(models).await
	}

	fn has_migrated_model(&self, model_type: &str) -> bool {
		self.options
			.migrated_models
			.lock()
			.map(|migrated| migrated.iter().any(|m| m == model_type))
			.unwrap_or(false)
	}
}

impl Client {
	async fn migrate_sql(&self, models: &[ModelDef]) -> Result<()> {
		let backend = self.write_backend()?;
		for model in models {
			let columns = model
				.columns
				.iter()
				.map(|column| format!("{} {}", column.name, column.sql_type))
				.collect::<Vec<_>>()
				.join(", ");
			let mut sql = format!(
				"CREATE TABLE IF NOT EXISTS {} ({})",
				self.get_table_name(model.table_name),
				columns
			);
			if self.engine() == Engine::MySql {
				sql.push_str(" ENGINE=InnoDB");
			}
			backend.execute(&sql, vec![]).await?;
		}
		Ok(())
	}

	async fn migrate_mongo(&self) -> Result<()> {
		let mongo = self.mongo()?;
		let Some(indexer) = &self.options.mongo_indexer else {
			return Ok(());
		};

		for (collection_name, indexes) in indexer() {
			let collection = self.get_table_name(&collection_name);
			for index in indexes {
				mongo
					.create_index(&collection, index, DEFAULT_CREATE_INDEX_TIMEOUT)
					.await?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::tests::test_client_with;
	use crate::model::ColumnDef;

	fn widget_def() -> ModelDef {
		ModelDef {
			model_name: "Widget",
			table_name: "widgets",
			columns: {
				const COLUMNS: &[ColumnDef] = &[
					ColumnDef::new("id", "TEXT PRIMARY KEY"),
					ColumnDef::new("number", "BIGINT"),
				];
				COLUMNS
			},
		}
	}

	#[tokio::test]
	async fn second_migration_of_a_type_fails() {
		let client = test_client_with(|b| b.auto_migrate(true));
		client.migrate(&[widget_def()]).await.unwrap();
		assert!(client.has_migrated_model("Widget"));

		let err = client.migrate(&[widget_def()]).await.unwrap_err();
		assert!(matches!(err, Error::AlreadyMigrated(name) if name == "Widget"));
	}

	#[tokio::test]
	async fn disabled_auto_migrate_skips_silently() {
		let client = test_client_with(|b| b.auto_migrate(false));
		client.migrate(&[widget_def()]).await.unwrap();
		assert!(!client.has_migrated_model("Widget"));
	}
}
