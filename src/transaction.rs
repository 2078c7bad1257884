//! The transaction façade
//!
//! One lifecycle over either a relational transaction executor or a
//! document session: `begin → …ops… → commit | rollback`. Terminal states
//! absorb further lifecycle calls; a transaction commits at most once.

use std::future::Future;

use async_trait::async_trait;
use mongodb::ClientSession;

use crate::backend::TransactionExecutor;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::types::{QueryResult, QueryValue, Row};

/// A datastore transaction
///
/// Holds either a relational executor, a document session, or nothing at
/// all (the no-op transaction of an engine without a handle).
pub struct Transaction {
	sql: Option<Box<dyn TransactionExecutor>>,
	mongo: Option<ClientSession>,
	committed: bool,
	rolled_back: bool,
	rows_affected: i64,
}

impl Transaction {
	/// The no-op transaction
	pub fn empty() -> Self {
		Self {
			sql: None,
			mongo: None,
			committed: false,
			rolled_back: false,
			rows_affected: 0,
		}
	}

	pub(crate) fn from_sql(executor: Box<dyn TransactionExecutor>) -> Self {
		Self {
			sql: Some(executor),
			..Self::empty()
		}
	}

	pub(crate) fn from_mongo(session: ClientSession) -> Self {
		Self {
			mongo: Some(session),
			..Self::empty()
		}
	}

	/// Whether a commit would be attempted
	pub fn can_commit(&self) -> bool {
		!self.committed
			&& !self.rolled_back
			&& (self.sql.is_some() || self.mongo.is_some())
	}

	/// Rows affected by statements run through this transaction
	///
	/// After a document commit this is reported as 1; document stores do
	/// not expose an affected count at commit time.
	pub fn rows_affected(&self) -> i64 {
		self.rows_affected
	}

	/// Commit the transaction
	///
	/// Committing an already-terminal or empty transaction is a no-op
	/// returning success. A driver commit failure triggers a rollback of
	/// the driver handle and returns the original error; the caller may
	/// retry.
	pub async fn commit(&mut self) -> Result<()> {
		if self.committed || self.rolled_back {
			return Ok(());
		}
		if self.sql.is_none() && self.mongo.is_none() {
			return Ok(());
		}

		if let Some(executor) = self.sql.as_mut() {
			if let Err(err) = executor.commit().await {
				let _ = executor.rollback().await;
				return Err(err);
			}
			self.committed = true;
		}

		if let Some(session) = self.mongo.as_mut() {
			session.commit_transaction().await?;
			self.committed = true;
			self.rows_affected = 1;
		}

		Ok(())
	}

	/// Roll back the transaction
	///
	/// A rollback after a successful commit releases nothing and returns
	/// success; repeated rollbacks are no-ops.
	pub async fn rollback(&mut self) -> Result<()> {
		if self.committed || self.rolled_back {
			return Ok(());
		}

		if let Some(executor) = self.sql.as_mut() {
			executor.rollback().await?;
			self.rolled_back = true;
		}

		if let Some(session) = self.mongo.as_mut() {
			session.abort_transaction().await?;
			self.rolled_back = true;
		}

		Ok(())
	}

	/// Execute a statement inside the transaction
	pub async fn execute(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<QueryResult> {
		let executor = self.sql_executor()?;
		let result = executor.execute(sql, params).await?;
		self.rows_affected += result.rows_affected as i64;
		Ok(result)
	}

	/// Fetch zero or one row inside the transaction
	pub async fn fetch_optional(
		&mut self,
		sql: &str,
		params: Vec<QueryValue>,
	) -> Result<Option<Row>> {
		self.sql_executor()?.fetch_optional(sql, params).await
	}

	/// Fetch all rows inside the transaction
	pub async fn fetch_all(&mut self, sql: &str, params: Vec<QueryValue>) -> Result<Vec<Row>> {
		self.sql_executor()?.fetch_all(sql, params).await
	}

	pub(crate) fn has_sql(&self) -> bool {
		self.sql.is_some()
	}

	pub(crate) fn mongo_session(&mut self) -> Option<&mut ClientSession> {
		self.mongo.as_mut()
	}

	fn sql_executor(&mut self) -> Result<&mut Box<dyn TransactionExecutor>> {
		self.sql
			.as_mut()
			.ok_or_else(|| Error::Driver("no open relational transaction".to_string()))
	}
}

/// Transaction entry points
#[async_trait]
pub trait Transactor {
	/// Begin a raw transaction; the caller drives the lifecycle
	///
	/// Under a transactional document deployment this form is not
	/// available (the driver requires a session scope) and fails with
	/// [`Error::NotImplemented`].
	async fn begin_tx(&self) -> Result<Transaction>;

	/// Run `f` with a fresh transaction and return its result verbatim
	///
	/// This does **not** auto-commit or auto-rollback: the closure owns
	/// the lifecycle. The explicit contract lets callers stage work in
	/// the transaction and commit from a later operation.
	async fn run_tx<F, Fut, T>(&self, f: F) -> Result<T>
	where
		F: FnOnce(Transaction) -> Fut + Send,
		Fut: Future<Output = Result<T>> + Send,
		T: Send;
}

#[async_trait]
impl Transactor for Client {
	async fn begin_tx(&self) -> Result<Transaction> {
		if let Some(write) = &self.options.write {
			let executor = write.begin().await?;
			return Ok(Transaction::from_sql(executor));
		}

		if self.options.mongo.is_some() {
			if self.options.mongo_transactions {
				return Err(Error::NotImplemented);
			}
			return Ok(Transaction::empty());
		}

		Ok(Transaction::empty())
	}

	async fn run_tx<F, Fut, T>(&self, f: F) -> Result<T>
	where
		F: FnOnce(Transaction) -> Fut + Send,
		Fut: Future<Output = Result<T>> + Send,
		T: Send,
	{
		if let Some(write) = &self.options.write {
			let executor = write.begin().await?;
			return f(Transaction::from_sql(executor)).await;
		}

		if let Some(mongo) = &self.options.mongo {
			if self.options.mongo_transactions {
				let session = mongo.start_transaction().await?;
				return f(Transaction::from_mongo(session)).await;
			}
		}

		f(Transaction::empty()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	/// Scriptable executor recording lifecycle calls
	struct MockExecutor {
		commits: Arc<AtomicUsize>,
		rollbacks: Arc<AtomicUsize>,
		fail_commits: usize,
	}

	impl MockExecutor {
		fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
			let commits = Arc::new(AtomicUsize::new(0));
			let rollbacks = Arc::new(AtomicUsize::new(0));
			(
				Self {
					commits: commits.clone(),
					rollbacks: rollbacks.clone(),
					fail_commits: 0,
				},
				commits,
				rollbacks,
			)
		}
	}

	#[async_trait]
	impl TransactionExecutor for MockExecutor {
		async fn execute(
			&mut self,
			_sql: &str,
			_params: Vec<QueryValue>,
		) -> Result<QueryResult> {
			Ok(QueryResult { rows_affected: 1 })
		}

		async fn fetch_one(&mut self, _sql: &str, _params: Vec<QueryValue>) -> Result<Row> {
			Ok(Row::new())
		}

		async fn fetch_all(
			&mut self,
			_sql: &str,
			_params: Vec<QueryValue>,
		) -> Result<Vec<Row>> {
			Ok(Vec::new())
		}

		async fn fetch_optional(
			&mut self,
			_sql: &str,
			_params: Vec<QueryValue>,
		) -> Result<Option<Row>> {
			Ok(None)
		}

		async fn commit(&mut self) -> Result<()> {
			if self.fail_commits > 0 {
				self.fail_commits -= 1;
				return Err(Error::Driver("commit refused".to_string()));
			}
			self.commits.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		async fn rollback(&mut self) -> Result<()> {
			self.rollbacks.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	#[tokio::test]
	async fn commits_at_most_once() {
		let (executor, commits, _) = MockExecutor::new();
		let mut tx = Transaction::from_sql(Box::new(executor));

		assert!(tx.can_commit());
		tx.commit().await.unwrap();
		assert!(!tx.can_commit());

		// Further commits are no-ops
		tx.commit().await.unwrap();
		tx.commit().await.unwrap();
		assert_eq!(commits.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn rollback_after_commit_releases_nothing() {
		let (executor, _, rollbacks) = MockExecutor::new();
		let mut tx = Transaction::from_sql(Box::new(executor));

		tx.commit().await.unwrap();
		tx.rollback().await.unwrap();
		assert_eq!(rollbacks.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn rollback_is_idempotent() {
		let (executor, _, rollbacks) = MockExecutor::new();
		let mut tx = Transaction::from_sql(Box::new(executor));

		tx.rollback().await.unwrap();
		tx.rollback().await.unwrap();
		assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
		assert!(!tx.can_commit());
	}

	#[tokio::test]
	async fn failed_commit_rolls_back_and_allows_retry() {
		let (mut executor, commits, rollbacks) = MockExecutor::new();
		executor.fail_commits = 1;
		let mut tx = Transaction::from_sql(Box::new(executor));

		let err = tx.commit().await.unwrap_err();
		assert!(matches!(err, Error::Driver(_)));
		assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
		assert!(tx.can_commit());

		// Retry succeeds
		tx.commit().await.unwrap();
		assert_eq!(commits.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn empty_transaction_lifecycle_is_noop() {
		let mut tx = Transaction::empty();
		assert!(!tx.can_commit());
		tx.commit().await.unwrap();
		tx.rollback().await.unwrap();
		assert_eq!(tx.rows_affected(), 0);
	}

	#[tokio::test]
	async fn execute_tracks_rows_affected() {
		let (executor, _, _) = MockExecutor::new();
		let mut tx = Transaction::from_sql(Box::new(executor));

		tx.execute("UPDATE x", vec![]).await.unwrap();
		tx.execute("UPDATE y", vec![]).await.unwrap();
		assert_eq!(tx.rows_affected(), 2);
	}
}
