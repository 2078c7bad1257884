//! Statement planning: pagination, ordering, projection and bind rebinding
//!
//! The condition compiler emits fragments with named `@var<N>` binds; the
//! builders here assemble full statements and rewrite the named binds into
//! the backend's positional placeholders in first-appearance order.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::backend::DatabaseBackend;
use crate::conditions::sql::CompiledConditions;
use crate::engine::Engine;
use crate::types::QueryValue;

/// Ascending sort direction
pub const SORT_ASC: &str = "asc";
/// Descending sort direction
pub const SORT_DESC: &str = "desc";
/// The default number of results per page
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Pagination and ordering bundle for list queries
///
/// A zero `page` disables pagination. A positive `page` with a zero
/// `page_size` falls back to [`DEFAULT_PAGE_SIZE`]. The sort direction is
/// case-insensitive; anything other than `desc` sorts ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
	#[serde(default)]
	pub page: u64,
	#[serde(default)]
	pub page_size: u64,
	#[serde(default)]
	pub order_by_field: String,
	#[serde(default)]
	pub sort_direction: String,
}

impl QueryParams {
	pub(crate) fn normalized(&self) -> QueryParams {
		let mut params = self.clone();
		if params.page > 0 && params.page_size < 1 {
			params.page_size = DEFAULT_PAGE_SIZE;
		}
		params.sort_direction = params.sort_direction.to_lowercase();
		params
	}

	pub(crate) fn descending(&self) -> bool {
		self.sort_direction.eq_ignore_ascii_case(SORT_DESC)
	}
}

static BIND_PATTERN: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*)").expect("bind pattern is valid"));

/// Rewrite named `@var` binds into positional placeholders
///
/// Every named variable found in the statement is replaced by the
/// backend's placeholder for its 1-based appearance index, and its value
/// is appended to the parameter list in the same order. Names missing
/// from the bind map are left untouched.
pub fn rebind_named(
	sql: &str,
	binds: &HashMap<String, QueryValue>,
	backend: &dyn DatabaseBackend,
) -> (String, Vec<QueryValue>) {
	let mut params = Vec::new();
	let mut index = 0;
	let rewritten = BIND_PATTERN.replace_all(sql, |caps: &Captures| {
		let name = &caps[1];
		match binds.get(name) {
			Some(value) => {
				index += 1;
				params.push(value.clone());
				backend.placeholder(index)
			}
			None => caps[0].to_string(),
		}
	});
	(rewritten.into_owned(), params)
}

/// A pending SELECT statement
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
	table: String,
	columns: Vec<String>,
	clauses: Vec<String>,
	binds: HashMap<String, QueryValue>,
	group_by: Option<String>,
	order_by: Option<(String, bool)>,
	limit: Option<u64>,
	offset: Option<u64>,
	row_lock: bool,
}

impl SelectQuery {
	pub fn new(table: impl Into<String>) -> Self {
		Self {
			table: table.into(),
			..Default::default()
		}
	}

	/// Project specific columns or expressions; empty means `*`
	pub fn columns<I, S>(mut self, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.columns = columns.into_iter().map(Into::into).collect();
		self
	}

	/// Attach compiled predicate fragments
	pub fn conditions(mut self, compiled: CompiledConditions) -> Self {
		self.clauses.extend(compiled.clauses);
		self.binds.extend(compiled.binds);
		self
	}

	/// Attach one raw fragment with its binds
	pub fn where_clause(mut self, clause: impl Into<String>, binds: HashMap<String, QueryValue>) -> Self {
		self.clauses.push(clause.into());
		self.binds.extend(binds);
		self
	}

	pub fn group_by(mut self, expression: impl Into<String>) -> Self {
		self.group_by = Some(expression.into());
		self
	}

	/// Apply pagination and ordering
	pub fn apply_params(mut self, params: &QueryParams) -> Self {
		let params = params.normalized();
		if params.page > 0 && params.page_size > 0 {
			self.limit = Some(params.page_size);
			self.offset = Some((params.page - 1) * params.page_size);
		}
		if !params.order_by_field.is_empty() {
			self.order_by = Some((params.order_by_field.clone(), params.descending()));
		}
		self
	}

	/// Lock matched rows for update (MySQL and PostgreSQL only)
	pub fn row_lock(mut self) -> Self {
		self.row_lock = true;
		self
	}

	/// Render the statement and its positional parameters
	pub fn build(&self, backend: &dyn DatabaseBackend) -> (String, Vec<QueryValue>) {
		let columns = if self.columns.is_empty() {
			"*".to_string()
		} else {
			self.columns.join(", ")
		};

		let mut sql = format!("SELECT {} FROM {}", columns, self.table);
		if !self.clauses.is_empty() {
			sql.push_str(" WHERE ");
			sql.push_str(&self.clauses.join(" AND "));
		}
		if let Some(group) = &self.group_by {
			sql.push_str(" GROUP BY ");
			sql.push_str(group);
		}
		if let Some((column, descending)) = &self.order_by {
			sql.push_str(" ORDER BY ");
			sql.push_str(column);
			if *descending {
				sql.push_str(" DESC");
			}
		}
		if let Some(limit) = self.limit {
			sql.push_str(&format!(" LIMIT {}", limit));
		}
		if let Some(offset) = self.offset {
			sql.push_str(&format!(" OFFSET {}", offset));
		}
		if self.row_lock && matches!(backend.engine(), Engine::MySql | Engine::Postgres) {
			sql.push_str(" FOR UPDATE");
		}

		rebind_named(&sql, &self.binds, backend)
	}
}

/// A pending INSERT statement, optionally upserting on the primary key
#[derive(Debug, Clone)]
pub struct InsertQuery {
	table: String,
	columns: Vec<String>,
	rows: Vec<Vec<QueryValue>>,
	upsert_key: Option<String>,
}

impl InsertQuery {
	pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			table: table.into(),
			columns: columns.into_iter().map(Into::into).collect(),
			rows: Vec::new(),
			upsert_key: None,
		}
	}

	pub fn values(mut self, row: Vec<QueryValue>) -> Self {
		self.rows.push(row);
		self
	}

	/// Turn the insert into a primary-key upsert
	pub fn upsert_on(mut self, key: impl Into<String>) -> Self {
		self.upsert_key = Some(key.into());
		self
	}

	/// Render the statement and its positional parameters
	pub fn build(&self, backend: &dyn DatabaseBackend) -> (String, Vec<QueryValue>) {
		let mut params = Vec::new();
		let mut index = 0;
		let mut tuples = Vec::with_capacity(self.rows.len());
		for row in &self.rows {
			let mut placeholders = Vec::with_capacity(row.len());
			for value in row {
				index += 1;
				placeholders.push(backend.placeholder(index));
				params.push(value.clone());
			}
			tuples.push(format!("({})", placeholders.join(", ")));
		}

		let mut sql = format!(
			"INSERT INTO {} ({}) VALUES {}",
			self.table,
			self.columns.join(", "),
			tuples.join(", ")
		);

		if let Some(key) = &self.upsert_key {
			let updatable: Vec<&String> =
				self.columns.iter().filter(|c| *c != key).collect();
			match backend.engine() {
				Engine::MySql => {
					let assignments = updatable
						.iter()
						.map(|c| format!("{} = VALUES({})", c, c))
						.collect::<Vec<_>>()
						.join(", ");
					sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {}", assignments));
				}
				_ => {
					let assignments = updatable
						.iter()
						.map(|c| format!("{} = excluded.{}", c, c))
						.collect::<Vec<_>>()
						.join(", ");
					sql.push_str(&format!(
						" ON CONFLICT({}) DO UPDATE SET {}",
						key, assignments
					));
				}
			}
		}

		(sql, params)
	}
}

/// A pending UPDATE statement
#[derive(Debug, Clone, Default)]
pub struct UpdateQuery {
	table: String,
	sets: Vec<(String, QueryValue)>,
	clauses: Vec<String>,
	binds: HashMap<String, QueryValue>,
}

impl UpdateQuery {
	pub fn new(table: impl Into<String>) -> Self {
		Self {
			table: table.into(),
			..Default::default()
		}
	}

	pub fn set(mut self, column: impl Into<String>, value: QueryValue) -> Self {
		self.sets.push((column.into(), value));
		self
	}

	pub fn conditions(mut self, compiled: CompiledConditions) -> Self {
		self.clauses.extend(compiled.clauses);
		self.binds.extend(compiled.binds);
		self
	}

	/// Render the statement and its positional parameters
	pub fn build(&self, backend: &dyn DatabaseBackend) -> (String, Vec<QueryValue>) {
		let mut binds = self.binds.clone();
		let assignments = self
			.sets
			.iter()
			.enumerate()
			.map(|(i, (column, value))| {
				let name = format!("set{}", i);
				binds.insert(name.clone(), value.clone());
				format!("{} = @{}", column, name)
			})
			.collect::<Vec<_>>()
			.join(", ");

		let mut sql = format!("UPDATE {} SET {}", self.table, assignments);
		if !self.clauses.is_empty() {
			sql.push_str(" WHERE ");
			sql.push_str(&self.clauses.join(" AND "));
		}

		rebind_named(&sql, &binds, backend)
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::error::Result;
	use crate::types::{QueryResult, Row};
	use async_trait::async_trait;

	/// A no-op backend used to exercise statement building
	pub(crate) struct MockBackend {
		pub engine: Engine,
	}

	#[async_trait]
	impl DatabaseBackend for MockBackend {
		fn engine(&self) -> Engine {
			self.engine
		}

		fn placeholder(&self, index: usize) -> String {
			match self.engine {
				Engine::Postgres => format!("${}", index),
				_ => "?".to_string(),
			}
		}

		async fn execute(&self, _sql: &str, _params: Vec<QueryValue>) -> Result<QueryResult> {
			Ok(QueryResult { rows_affected: 0 })
		}

		async fn fetch_one(&self, _sql: &str, _params: Vec<QueryValue>) -> Result<Row> {
			Ok(Row::new())
		}

		async fn fetch_all(&self, _sql: &str, _params: Vec<QueryValue>) -> Result<Vec<Row>> {
			Ok(Vec::new())
		}

		async fn fetch_optional(
			&self,
			_sql: &str,
			_params: Vec<QueryValue>,
		) -> Result<Option<Row>> {
			Ok(None)
		}

		async fn begin(&self) -> Result<Box<dyn crate::backend::TransactionExecutor>> {
			Err(crate::error::Error::NotImplemented)
		}
	}

	fn compiled(clause: &str, binds: &[(&str, QueryValue)]) -> CompiledConditions {
		CompiledConditions {
			clauses: vec![clause.to_string()],
			binds: binds
				.iter()
				.map(|(k, v)| (k.to_string(), v.clone()))
				.collect(),
		}
	}

	#[test]
	fn default_page_size_applies_when_page_set() {
		let params = QueryParams {
			page: 2,
			..Default::default()
		}
		.normalized();
		assert_eq!(params.page_size, DEFAULT_PAGE_SIZE);
	}

	#[test]
	fn zero_page_disables_pagination() {
		let backend = MockBackend {
			engine: Engine::Sqlite,
		};
		let (sql, _) = SelectQuery::new("items")
			.apply_params(&QueryParams::default())
			.build(&backend);
		assert_eq!(sql, "SELECT * FROM items");
	}

	#[test]
	fn pagination_and_ordering_render() {
		let backend = MockBackend {
			engine: Engine::Sqlite,
		};
		let params = QueryParams {
			page: 3,
			page_size: 10,
			order_by_field: "created_at".to_string(),
			sort_direction: "DESC".to_string(),
		};
		let (sql, _) = SelectQuery::new("items").apply_params(&params).build(&backend);
		assert_eq!(
			sql,
			"SELECT * FROM items ORDER BY created_at DESC LIMIT 10 OFFSET 20"
		);
	}

	#[test]
	fn unknown_sort_direction_sorts_ascending() {
		let backend = MockBackend {
			engine: Engine::Sqlite,
		};
		let params = QueryParams {
			order_by_field: "created_at".to_string(),
			sort_direction: "sideways".to_string(),
			..Default::default()
		};
		let (sql, _) = SelectQuery::new("items").apply_params(&params).build(&backend);
		assert_eq!(sql, "SELECT * FROM items ORDER BY created_at");
	}

	#[test]
	fn named_binds_become_positional_in_appearance_order() {
		let backend = MockBackend {
			engine: Engine::Postgres,
		};
		let (sql, params) = SelectQuery::new("items")
			.conditions(compiled(
				"a = @var1 AND b = @var0",
				&[
					("var0", QueryValue::from("zero")),
					("var1", QueryValue::from("one")),
				],
			))
			.build(&backend);
		assert_eq!(sql, "SELECT * FROM items WHERE a = $1 AND b = $2");
		assert_eq!(
			params,
			vec![QueryValue::from("one"), QueryValue::from("zero")]
		);
	}

	#[test]
	fn row_lock_only_applies_to_locking_engines() {
		let compiled_conditions = compiled("id = @var0", &[("var0", QueryValue::from("x"))]);

		let pg = MockBackend {
			engine: Engine::Postgres,
		};
		let (sql, _) = SelectQuery::new("items")
			.conditions(compiled_conditions.clone())
			.row_lock()
			.build(&pg);
		assert_eq!(sql, "SELECT * FROM items WHERE id = $1 FOR UPDATE");

		let sqlite = MockBackend {
			engine: Engine::Sqlite,
		};
		let (sql, _) = SelectQuery::new("items")
			.conditions(compiled_conditions)
			.row_lock()
			.build(&sqlite);
		assert_eq!(sql, "SELECT * FROM items WHERE id = ?");
	}

	#[test]
	fn insert_renders_multi_row_tuples() {
		let backend = MockBackend {
			engine: Engine::Postgres,
		};
		let (sql, params) = InsertQuery::new("items", ["id", "number"])
			.values(vec![QueryValue::from("a"), QueryValue::Int(1)])
			.values(vec![QueryValue::from("b"), QueryValue::Int(2)])
			.build(&backend);
		assert_eq!(
			sql,
			"INSERT INTO items (id, number) VALUES ($1, $2), ($3, $4)"
		);
		assert_eq!(params.len(), 4);
	}

	#[test]
	fn upsert_renders_per_engine() {
		let mysql = MockBackend {
			engine: Engine::MySql,
		};
		let (sql, _) = InsertQuery::new("items", ["id", "number"])
			.values(vec![QueryValue::from("a"), QueryValue::Int(1)])
			.upsert_on("id")
			.build(&mysql);
		assert_eq!(
			sql,
			"INSERT INTO items (id, number) VALUES (?, ?) \
			 ON DUPLICATE KEY UPDATE number = VALUES(number)"
		);

		let sqlite = MockBackend {
			engine: Engine::Sqlite,
		};
		let (sql, _) = InsertQuery::new("items", ["id", "number"])
			.values(vec![QueryValue::from("a"), QueryValue::Int(1)])
			.upsert_on("id")
			.build(&sqlite);
		assert_eq!(
			sql,
			"INSERT INTO items (id, number) VALUES (?, ?) \
			 ON CONFLICT(id) DO UPDATE SET number = excluded.number"
		);
	}

	#[test]
	fn update_combines_sets_and_conditions() {
		let backend = MockBackend {
			engine: Engine::Postgres,
		};
		let (sql, params) = UpdateQuery::new("items")
			.set("counter", QueryValue::Int(9))
			.conditions(compiled("id = @var0", &[("var0", QueryValue::from("x"))]))
			.build(&backend);
		assert_eq!(sql, "UPDATE items SET counter = $1 WHERE id = $2");
		assert_eq!(params, vec![QueryValue::Int(9), QueryValue::from("x")]);
	}
}
