//! The executor facade.
//!
//! An [`Engine`] owns the catalog graph and references to the two stores:
//! the catalog store persisting schema facts and the data store persisting
//! row and index entries. DDL and DML run serially through [`Engine::exec_stmt`];
//! queries return a root reader from [`Engine::query_stmt`] and may run
//! concurrently with the writer and each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_kv::{KeyValue, KvStore, WriteRef};

use crate::catalog::{Catalog, Table};
use crate::encoding::{
    column_key, database_key, encode_row_payload, index_entry_key, index_key, row_key, table_key,
};
use crate::error::{SqlError, SqlResult};
use crate::eval::{eval, StatementContext};
use crate::exec::{Row, RowReader};
use crate::parser::{parse, Expr, Statement};
use crate::planner::Planner;
use crate::value::{SqlType, Value};

/// Engine construction options.
///
/// A plain record with builder-style setters; unset fields keep their
/// defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Single byte prepended to every key this engine writes, isolating
    /// its keyspace inside a shared store.
    pub prefix: u8,
    /// Implicit database preselected at construction.
    pub default_database: Option<String>,
}

impl EngineOptions {
    /// Creates options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: u8) -> Self {
        self.prefix = prefix;
        self
    }

    /// Preselects the implicit database.
    #[must_use]
    pub fn with_default_database(mut self, name: impl Into<String>) -> Self {
        self.default_database = Some(name.into());
        self
    }
}

/// Outcome of a DDL/DML statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecSummary {
    /// Number of key-value entries written.
    pub writes: u64,
    /// Reference of the last store commit, when anything was written.
    pub last_write: Option<WriteRef>,
}

impl ExecSummary {
    fn none() -> Self {
        Self::default()
    }
}

/// The SQL execution engine.
pub struct Engine {
    catalog_store: Arc<dyn KvStore>,
    data_store: Arc<dyn KvStore>,
    prefix: u8,
    catalog: RwLock<Catalog>,
    implicit_db: RwLock<Option<String>>,
}

impl Engine {
    /// Opens an engine over the given stores, reloading the catalog.
    pub fn new(
        catalog_store: Arc<dyn KvStore>,
        data_store: Arc<dyn KvStore>,
        options: EngineOptions,
    ) -> SqlResult<Engine> {
        let catalog = Catalog::load(catalog_store.as_ref(), options.prefix)?;
        if let Some(name) = &options.default_database {
            catalog.database_by_name(name)?;
        }
        Ok(Engine {
            catalog_store,
            data_store,
            prefix: options.prefix,
            catalog: RwLock::new(catalog),
            implicit_db: RwLock::new(options.default_database),
        })
    }

    /// The current implicit database, if one was selected.
    pub fn current_database(&self) -> Option<String> {
        self.implicit_db.read().clone()
    }

    /// A point-in-time copy of the catalog graph.
    pub fn catalog_snapshot(&self) -> Catalog {
        self.catalog.read().clone()
    }

    /// Parses and executes one DDL/DML statement.
    ///
    /// `wait_for_indexing` is forwarded to the underlying store so the call
    /// blocks until its writes are durably indexed.
    pub fn exec_stmt(
        &self,
        sql: &str,
        params: &HashMap<String, Value>,
        wait_for_indexing: bool,
    ) -> SqlResult<ExecSummary> {
        match parse(sql)? {
            Statement::CreateDatabase(name) => self.create_database(name, wait_for_indexing),
            Statement::UseDatabase(name) => self.use_database(name),
            Statement::CreateTable { name, columns, pk } => {
                self.create_table(name, columns, pk, wait_for_indexing)
            }
            Statement::CreateIndex { table, column } => {
                self.create_index(table, column, wait_for_indexing)
            }
            Statement::Upsert {
                table,
                columns,
                values,
            } => self.upsert(table, columns, values, params, wait_for_indexing),
            Statement::Select(_) => Err(SqlError::syntax(
                0,
                "queries must be executed through query_stmt",
            )),
        }
    }

    /// Parses and plans one query, returning its root reader.
    ///
    /// The reader observes every write acknowledged before this call.
    pub fn query_stmt(
        &self,
        sql: &str,
        params: &HashMap<String, Value>,
    ) -> SqlResult<Box<dyn RowReader>> {
        let select = match parse(sql)? {
            Statement::Select(select) => *select,
            _ => {
                return Err(SqlError::syntax(
                    0,
                    "only queries can be executed through query_stmt",
                ))
            }
        };

        let db_name = self.implicit_database()?;
        let database = self.catalog.read().database_by_name(&db_name)?.clone();
        let ctx = Arc::new(StatementContext {
            database: db_name,
            params: params.clone(),
            now: now_unix_nanos(),
        });
        Planner::new(self.data_store.clone(), self.prefix, database, ctx).plan_select(select)
    }

    // =========================================================================
    // DDL
    // =========================================================================

    fn create_database(&self, name: String, wait: bool) -> SqlResult<ExecSummary> {
        let mut catalog = self.catalog.write();
        if catalog.exist_database(&name) {
            return Err(SqlError::DatabaseAlreadyExists);
        }
        let id = catalog.next_database_id();

        let entry = KeyValue::new(database_key(self.prefix, id), name.clone().into_bytes());
        let write = self.catalog_store.set(entry, wait)?;
        catalog.add_database(id, name.clone())?;

        debug!(database = %name, id, "database created");
        Ok(ExecSummary {
            writes: 1,
            last_write: Some(write),
        })
    }

    fn use_database(&self, name: String) -> SqlResult<ExecSummary> {
        self.catalog.read().database_by_name(&name)?;
        *self.implicit_db.write() = Some(name);
        Ok(ExecSummary::none())
    }

    fn create_table(
        &self,
        name: String,
        columns: Vec<crate::parser::ColumnDef>,
        pk: String,
        wait: bool,
    ) -> SqlResult<ExecSummary> {
        let db_name = self.implicit_database()?;
        let mut catalog = self.catalog.write();
        let db = catalog.database_by_name_mut(&db_name)?;

        if db.exist_table(&name) {
            return Err(SqlError::TableAlreadyExists);
        }
        let table_id = db.next_table_id();
        let table = Table::build(
            table_id,
            name.clone(),
            columns.into_iter().map(|c| (c.name, c.ty)).collect(),
            &pk,
        )?;

        let mut entries = Vec::with_capacity(table.columns.len() + 2);
        entries.push(KeyValue::new(
            table_key(self.prefix, db.id, table.id, table.pk_col_id),
            name.clone().into_bytes(),
        ));
        for col in &table.columns {
            entries.push(KeyValue::new(
                column_key(self.prefix, db.id, table.id, col.id, col.ty, &col.name),
                Vec::new(),
            ));
        }
        entries.push(KeyValue::new(
            index_key(self.prefix, db.id, table.id, table.pk_col_id),
            Vec::new(),
        ));

        let writes = entries.len() as u64;
        let write = self.catalog_store.bulk_set(entries, wait)?;
        db.add_table(table)?;

        debug!(database = %db_name, table = %name, id = table_id, "table created");
        Ok(ExecSummary {
            writes,
            last_write: Some(write),
        })
    }

    fn create_index(&self, table_name: String, column: String, wait: bool) -> SqlResult<ExecSummary> {
        let db_name = self.implicit_database()?;
        let mut catalog = self.catalog.write();
        let db = catalog.database_by_name_mut(&db_name)?;
        let db_id = db.id;
        let table = db.table_by_name_mut(&table_name)?;

        let col_id = table.index_candidate(&column)?;

        // Existing rows are not backfilled; the index reflects writes made
        // after its creation.
        let entry = KeyValue::new(index_key(self.prefix, db_id, table.id, col_id), Vec::new());
        let write = self.catalog_store.set(entry, wait)?;
        table.indexed.insert(col_id);

        debug!(database = %db_name, table = %table_name, column = %column, "index created");
        Ok(ExecSummary {
            writes: 1,
            last_write: Some(write),
        })
    }

    // =========================================================================
    // DML
    // =========================================================================

    fn upsert(
        &self,
        table_name: String,
        columns: Vec<String>,
        values: Vec<Expr>,
        params: &HashMap<String, Value>,
        wait: bool,
    ) -> SqlResult<ExecSummary> {
        let db_name = self.implicit_database()?;
        let (db_id, table) = {
            let catalog = self.catalog.read();
            let db = catalog.database_by_name(&db_name)?;
            (db.id, db.table_by_name(&table_name)?.clone())
        };

        if values.len() != columns.len() {
            return Err(SqlError::InvalidNumberOfValues);
        }
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(SqlError::DuplicatedColumn);
            }
        }

        let ctx = StatementContext {
            database: db_name.clone(),
            params: params.clone(),
            now: now_unix_nanos(),
        };
        let no_row = Row::new();

        let mut cells: Vec<(u32, Value)> = Vec::new();
        for (name, expr) in columns.iter().zip(values) {
            let col = table.column_by_name(name)?;
            let mut value = eval(&expr, &no_row, &ctx.eval_ctx())?;

            // Plain integers (NOW() included) populate TIMESTAMP columns
            if col.ty == SqlType::Timestamp {
                if let Value::Integer(v) = value {
                    value = Value::Timestamp(v);
                }
            }

            if value.is_null() {
                if col.id == table.pk_col_id {
                    return Err(SqlError::PKCanNotBeNull);
                }
                continue;
            }
            if value.sql_type() != Some(col.ty) {
                return Err(SqlError::InvalidValue);
            }
            cells.push((col.id, value));
        }

        let pk_value = cells
            .iter()
            .find(|(id, _)| *id == table.pk_col_id)
            .map(|(_, v)| v.clone())
            .ok_or(SqlError::PKCanNotBeNull)?;
        let ordered_pk = pk_value.encode_ordered()?;

        let payload_columns = cells
            .iter()
            .map(|(id, value)| Ok((*id, value.encode_payload()?)))
            .collect::<SqlResult<Vec<_>>>()?;
        let payload = encode_row_payload(payload_columns);

        let mut entries = vec![KeyValue::new(
            row_key(self.prefix, db_id, table.id, &ordered_pk),
            payload,
        )];
        // One index entry per written indexed column. Entries from earlier
        // versions of the row are left behind.
        for (col_id, value) in &cells {
            if table.indexed.contains(col_id) {
                let ordered_value = value.encode_ordered()?;
                entries.push(KeyValue::new(
                    index_entry_key(
                        self.prefix,
                        db_id,
                        table.id,
                        *col_id,
                        &ordered_value,
                        &ordered_pk,
                    ),
                    Vec::new(),
                ));
            }
        }

        let writes = entries.len() as u64;
        let write = self.data_store.bulk_set(entries, wait)?;

        debug!(database = %db_name, table = %table_name, writes, "row upserted");
        Ok(ExecSummary {
            writes,
            last_write: Some(write),
        })
    }

    fn implicit_database(&self) -> SqlResult<String> {
        self.implicit_db
            .read()
            .clone()
            .ok_or(SqlError::NoDatabaseSelected)
    }
}

fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
