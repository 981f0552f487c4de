//! The schema catalog.
//!
//! The catalog is the in-memory graph of databases, tables, columns and
//! indexes. It is reconstructed from the catalog store on engine start by
//! scanning the four catalog key families in dependency order; any dangling
//! reference between phases is fatal.
//!
//! Cross-references inside the graph are integer ids resolved against the
//! owning collection, never owning pointers, so the graph stays acyclic.

use std::collections::BTreeSet;

use tracing::debug;

use strata_kv::KvStore;

use crate::encoding::{
    kind_range, parse_column_key, parse_database_key, parse_index_key, parse_table_key,
    KIND_COLUMN, KIND_DATABASE, KIND_INDEX, KIND_TABLE,
};
use crate::error::{SqlError, SqlResult};
use crate::value::SqlType;

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column id, unique within its table. Ids start at 1.
    pub id: u32,
    /// Column name, unique within its table.
    pub name: String,
    /// Declared type.
    pub ty: SqlType,
}

/// A table of a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Table id, unique within its database. Ids start at 1.
    pub id: u32,
    /// Table name, unique within its database.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Id of the primary-key column.
    pub pk_col_id: u32,
    /// Column ids carrying a secondary index. The primary key is implicitly
    /// indexed and never appears here.
    pub indexed: BTreeSet<u32>,
}

impl Table {
    /// Builds a table from a CREATE TABLE definition, assigning column ids
    /// in declaration order.
    pub fn build(
        id: u32,
        name: impl Into<String>,
        columns: Vec<(String, SqlType)>,
        pk_name: &str,
    ) -> SqlResult<Table> {
        let mut built = Vec::with_capacity(columns.len());
        for (pos, (col_name, ty)) in columns.into_iter().enumerate() {
            if built.iter().any(|c: &Column| c.name == col_name) {
                return Err(SqlError::DuplicatedColumn);
            }
            built.push(Column {
                id: pos as u32 + 1,
                name: col_name,
                ty,
            });
        }

        let pk = built
            .iter()
            .find(|c| c.name == pk_name)
            .ok_or(SqlError::InvalidPK)?;
        if !matches!(pk.ty, SqlType::Integer | SqlType::String) {
            return Err(SqlError::InvalidPK);
        }
        let pk_col_id = pk.id;

        Ok(Table {
            id,
            name: name.into(),
            columns: built,
            pk_col_id,
            indexed: BTreeSet::new(),
        })
    }

    /// Looks up a column by name.
    pub fn column_by_name(&self, name: &str) -> SqlResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or(SqlError::ColumnDoesNotExist)
    }

    /// Looks up a column by id.
    pub fn column_by_id(&self, id: u32) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// The primary-key column.
    pub fn pk(&self) -> &Column {
        self.column_by_id(self.pk_col_id)
            .expect("primary-key column is validated at construction")
    }

    /// Returns true if the column is scannable in value order, either as
    /// the primary key or through a secondary index.
    pub fn is_indexed(&self, col_id: u32) -> bool {
        col_id == self.pk_col_id || self.indexed.contains(&col_id)
    }

    /// Validates a CREATE INDEX target and returns the column id to index.
    pub fn index_candidate(&self, col_name: &str) -> SqlResult<u32> {
        let col = self.column_by_name(col_name)?;
        if self.is_indexed(col.id) {
            return Err(SqlError::IndexAlreadyExists);
        }
        Ok(col.id)
    }
}

/// A database: a named collection of tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    /// Database id, unique in the catalog. Ids start at 1.
    pub id: u32,
    /// Database name, unique in the catalog.
    pub name: String,
    /// Tables in creation order.
    pub tables: Vec<Table>,
}

impl Database {
    /// Looks up a table by name.
    pub fn table_by_name(&self, name: &str) -> SqlResult<&Table> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or(SqlError::TableDoesNotExist)
    }

    /// Mutable lookup of a table by name.
    pub fn table_by_name_mut(&mut self, name: &str) -> SqlResult<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or(SqlError::TableDoesNotExist)
    }

    /// Returns true if a table with the given name exists.
    pub fn exist_table(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.name == name)
    }

    /// The id the next created table will receive.
    pub fn next_table_id(&self) -> u32 {
        self.tables.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }

    /// Registers a table. The caller has already persisted it.
    pub fn add_table(&mut self, table: Table) -> SqlResult<()> {
        if self.exist_table(&table.name) {
            return Err(SqlError::TableAlreadyExists);
        }
        self.tables.push(table);
        Ok(())
    }

    fn table_by_id_mut(&mut self, id: u32) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == id)
    }
}

/// The catalog: every database known to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    databases: Vec<Database>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstructs the catalog from the catalog store.
    ///
    /// Scans the database, table, column and index key families in that
    /// order; each phase may only reference entities loaded by an earlier
    /// one. Kind bytes outside the four catalog families are ignored.
    pub fn load(store: &dyn KvStore, prefix: u8) -> SqlResult<Catalog> {
        let mut catalog = Catalog::new();

        for (key, value) in scan_kind(store, prefix, KIND_DATABASE)? {
            let id = parse_database_key(key.as_bytes())?;
            let name = utf8_name(&value)?;
            if catalog.exist_database(&name) {
                return Err(SqlError::CorruptedCatalog(format!(
                    "duplicate database '{name}'"
                )));
            }
            catalog.databases.push(Database {
                id,
                name,
                tables: Vec::new(),
            });
        }
        debug!(databases = catalog.databases.len(), "catalog databases loaded");

        for (key, value) in scan_kind(store, prefix, KIND_TABLE)? {
            let (db_id, table_id, pk_col_id) = parse_table_key(key.as_bytes())?;
            let name = utf8_name(&value)?;
            let db = catalog.database_by_id_mut(db_id).ok_or_else(|| {
                SqlError::CorruptedCatalog(format!("table '{name}' references unknown database"))
            })?;
            if db.exist_table(&name) {
                return Err(SqlError::CorruptedCatalog(format!("duplicate table '{name}'")));
            }
            db.tables.push(Table {
                id: table_id,
                name,
                columns: Vec::new(),
                pk_col_id,
                indexed: BTreeSet::new(),
            });
        }
        debug!("catalog tables loaded");

        for (key, _) in scan_kind(store, prefix, KIND_COLUMN)? {
            let (db_id, table_id, col_id, ty, name) = parse_column_key(key.as_bytes())?;
            let table = catalog
                .database_by_id_mut(db_id)
                .and_then(|db| db.table_by_id_mut(table_id))
                .ok_or_else(|| {
                    SqlError::CorruptedCatalog(format!("column '{name}' references unknown table"))
                })?;
            table.columns.push(Column { id: col_id, name, ty });
        }
        debug!("catalog columns loaded");

        // Every table must own its declared primary-key column.
        for db in &catalog.databases {
            for table in &db.tables {
                match table.column_by_id(table.pk_col_id) {
                    Some(pk) if matches!(pk.ty, SqlType::Integer | SqlType::String) => {}
                    _ => {
                        return Err(SqlError::CorruptedCatalog(format!(
                            "table '{}' has no valid primary-key column",
                            table.name
                        )))
                    }
                }
            }
        }

        for (key, _) in scan_kind(store, prefix, KIND_INDEX)? {
            let (db_id, table_id, col_id) = parse_index_key(key.as_bytes())?;
            let table = catalog
                .database_by_id_mut(db_id)
                .and_then(|db| db.table_by_id_mut(table_id))
                .ok_or_else(|| {
                    SqlError::CorruptedCatalog("index references unknown table".to_string())
                })?;
            if table.column_by_id(col_id).is_none() {
                return Err(SqlError::CorruptedCatalog(
                    "index references unknown column".to_string(),
                ));
            }
            // The primary key's index entry is implicit in the row keyspace.
            if col_id != table.pk_col_id {
                table.indexed.insert(col_id);
            }
        }
        debug!("catalog ready");

        Ok(catalog)
    }

    /// All databases, in creation order.
    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    /// Returns true if a database with the given name exists.
    pub fn exist_database(&self, name: &str) -> bool {
        self.databases.iter().any(|db| db.name == name)
    }

    /// Looks up a database by name.
    pub fn database_by_name(&self, name: &str) -> SqlResult<&Database> {
        self.databases
            .iter()
            .find(|db| db.name == name)
            .ok_or(SqlError::DatabaseDoesNotExist)
    }

    /// Mutable lookup of a database by name.
    pub fn database_by_name_mut(&mut self, name: &str) -> SqlResult<&mut Database> {
        self.databases
            .iter_mut()
            .find(|db| db.name == name)
            .ok_or(SqlError::DatabaseDoesNotExist)
    }

    /// The id the next created database will receive.
    pub fn next_database_id(&self) -> u32 {
        self.databases.iter().map(|db| db.id).max().unwrap_or(0) + 1
    }

    /// Registers a database. The caller has already persisted it.
    pub fn add_database(&mut self, id: u32, name: impl Into<String>) -> SqlResult<()> {
        let name = name.into();
        if self.exist_database(&name) {
            return Err(SqlError::DatabaseAlreadyExists);
        }
        self.databases.push(Database {
            id,
            name,
            tables: Vec::new(),
        });
        Ok(())
    }

    fn database_by_id_mut(&mut self, id: u32) -> Option<&mut Database> {
        self.databases.iter_mut().find(|db| db.id == id)
    }
}

fn scan_kind(store: &dyn KvStore, prefix: u8, kind: u8) -> SqlResult<Vec<(strata_kv::Key, Vec<u8>)>> {
    let (from, to) = kind_range(prefix, kind);
    let mut cursor = store.scan(from, to, false)?;
    let mut entries = Vec::new();
    while let Some(entry) = cursor.next()? {
        entries.push(entry);
    }
    cursor.close();
    Ok(entries)
}

fn utf8_name(bytes: &[u8]) -> SqlResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| SqlError::CorruptedCatalog("name is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<(String, SqlType)> {
        vec![
            ("id".to_string(), SqlType::Integer),
            ("title".to_string(), SqlType::String),
            ("active".to_string(), SqlType::Boolean),
        ]
    }

    #[test]
    fn test_table_build() {
        let table = Table::build(1, "table1", columns(), "id").unwrap();
        assert_eq!(table.pk().name, "id");
        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.columns[0].id, 1);
        assert_eq!(table.columns[2].id, 3);
        assert!(table.is_indexed(1));
        assert!(!table.is_indexed(2));
    }

    #[test]
    fn test_table_build_duplicate_column() {
        let mut cols = columns();
        cols.push(("id".to_string(), SqlType::Integer));
        assert!(matches!(
            Table::build(1, "t", cols, "id"),
            Err(SqlError::DuplicatedColumn)
        ));
    }

    #[test]
    fn test_table_build_invalid_pk() {
        // Unknown primary-key column
        assert!(matches!(
            Table::build(1, "t", columns(), "missing"),
            Err(SqlError::InvalidPK)
        ));
        // Boolean primary key
        assert!(matches!(
            Table::build(1, "t", columns(), "active"),
            Err(SqlError::InvalidPK)
        ));
    }

    #[test]
    fn test_index_candidate() {
        let mut table = Table::build(1, "t", columns(), "id").unwrap();

        // Indexing the primary key is redundant
        assert!(matches!(
            table.index_candidate("id"),
            Err(SqlError::IndexAlreadyExists)
        ));
        assert!(matches!(
            table.index_candidate("missing"),
            Err(SqlError::ColumnDoesNotExist)
        ));

        let col_id = table.index_candidate("title").unwrap();
        table.indexed.insert(col_id);
        assert!(matches!(
            table.index_candidate("title"),
            Err(SqlError::IndexAlreadyExists)
        ));
    }

    #[test]
    fn test_catalog_ids() {
        let mut catalog = Catalog::new();
        assert_eq!(catalog.next_database_id(), 1);

        catalog.add_database(1, "db1").unwrap();
        assert_eq!(catalog.next_database_id(), 2);
        assert!(matches!(
            catalog.add_database(2, "db1"),
            Err(SqlError::DatabaseAlreadyExists)
        ));

        let db = catalog.database_by_name_mut("db1").unwrap();
        assert_eq!(db.next_table_id(), 1);
        db.add_table(Table::build(1, "t1", columns(), "id").unwrap())
            .unwrap();
        assert_eq!(db.next_table_id(), 2);
        assert!(matches!(
            db.add_table(Table::build(2, "t1", columns(), "id").unwrap()),
            Err(SqlError::TableAlreadyExists)
        ));
    }

    #[test]
    fn test_lookups() {
        let mut catalog = Catalog::new();
        catalog.add_database(1, "db1").unwrap();
        assert!(matches!(
            catalog.database_by_name("db2"),
            Err(SqlError::DatabaseDoesNotExist)
        ));

        let db = catalog.database_by_name_mut("db1").unwrap();
        db.add_table(Table::build(1, "t1", columns(), "id").unwrap())
            .unwrap();

        let table = db.table_by_name("t1").unwrap();
        assert!(matches!(
            table.column_by_name("nope"),
            Err(SqlError::ColumnDoesNotExist)
        ));
        assert_eq!(table.column_by_name("title").unwrap().id, 2);

        assert!(matches!(
            catalog.database_by_name("db1").unwrap().table_by_name("t2"),
            Err(SqlError::TableDoesNotExist)
        ));
    }
}
