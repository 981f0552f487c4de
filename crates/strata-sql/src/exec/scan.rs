//! Base-table access: primary-key and secondary-index scans.

use std::sync::Arc;

use tracing::trace;

use strata_kv::{Cursor, KvStore};

use crate::catalog::Table;
use crate::encoding::{
    decode_row_payload, encode_selector, index_entries_range, row_key, split_index_entry,
    table_rows_range,
};
use crate::error::{SqlError, SqlResult};
use crate::exec::{ColumnDescriptor, Row, RowReader};
use crate::value::Value;

/// Decodes a stored row payload into an output row qualified by `alias`.
///
/// Every declared column appears in the output; columns missing from the
/// payload decode to `Null`. Column ids the table no longer declares are
/// skipped.
fn decode_stored_row(database: &str, alias: &str, table: &Table, payload: &[u8]) -> SqlResult<Row> {
    let mut row = Row::new();
    for (col_id, bytes) in decode_row_payload(payload)? {
        if let Some(col) = table.column_by_id(col_id) {
            let value = Value::decode_payload(col.ty, &bytes)?;
            row.insert(encode_selector(database, alias, &col.name), value);
        }
    }
    for col in &table.columns {
        let selector = encode_selector(database, alias, &col.name);
        if row.get(&selector).is_none() {
            row.insert(selector, Value::Null);
        }
    }
    Ok(row)
}

fn table_descriptors(database: &str, alias: &str, table: &Table) -> Vec<ColumnDescriptor> {
    table
        .columns
        .iter()
        .map(|col| ColumnDescriptor {
            database: database.to_string(),
            table: alias.to_string(),
            column: col.name.clone(),
            ty: col.ty,
        })
        .collect()
}

/// Scans one table's row entries in primary-key order.
pub(crate) struct TableScanReader {
    store: Arc<dyn KvStore>,
    prefix: u8,
    db_id: u32,
    database: String,
    table: Table,
    alias: String,
    descending: bool,
    cursor: Option<Box<dyn Cursor>>,
    closed: bool,
}

impl TableScanReader {
    pub fn new(
        store: Arc<dyn KvStore>,
        prefix: u8,
        db_id: u32,
        database: String,
        table: Table,
        alias: String,
        descending: bool,
    ) -> Self {
        Self {
            store,
            prefix,
            db_id,
            database,
            table,
            alias,
            descending,
            cursor: None,
            closed: false,
        }
    }
}

impl RowReader for TableScanReader {
    fn columns(&self) -> Vec<ColumnDescriptor> {
        table_descriptors(&self.database, &self.alias, &self.table)
    }

    fn next(&mut self) -> SqlResult<Row> {
        if self.closed {
            return Err(SqlError::NoMoreRows);
        }
        if self.cursor.is_none() {
            let (from, to) = table_rows_range(self.prefix, self.db_id, self.table.id);
            trace!(table = %self.table.name, descending = self.descending, "opening row scan");
            self.cursor = Some(self.store.scan(from, to, self.descending)?);
        }

        let cursor = self.cursor.as_mut().expect("cursor opened above");
        match cursor.next()? {
            Some((_, payload)) => {
                decode_stored_row(&self.database, &self.alias, &self.table, &payload)
            }
            None => {
                self.close();
                Err(SqlError::NoMoreRows)
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.closed = true;
    }
}

/// Scans one secondary index in column-value order, fetching each hit's row
/// through a point lookup.
pub(crate) struct IndexScanReader {
    store: Arc<dyn KvStore>,
    prefix: u8,
    db_id: u32,
    database: String,
    table: Table,
    col_id: u32,
    alias: String,
    descending: bool,
    cursor: Option<Box<dyn Cursor>>,
    closed: bool,
}

impl IndexScanReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KvStore>,
        prefix: u8,
        db_id: u32,
        database: String,
        table: Table,
        col_id: u32,
        alias: String,
        descending: bool,
    ) -> Self {
        Self {
            store,
            prefix,
            db_id,
            database,
            table,
            col_id,
            alias,
            descending,
            cursor: None,
            closed: false,
        }
    }
}

impl RowReader for IndexScanReader {
    fn columns(&self) -> Vec<ColumnDescriptor> {
        table_descriptors(&self.database, &self.alias, &self.table)
    }

    fn next(&mut self) -> SqlResult<Row> {
        if self.closed {
            return Err(SqlError::NoMoreRows);
        }
        if self.cursor.is_none() {
            let (from, to) =
                index_entries_range(self.prefix, self.db_id, self.table.id, self.col_id);
            trace!(table = %self.table.name, col_id = self.col_id, "opening index scan");
            self.cursor = Some(self.store.scan(from, to, self.descending)?);
        }

        let col_ty = self
            .table
            .column_by_id(self.col_id)
            .ok_or(SqlError::ColumnDoesNotExist)?
            .ty;

        loop {
            let cursor = self.cursor.as_mut().expect("cursor opened above");
            let (key, _) = match cursor.next()? {
                Some(entry) => entry,
                None => {
                    self.close();
                    return Err(SqlError::NoMoreRows);
                }
            };

            // Entry layout: prefix, kind, dbId, tableId, colId, value, pk
            let suffix = key.as_bytes().get(14..).ok_or(SqlError::InvalidValue)?;
            let (_, ordered_pk) = split_index_entry(col_ty, suffix)?;
            let rk = row_key(self.prefix, self.db_id, self.table.id, ordered_pk);

            match self.store.get(rk.as_bytes())? {
                Some(payload) => {
                    return decode_stored_row(&self.database, &self.alias, &self.table, &payload)
                }
                // The row vanished underneath the index entry; skip it.
                None => continue,
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.closed = true;
    }
}
