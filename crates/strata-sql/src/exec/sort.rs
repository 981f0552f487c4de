//! Materialized ordering.

use std::cmp::Ordering;

use crate::error::{SqlError, SqlResult};
use crate::exec::{ColumnDescriptor, Row, RowReader};
use crate::value::Value;

/// One ORDER BY key.
#[derive(Debug, Clone)]
pub(crate) struct SortKey {
    /// Selector of the sort column.
    pub selector: String,
    /// Descending when set.
    pub descending: bool,
}

/// Materializes the child's rows and stable-sorts them by the given keys.
///
/// Only used when the planner could not obtain the requested order from an
/// index or primary-key scan.
pub(crate) struct SortReader {
    child: Box<dyn RowReader>,
    keys: Vec<SortKey>,
    sorted: Option<Vec<Row>>,
    pos: usize,
    closed: bool,
}

impl SortReader {
    pub fn new(child: Box<dyn RowReader>, keys: Vec<SortKey>) -> Self {
        Self {
            child,
            keys,
            sorted: None,
            pos: 0,
            closed: false,
        }
    }

    fn materialize(&mut self) -> SqlResult<()> {
        let mut rows = Vec::new();
        loop {
            match self.child.next() {
                Ok(row) => rows.push(row),
                Err(SqlError::NoMoreRows) => break,
                Err(err) => return Err(err),
            }
        }

        let keys = self.keys.clone();
        rows.sort_by(|a, b| {
            for key in &keys {
                let av = a.get(&key.selector).unwrap_or(&Value::Null);
                let bv = b.get(&key.selector).unwrap_or(&Value::Null);
                let ord = av.sort_cmp(bv);
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        self.sorted = Some(rows);
        Ok(())
    }
}

impl RowReader for SortReader {
    fn columns(&self) -> Vec<ColumnDescriptor> {
        self.child.columns()
    }

    fn next(&mut self) -> SqlResult<Row> {
        if self.closed {
            return Err(SqlError::NoMoreRows);
        }
        if self.sorted.is_none() {
            self.materialize()?;
        }

        let rows = self.sorted.as_ref().expect("materialized above");
        if self.pos >= rows.len() {
            return Err(SqlError::NoMoreRows);
        }
        let row = rows[self.pos].clone();
        self.pos += 1;
        Ok(row)
    }

    fn close(&mut self) {
        self.child.close();
        self.sorted = None;
        self.closed = true;
    }
}
