//! Pull-based row readers.
//!
//! Every relational operator implements [`RowReader`]: `columns` describes
//! the output shape, `next` pulls one row and eventually returns
//! [`SqlError::NoMoreRows`], and `close` releases any underlying store
//! cursor. Closing is idempotent; a closed reader keeps answering
//! `NoMoreRows`.

mod filter;
mod group;
mod join;
mod project;
mod scan;
mod sort;

pub(crate) use filter::FilterReader;
pub(crate) use group::{AggregateSpec, GroupReader};
pub(crate) use join::{JoinReader, ReaderFactory};
pub(crate) use project::{OutputColumn, ProjectionReader};
pub(crate) use scan::{IndexScanReader, TableScanReader};
pub(crate) use sort::{SortKey, SortReader};

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encoding::encode_selector;
use crate::error::SqlResult;
use crate::value::{SqlType, Value};

/// Describes one output column of a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Database name.
    pub database: String,
    /// Table name or alias.
    pub table: String,
    /// Column name or alias.
    pub column: String,
    /// Column type.
    pub ty: SqlType,
}

impl ColumnDescriptor {
    /// The fully qualified selector identifying this column in a [`Row`].
    pub fn selector(&self) -> String {
        encode_selector(&self.database, &self.table, &self.column)
    }
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.selector(), self.ty)
    }
}

/// A single output row: fully qualified selectors mapped to values.
///
/// Declared columns missing from the stored entry are present in the map as
/// [`Value::Null`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value under a selector, if present.
    pub fn get(&self, selector: &str) -> Option<&Value> {
        self.values.get(selector)
    }

    /// Convenience lookup by selector parts.
    pub fn value(&self, database: &str, table: &str, column: &str) -> Option<&Value> {
        self.get(&encode_selector(database, table, column))
    }

    /// Inserts a value under a selector.
    pub fn insert(&mut self, selector: String, value: Value) {
        self.values.insert(selector, value);
    }

    /// Absorbs every entry of another row. Used by joins.
    pub fn merge(&mut self, other: Row) {
        self.values.extend(other.values);
    }

    /// Number of selectors in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The pull contract shared by all relational operators.
pub trait RowReader: Send {
    /// Output column descriptors, in output order.
    fn columns(&self) -> Vec<ColumnDescriptor>;

    /// Pulls the next row; [`SqlError::NoMoreRows`] terminates the stream.
    ///
    /// [`SqlError::NoMoreRows`]: crate::SqlError::NoMoreRows
    fn next(&mut self) -> SqlResult<Row>;

    /// Releases underlying resources. Idempotent.
    fn close(&mut self);
}

impl std::fmt::Debug for dyn RowReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn RowReader").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_selectors() {
        let mut row = Row::new();
        row.insert(encode_selector("db1", "t1", "id"), Value::Integer(7));

        assert_eq!(row.value("db1", "t1", "id"), Some(&Value::Integer(7)));
        assert_eq!(row.value("db1", "t1", "nope"), None);
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn test_row_merge() {
        let mut left = Row::new();
        left.insert("db1.a.x".to_string(), Value::Integer(1));
        let mut right = Row::new();
        right.insert("db1.b.y".to_string(), Value::Integer(2));

        left.merge(right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.get("db1.b.y"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_descriptor_selector() {
        let desc = ColumnDescriptor {
            database: "db1".to_string(),
            table: "t1".to_string(),
            column: "age".to_string(),
            ty: SqlType::Integer,
        };
        assert_eq!(desc.selector(), "db1.t1.age");
    }
}
