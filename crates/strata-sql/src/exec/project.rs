//! Output projection and selector renaming.

use crate::error::SqlResult;
use crate::exec::{ColumnDescriptor, Row, RowReader};
use crate::value::Value;

/// One projected output column: where it comes from and how it is exposed.
#[derive(Debug, Clone)]
pub(crate) struct OutputColumn {
    /// Selector to read from the input row.
    pub source: String,
    /// Descriptor (and thus selector) of the output column.
    pub descriptor: ColumnDescriptor,
}

/// Maps input rows to the query's output shape.
///
/// Doubles as the renaming step around sub-queries: renaming is a
/// projection whose outputs mirror the inputs under a new table alias.
pub(crate) struct ProjectionReader {
    child: Box<dyn RowReader>,
    outputs: Vec<OutputColumn>,
}

impl ProjectionReader {
    pub fn new(child: Box<dyn RowReader>, outputs: Vec<OutputColumn>) -> Self {
        Self { child, outputs }
    }
}

impl RowReader for ProjectionReader {
    fn columns(&self) -> Vec<ColumnDescriptor> {
        self.outputs.iter().map(|o| o.descriptor.clone()).collect()
    }

    fn next(&mut self) -> SqlResult<Row> {
        let input = self.child.next()?;
        let mut output = Row::new();
        for out in &self.outputs {
            let value = input.get(&out.source).cloned().unwrap_or(Value::Null);
            output.insert(out.descriptor.selector(), value);
        }
        Ok(output)
    }

    fn close(&mut self) {
        self.child.close();
    }
}
