//! Nested-loop INNER JOIN.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{SqlError, SqlResult};
use crate::eval::{eval, StatementContext};
use crate::exec::{ColumnDescriptor, Row, RowReader};
use crate::parser::Expr;

/// Factory re-opening the right side once per left row.
pub(crate) type ReaderFactory = Box<dyn Fn() -> SqlResult<Box<dyn RowReader>> + Send>;

/// Nested-loop join: for every left row the right side is scanned afresh
/// and the ON predicate decides which combined rows survive.
///
/// The ON clause is validated on the first pull: it must reference at least
/// one column from each side, otherwise the join can never correlate the
/// two streams and `JointColumnNotFound` is surfaced.
pub(crate) struct JoinReader {
    left: Box<dyn RowReader>,
    right_factory: ReaderFactory,
    right_columns: Vec<ColumnDescriptor>,
    on: Expr,
    ctx: Arc<StatementContext>,
    left_aliases: HashSet<String>,
    right_aliases: HashSet<String>,
    current_left: Option<Row>,
    current_right: Option<Box<dyn RowReader>>,
    validated: bool,
    closed: bool,
}

impl JoinReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Box<dyn RowReader>,
        right_factory: ReaderFactory,
        right_columns: Vec<ColumnDescriptor>,
        on: Expr,
        ctx: Arc<StatementContext>,
        left_aliases: HashSet<String>,
        right_aliases: HashSet<String>,
    ) -> Self {
        Self {
            left,
            right_factory,
            right_columns,
            on,
            ctx,
            left_aliases,
            right_aliases,
            current_left: None,
            current_right: None,
            validated: false,
            closed: false,
        }
    }

    fn validate_on(&self) -> SqlResult<()> {
        let mut has_left = false;
        let mut has_right = false;
        self.on.visit_columns(&mut |col| {
            if let Some(table) = &col.table {
                has_left |= self.left_aliases.contains(table);
                has_right |= self.right_aliases.contains(table);
            }
        });
        if has_left && has_right {
            Ok(())
        } else {
            Err(SqlError::JointColumnNotFound)
        }
    }
}

impl RowReader for JoinReader {
    fn columns(&self) -> Vec<ColumnDescriptor> {
        let mut columns = self.left.columns();
        columns.extend(self.right_columns.iter().cloned());
        columns
    }

    fn next(&mut self) -> SqlResult<Row> {
        if self.closed {
            return Err(SqlError::NoMoreRows);
        }
        if !self.validated {
            self.validate_on()?;
            self.validated = true;
        }

        loop {
            if self.current_left.is_none() {
                self.current_left = Some(self.left.next()?);
                self.current_right = Some((self.right_factory)()?);
            }

            let right = self.current_right.as_mut().expect("right side opened");
            match right.next() {
                Ok(right_row) => {
                    let mut combined = self.current_left.clone().expect("left row present");
                    combined.merge(right_row);
                    let verdict = eval(&self.on, &combined, &self.ctx.eval_ctx())?;
                    if verdict.as_condition()? {
                        return Ok(combined);
                    }
                }
                Err(SqlError::NoMoreRows) => {
                    if let Some(mut right) = self.current_right.take() {
                        right.close();
                    }
                    self.current_left = None;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut right) = self.current_right.take() {
            right.close();
        }
        self.left.close();
        self.closed = true;
    }
}
