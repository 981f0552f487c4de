//! Row selection.

use std::sync::Arc;

use crate::error::SqlResult;
use crate::eval::{eval, StatementContext};
use crate::exec::{ColumnDescriptor, Row, RowReader};
use crate::parser::Expr;

/// Drops rows whose predicate does not evaluate to true.
pub(crate) struct FilterReader {
    child: Box<dyn RowReader>,
    predicate: Expr,
    ctx: Arc<StatementContext>,
}

impl FilterReader {
    pub fn new(child: Box<dyn RowReader>, predicate: Expr, ctx: Arc<StatementContext>) -> Self {
        Self {
            child,
            predicate,
            ctx,
        }
    }
}

impl RowReader for FilterReader {
    fn columns(&self) -> Vec<ColumnDescriptor> {
        self.child.columns()
    }

    fn next(&mut self) -> SqlResult<Row> {
        loop {
            let row = self.child.next()?;
            let verdict = eval(&self.predicate, &row, &self.ctx.eval_ctx())?;
            if verdict.as_condition()? {
                return Ok(row);
            }
        }
    }

    fn close(&mut self) {
        self.child.close();
    }
}
