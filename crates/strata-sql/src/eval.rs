//! Scalar expression evaluation.
//!
//! Expressions are evaluated against one row plus the statement context:
//! the caller-supplied parameter map and the statement's NOW() instant.
//! Column references reaching this module have already been qualified by
//! the planner, so a lookup is a single selector probe.

use std::collections::HashMap;

use crate::encoding::encode_selector;
use crate::error::{SqlError, SqlResult};
use crate::exec::Row;
use crate::parser::{BinaryOp, Expr};
use crate::value::Value;

/// Per-statement evaluation context.
pub struct EvalContext<'a> {
    /// Database qualifying every resolved column reference.
    pub database: &'a str,
    /// Caller-supplied named parameters.
    pub params: &'a HashMap<String, Value>,
    /// NOW() instant, fixed once per statement (Unix nanoseconds).
    pub now: u64,
}

impl EvalContext<'_> {
    /// Resolves a named parameter.
    pub fn param(&self, name: &str) -> SqlResult<Value> {
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| SqlError::UnresolvedParameter(name.to_string()))
    }
}

/// Owned statement state shared by the readers of one query.
pub(crate) struct StatementContext {
    /// Implicit database of the statement.
    pub database: String,
    /// Caller-supplied named parameters.
    pub params: HashMap<String, Value>,
    /// NOW() instant, fixed when the statement started.
    pub now: u64,
}

impl StatementContext {
    /// Borrows an evaluation context.
    pub fn eval_ctx(&self) -> EvalContext<'_> {
        EvalContext {
            database: &self.database,
            params: &self.params,
            now: self.now,
        }
    }
}

/// Evaluates an expression against a row.
pub fn eval(expr: &Expr, row: &Row, ctx: &EvalContext) -> SqlResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Param(name) => ctx.param(name),
        Expr::Now => Ok(Value::Integer(ctx.now)),
        Expr::Column(col) => {
            let table = col.table.as_deref().unwrap_or_default();
            let selector = encode_selector(ctx.database, table, &col.name);
            Ok(row.get(&selector).cloned().unwrap_or(Value::Null))
        }
        // Aggregates are rewritten to column references by the planner; one
        // surviving here sits in a context where aggregation is meaningless.
        Expr::Aggregate(_) => Err(SqlError::InvalidValue),
        Expr::Not(inner) => match eval(inner, row, ctx)? {
            Value::Null => Ok(Value::Null),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            _ => Err(SqlError::InvalidValue),
        },
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, row, ctx),
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    row: &Row,
    ctx: &EvalContext,
) -> SqlResult<Value> {
    // AND/OR short-circuit on the left operand
    match op {
        BinaryOp::And => {
            if !eval(left, row, ctx)?.as_condition()? {
                return Ok(Value::Boolean(false));
            }
            return Ok(Value::Boolean(eval(right, row, ctx)?.as_condition()?));
        }
        BinaryOp::Or => {
            if eval(left, row, ctx)?.as_condition()? {
                return Ok(Value::Boolean(true));
            }
            return Ok(Value::Boolean(eval(right, row, ctx)?.as_condition()?));
        }
        _ => {}
    }

    let lhs = eval(left, row, ctx)?;
    let rhs = eval(right, row, ctx)?;

    match op {
        BinaryOp::Eq => Ok(Value::Boolean(lhs.sql_eq(&rhs)?)),
        BinaryOp::Ne => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(Value::Boolean(false));
            }
            Ok(Value::Boolean(!lhs.sql_eq(&rhs)?))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = match lhs.sql_cmp(&rhs)? {
                Some(ord) => ord,
                None => return Ok(Value::Boolean(false)),
            };
            let holds = match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                BinaryOp::Ge => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Boolean(holds))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> SqlResult<Value> {
    let (a, b) = match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
        (Value::Integer(a), Value::Integer(b)) => (a, b),
        _ => return Err(SqlError::InvalidValue),
    };
    let result = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(SqlError::InvalidValue);
            }
            a / b
        }
        _ => unreachable!(),
    };
    Ok(Value::Integer(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, SelectStmt, Statement};

    fn filter_of(sql: &str) -> Expr {
        match parse(sql).unwrap() {
            Statement::Select(select) => {
                let SelectStmt { filter, .. } = *select;
                filter.unwrap()
            }
            other => panic!("expected SELECT, got {other:?}"),
        }
    }

    fn ctx<'a>(params: &'a HashMap<String, Value>) -> EvalContext<'a> {
        EvalContext {
            database: "db1",
            params,
            now: 1_000,
        }
    }

    fn eval_filter(sql: &str, row: &Row, params: &HashMap<String, Value>) -> SqlResult<Value> {
        let expr = filter_of(sql);
        eval(&expr, row, &ctx(params))
    }

    fn qualified_row() -> Row {
        let mut row = Row::new();
        row.insert("db1.t.id".to_string(), Value::Integer(5));
        row.insert("db1.t.active".to_string(), Value::Boolean(true));
        row.insert("db1.t.title".to_string(), Value::String("abc".to_string()));
        row
    }

    #[test]
    fn test_literal_comparisons() {
        let row = Row::new();
        let params = HashMap::new();

        let v = eval_filter("SELECT a FROM t WHERE 1 < 2", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(true));

        let v = eval_filter("SELECT a FROM t WHERE 1 >= 2", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(false));

        let v = eval_filter("SELECT a FROM t WHERE false OR true", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(true));
    }

    #[test]
    fn test_incompatible_comparison() {
        let row = Row::new();
        let params = HashMap::new();
        assert!(matches!(
            eval_filter("SELECT a FROM t WHERE 1 = true", &row, &params),
            Err(SqlError::NotComparableValues)
        ));
    }

    #[test]
    fn test_column_lookup() {
        let row = qualified_row();
        let params = HashMap::new();
        let v = eval_filter("SELECT a FROM x WHERE t.id > 4", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(true));
    }

    #[test]
    fn test_absent_column_filters_out() {
        let row = qualified_row();
        let params = HashMap::new();
        // Unknown column evaluates to NULL, and NULL compares false
        let v = eval_filter("SELECT a FROM x WHERE t.missing = 1", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(false));
        let v = eval_filter("SELECT a FROM x WHERE t.missing <> 1", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(false));
    }

    #[test]
    fn test_not_semantics() {
        let row = qualified_row();
        let params = HashMap::new();

        let v = eval_filter("SELECT a FROM x WHERE NOT t.active", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(false));

        // NOT of an absent value stays absent
        let v = eval_filter("SELECT a FROM x WHERE NOT t.missing", &row, &params).unwrap();
        assert_eq!(v, Value::Null);

        assert!(matches!(
            eval_filter("SELECT a FROM x WHERE NOT t.id", &row, &params),
            Err(SqlError::InvalidValue)
        ));
    }

    #[test]
    fn test_params() {
        let row = qualified_row();
        let mut params = HashMap::new();
        params.insert("lim".to_string(), Value::Integer(4));

        let v = eval_filter("SELECT a FROM x WHERE t.id > @lim", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(true));

        assert!(matches!(
            eval_filter("SELECT a FROM x WHERE t.id > @missing", &row, &params),
            Err(SqlError::UnresolvedParameter(_))
        ));
    }

    #[test]
    fn test_now_constant() {
        let row = Row::new();
        let params = HashMap::new();
        let v = eval_filter("SELECT a FROM t WHERE NOW() = NOW()", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(true));
    }

    #[test]
    fn test_arithmetic() {
        let row = qualified_row();
        let params = HashMap::new();

        let v = eval_filter("SELECT a FROM x WHERE t.id + 1 = 6", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(true));

        let v = eval_filter("SELECT a FROM x WHERE t.id * 2 = 10", &row, &params).unwrap();
        assert_eq!(v, Value::Boolean(true));

        assert!(matches!(
            eval_filter("SELECT a FROM x WHERE t.id / 0 = 1", &row, &params),
            Err(SqlError::InvalidValue)
        ));
    }

    #[test]
    fn test_short_circuit() {
        let row = qualified_row();
        let params = HashMap::new();

        // The right side would fail with UnresolvedParameter; AND must not
        // reach it once the left side is false.
        let v = eval_filter(
            "SELECT a FROM x WHERE false AND t.id > @missing",
            &row,
            &params,
        )
        .unwrap();
        assert_eq!(v, Value::Boolean(false));

        let v = eval_filter(
            "SELECT a FROM x WHERE true OR t.id > @missing",
            &row,
            &params,
        )
        .unwrap();
        assert_eq!(v, Value::Boolean(true));
    }
}
