//! Statement parser.
//!
//! Recursive descent over the hand-written scanner in [`token`]. One
//! statement per call; a trailing semicolon is tolerated. All errors are
//! [`SqlError::Syntax`] carrying the byte offset of the offending token.

mod ast;
mod token;

pub use ast::{
    AggregateFunc, Aggregation, BinaryOp, ColumnDef, ColumnRef, Expr, JoinClause, OrderByItem,
    SelectItem, SelectStmt, Statement, TableExpr,
};
pub use token::{tokenize, AggregateToken, Lexeme, Token};

use crate::error::{SqlError, SqlResult};
use crate::value::Value;

/// Parses a single statement.
pub fn parse(sql: &str) -> SqlResult<Statement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: sql.len(),
    };
    let stmt = parser.statement()?;
    parser.accept(&Token::Semicolon);
    if let Some(lexeme) = parser.peek_lexeme() {
        return Err(SqlError::syntax(
            lexeme.offset,
            format!("unexpected trailing {:?}", lexeme.token),
        ));
    }
    Ok(stmt)
}

struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
    end: usize,
}

impl Parser {
    // =========================================================================
    // Statements
    // =========================================================================

    fn statement(&mut self) -> SqlResult<Statement> {
        match self.peek() {
            Some(Token::Create) => self.create_statement(),
            Some(Token::Use) => self.use_statement(),
            Some(Token::Upsert) | Some(Token::Insert) => self.upsert_statement(),
            Some(Token::Select) => {
                let select = self.select_statement()?;
                Ok(Statement::Select(Box::new(select)))
            }
            _ => Err(self.unexpected("a statement")),
        }
    }

    fn create_statement(&mut self) -> SqlResult<Statement> {
        self.expect(Token::Create)?;
        match self.peek() {
            Some(Token::Database) => {
                self.advance();
                Ok(Statement::CreateDatabase(self.ident()?))
            }
            Some(Token::Table) => {
                self.advance();
                self.create_table()
            }
            Some(Token::Index) => {
                self.advance();
                self.create_index()
            }
            _ => Err(self.unexpected("DATABASE, TABLE or INDEX")),
        }
    }

    fn use_statement(&mut self) -> SqlResult<Statement> {
        self.expect(Token::Use)?;
        self.expect(Token::Database)?;
        Ok(Statement::UseDatabase(self.ident()?))
    }

    fn create_table(&mut self) -> SqlResult<Statement> {
        let name = self.ident()?;
        self.expect(Token::LParen)?;

        let mut columns = Vec::new();
        let mut pk = None;
        loop {
            if self.accept(&Token::Primary) {
                self.expect(Token::Key)?;
                pk = Some(self.ident()?);
                // PRIMARY KEY closes the definition list
                self.expect(Token::RParen)?;
                break;
            }
            let col_name = self.ident()?;
            let ty = self.type_name()?;
            columns.push(ColumnDef { name: col_name, ty });
            if !self.accept(&Token::Comma) {
                self.expect(Token::RParen)?;
                break;
            }
        }

        let pk = pk.ok_or_else(|| self.unexpected("PRIMARY KEY declaration"))?;
        Ok(Statement::CreateTable { name, columns, pk })
    }

    fn create_index(&mut self) -> SqlResult<Statement> {
        self.expect(Token::On)?;
        let table = self.ident()?;
        self.expect(Token::LParen)?;
        let column = self.ident()?;
        self.expect(Token::RParen)?;
        Ok(Statement::CreateIndex { table, column })
    }

    fn upsert_statement(&mut self) -> SqlResult<Statement> {
        // INSERT INTO and UPSERT INTO share append semantics
        self.advance();
        self.expect(Token::Into)?;
        let table = self.ident()?;

        self.expect(Token::LParen)?;
        let mut columns = vec![self.ident()?];
        while self.accept(&Token::Comma) {
            columns.push(self.ident()?);
        }
        self.expect(Token::RParen)?;

        self.expect(Token::Values)?;
        self.expect(Token::LParen)?;
        let mut values = vec![self.expression()?];
        while self.accept(&Token::Comma) {
            values.push(self.expression()?);
        }
        self.expect(Token::RParen)?;

        Ok(Statement::Upsert {
            table,
            columns,
            values,
        })
    }

    // =========================================================================
    // SELECT
    // =========================================================================

    fn select_statement(&mut self) -> SqlResult<SelectStmt> {
        self.expect(Token::Select)?;

        let mut items = vec![self.select_item()?];
        while self.accept(&Token::Comma) {
            items.push(self.select_item()?);
        }

        self.expect(Token::From)?;
        let from = self.table_expr(true)?;

        let mut joins = Vec::new();
        while self.accept(&Token::Inner) {
            self.expect(Token::Join)?;
            let table = self.table_expr(false)?;
            self.expect(Token::On)?;
            let on = self.expression()?;
            joins.push(JoinClause { table, on });
        }

        let filter = if self.accept(&Token::Where) {
            Some(self.expression()?)
        } else {
            None
        };

        let mut group_by = Vec::new();
        if self.accept(&Token::Group) {
            self.expect(Token::By)?;
            group_by.push(self.column_ref()?);
            while self.accept(&Token::Comma) {
                group_by.push(self.column_ref()?);
            }
        }

        let having = if self.accept(&Token::Having) {
            Some(self.expression()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.accept(&Token::Order) {
            self.expect(Token::By)?;
            loop {
                let column = self.column_ref()?;
                let descending = if self.accept(&Token::Desc) {
                    true
                } else {
                    self.accept(&Token::Asc);
                    false
                };
                order_by.push(OrderByItem { column, descending });
                if !self.accept(&Token::Comma) {
                    break;
                }
            }
        }

        Ok(SelectStmt {
            items,
            from,
            joins,
            filter,
            group_by,
            having,
            order_by,
        })
    }

    fn select_item(&mut self) -> SqlResult<SelectItem> {
        if self.accept(&Token::Star) {
            return Ok(SelectItem::Star);
        }

        if let Some(Token::Aggregate(_)) = self.peek() {
            let agg = self.aggregation()?;
            let alias = self.optional_alias()?;
            return Ok(SelectItem::Aggregate { agg, alias });
        }

        let column = self.column_ref()?;
        let alias = self.optional_alias()?;
        Ok(SelectItem::Column { column, alias })
    }

    fn aggregation(&mut self) -> SqlResult<Aggregation> {
        let func = match self.advance() {
            Some(Token::Aggregate(agg)) => match agg {
                AggregateToken::Count => AggregateFunc::Count,
                AggregateToken::Sum => AggregateFunc::Sum,
                AggregateToken::Min => AggregateFunc::Min,
                AggregateToken::Max => AggregateFunc::Max,
                AggregateToken::Avg => AggregateFunc::Avg,
            },
            _ => return Err(self.unexpected("an aggregate function")),
        };

        self.expect(Token::LParen)?;
        let arg = if func == AggregateFunc::Count {
            self.expect(Token::Star)?;
            None
        } else {
            Some(self.column_ref()?)
        };
        self.expect(Token::RParen)?;

        Ok(Aggregation { func, arg })
    }

    fn optional_alias(&mut self) -> SqlResult<Option<String>> {
        if self.accept(&Token::As) {
            Ok(Some(self.ident()?))
        } else {
            Ok(None)
        }
    }

    fn table_expr(&mut self, allow_subquery: bool) -> SqlResult<TableExpr> {
        if self.accept(&Token::LParen) {
            if self.peek() == Some(&Token::Select) {
                if !allow_subquery {
                    return Err(self.unexpected("a table reference"));
                }
                let select = self.select_statement()?;
                self.expect(Token::RParen)?;
                let alias = self.optional_alias()?;
                return Ok(TableExpr::SubQuery {
                    select: Box::new(select),
                    alias,
                });
            }

            // Parenthesised rename: (table [AS alias]) [AS alias]
            let name = self.ident()?;
            let inner_alias = self.optional_alias()?;
            self.expect(Token::RParen)?;
            let outer_alias = self.optional_alias()?;
            return Ok(TableExpr::Table {
                name,
                alias: inner_alias,
                rename: outer_alias,
            });
        }

        let name = self.ident()?;
        let alias = self.optional_alias()?;
        Ok(TableExpr::Table {
            name,
            alias,
            rename: None,
        })
    }

    fn column_ref(&mut self) -> SqlResult<ColumnRef> {
        let first = self.ident()?;
        if self.accept(&Token::Dot) {
            let name = self.ident()?;
            Ok(ColumnRef::qualified(first, name))
        } else {
            Ok(ColumnRef::new(first))
        }
    }

    // =========================================================================
    // Expressions (precedence: OR < AND < NOT < comparison < +- < */)
    // =========================================================================

    fn expression(&mut self) -> SqlResult<Expr> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> SqlResult<Expr> {
        let mut left = self.and_expr()?;
        while self.accept(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> SqlResult<Expr> {
        let mut left = self.not_expr()?;
        while self.accept(&Token::And) {
            let right = self.not_expr()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> SqlResult<Expr> {
        if self.accept(&Token::Not) {
            let inner = self.not_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> SqlResult<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.additive()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn additive(&mut self) -> SqlResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn multiplicative(&mut self) -> SqlResult<Expr> {
        let mut left = self.primary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.primary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn primary(&mut self) -> SqlResult<Expr> {
        match self.peek() {
            Some(Token::IntLiteral(_)) => match self.advance() {
                Some(Token::IntLiteral(v)) => Ok(Expr::Literal(Value::Integer(v))),
                _ => unreachable!(),
            },
            Some(Token::StrLiteral(_)) => match self.advance() {
                Some(Token::StrLiteral(s)) => Ok(Expr::Literal(Value::String(s))),
                _ => unreachable!(),
            },
            Some(Token::BlobLiteral(_)) => match self.advance() {
                Some(Token::BlobLiteral(b)) => Ok(Expr::Literal(Value::Blob(b))),
                _ => unreachable!(),
            },
            Some(Token::BoolLiteral(_)) => match self.advance() {
                Some(Token::BoolLiteral(b)) => Ok(Expr::Literal(Value::Boolean(b))),
                _ => unreachable!(),
            },
            Some(Token::Null) => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Some(Token::Param(_)) => match self.advance() {
                Some(Token::Param(name)) => Ok(Expr::Param(name)),
                _ => unreachable!(),
            },
            Some(Token::Now) => {
                self.advance();
                self.expect(Token::LParen)?;
                self.expect(Token::RParen)?;
                Ok(Expr::Now)
            }
            Some(Token::Aggregate(_)) => {
                let agg = self.aggregation()?;
                Ok(Expr::Aggregate(agg))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(_)) => {
                let column = self.column_ref()?;
                Ok(Expr::Column(column))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn peek_lexeme(&self) -> Option<&Lexeme> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|l| l.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> SqlResult<()> {
        if self.accept(&token) {
            Ok(())
        } else {
            Err(self.unexpected(format!("{token:?}")))
        }
    }

    fn ident(&mut self) -> SqlResult<String> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.advance() {
                Some(Token::Ident(name)) => Ok(name),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn type_name(&mut self) -> SqlResult<crate::value::SqlType> {
        match self.peek() {
            Some(Token::TypeName(_)) => match self.advance() {
                Some(Token::TypeName(ty)) => Ok(ty),
                _ => unreachable!(),
            },
            _ => Err(self.unexpected("a type name")),
        }
    }

    fn unexpected(&self, wanted: impl AsRef<str>) -> SqlError {
        match self.peek_lexeme() {
            Some(lexeme) => SqlError::syntax(
                lexeme.offset,
                format!("expected {}, found {:?}", wanted.as_ref(), lexeme.token),
            ),
            None => SqlError::syntax(
                self.end,
                format!("expected {}, found end of input", wanted.as_ref()),
            ),
        }
    }
}
