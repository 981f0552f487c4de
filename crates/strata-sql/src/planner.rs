//! Query planning.
//!
//! Lowers a SELECT AST into a reader tree:
//!
//! ```text
//! scan/join -> filter (WHERE) -> [sort] -> group/aggregate -> filter
//!           (HAVING) -> [sort] -> projection
//! ```
//!
//! Name resolution happens here: every column reference is qualified
//! against the FROM scope, and HAVING's aggregate references are rewritten
//! into the aggregated output columns. Scan strategy is chosen per leading
//! table: an ORDER BY over a single indexed column of that table is pushed
//! down into an index (or primary-key) scan, eliding the materialized sort;
//! everything else scans in primary-key order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use strata_kv::KvStore;

use crate::catalog::{Database, Table};
use crate::error::{SqlError, SqlResult};
use crate::eval::StatementContext;
use crate::exec::{
    AggregateSpec, ColumnDescriptor, FilterReader, GroupReader, IndexScanReader, JoinReader,
    OutputColumn, ProjectionReader, ReaderFactory, RowReader, SortKey, SortReader,
    TableScanReader,
};
use crate::parser::{
    AggregateFunc, Aggregation, ColumnRef, Expr, SelectItem, SelectStmt, TableExpr,
};
use crate::value::SqlType;

/// Plans SELECT statements against one database snapshot.
pub(crate) struct Planner {
    store: Arc<dyn KvStore>,
    prefix: u8,
    database: Database,
    ctx: Arc<StatementContext>,
}

/// One FROM-position source during planning.
struct Source {
    kind: SourceKind,
    columns: Vec<ColumnDescriptor>,
    /// Aliases this source contributes for column qualification.
    aliases: HashSet<String>,
    /// Output re-label of a parenthesised rename.
    rename: Option<String>,
}

enum SourceKind {
    /// A base table: re-openable, scannable in any indexed order.
    Scan { table: Table, alias: String },
    /// A sub-query: a single-use reader.
    Reader(Box<dyn RowReader>),
}

impl Planner {
    pub fn new(
        store: Arc<dyn KvStore>,
        prefix: u8,
        database: Database,
        ctx: Arc<StatementContext>,
    ) -> Self {
        Self {
            store,
            prefix,
            database,
            ctx,
        }
    }

    /// Lowers a SELECT statement into its root reader.
    pub fn plan_select(&self, stmt: SelectStmt) -> SqlResult<Box<dyn RowReader>> {
        let SelectStmt {
            items,
            from,
            joins,
            filter,
            group_by,
            having,
            order_by,
        } = stmt;

        // FROM scope
        let mut sources = vec![self.build_source(from)?];
        let mut join_on = Vec::new();
        for join in joins {
            sources.push(self.build_source(join.table)?);
            join_on.push(join.on);
        }

        let scope = Scope {
            columns: sources
                .iter()
                .flat_map(|s| s.columns.iter().cloned())
                .collect(),
            leading: sources[0].columns.len(),
        };

        // Output re-labels, per qualification alias
        let mut output_tables: HashMap<String, String> = HashMap::new();
        for source in &sources {
            for alias in &source.aliases {
                let out = source.rename.clone().unwrap_or_else(|| alias.clone());
                output_tables.insert(alias.clone(), out);
            }
        }
        let first_output_table = source_output_table(&sources[0]);

        // Expand `*` into one item per column in scope
        let mut select_items = Vec::new();
        for item in items {
            match item {
                SelectItem::Star => {
                    for col in &scope.columns {
                        select_items.push(SelectItem::Column {
                            column: ColumnRef::qualified(col.table.clone(), col.column.clone()),
                            alias: None,
                        });
                    }
                }
                other => select_items.push(other),
            }
        }

        // ORDER BY keys resolve against the source scope
        let order_keys: Vec<(ColumnDescriptor, bool)> = order_by
            .iter()
            .map(|item| Ok((resolve_column(&scope, &item.column)?, item.descending)))
            .collect::<SqlResult<_>>()?;

        // Push a single-column ORDER BY into the leading table's scan when
        // that column is the primary key or carries an index.
        let mut pushed: Option<(String, bool)> = None;
        let mut scan_order: Option<(u32, bool)> = None;
        if let [(desc, descending)] = order_keys.as_slice() {
            if let SourceKind::Scan { table, alias } = &sources[0].kind {
                if &desc.table == alias {
                    if let Ok(col) = table.column_by_name(&desc.column) {
                        if table.is_indexed(col.id) {
                            scan_order = Some((col.id, *descending));
                            pushed = Some((desc.selector(), *descending));
                        }
                    }
                }
            }
        }
        debug!(
            sources = sources.len(),
            pushed_order = pushed.is_some(),
            "planning select"
        );

        // Base readers and left-deep joins
        let mut sources_iter = sources.into_iter();
        let head = sources_iter.next().expect("FROM always yields a source");
        let mut left_aliases = head.aliases.clone();
        let mut reader: Box<dyn RowReader> = match head.kind {
            SourceKind::Scan { table, alias } => self.build_scan(table, alias, scan_order),
            SourceKind::Reader(reader) => reader,
        };

        for (source, on) in sources_iter.zip(join_on) {
            let on = self.resolve_expr(on, &scope, None)?;
            let (table, alias) = match source.kind {
                SourceKind::Scan { table, alias } => (table, alias),
                // The grammar only admits base tables on a join's right side
                SourceKind::Reader(_) => {
                    return Err(SqlError::syntax(0, "sub-query in JOIN position"))
                }
            };

            let store = self.store.clone();
            let prefix = self.prefix;
            let db_id = self.database.id;
            let db_name = self.database.name.clone();
            let factory: ReaderFactory = Box::new(move || {
                Ok(Box::new(TableScanReader::new(
                    store.clone(),
                    prefix,
                    db_id,
                    db_name.clone(),
                    table.clone(),
                    alias.clone(),
                    false,
                )))
            });

            reader = Box::new(JoinReader::new(
                reader,
                factory,
                source.columns,
                on,
                self.ctx.clone(),
                left_aliases.clone(),
                source.aliases.clone(),
            ));
            left_aliases.extend(source.aliases);
        }

        // WHERE
        if let Some(filter) = filter {
            let resolved = self.resolve_expr(filter, &scope, None)?;
            reader = Box::new(FilterReader::new(reader, resolved, self.ctx.clone()));
        }

        // Grouping and aggregation
        let grouped = !group_by.is_empty()
            || having.is_some()
            || select_items
                .iter()
                .any(|item| matches!(item, SelectItem::Aggregate { .. }));

        let mut agg_specs: Vec<AggregateSpec> = Vec::new();
        if grouped {
            let group_descs: Vec<ColumnDescriptor> = group_by
                .iter()
                .map(|col| resolve_column(&scope, col))
                .collect::<SqlResult<_>>()?;
            let group_selectors: Vec<String> =
                group_descs.iter().map(ColumnDescriptor::selector).collect();

            let mut agg_outputs: Vec<(Aggregation, ColumnRef)> = Vec::new();
            for (pos, item) in select_items.iter().enumerate() {
                match item {
                    SelectItem::Column { column, .. } => {
                        let desc = resolve_column(&scope, column)?;
                        if !group_selectors.contains(&desc.selector()) {
                            return Err(SqlError::syntax(
                                0,
                                format!("selector '{}' must appear in GROUP BY", desc.column),
                            ));
                        }
                    }
                    SelectItem::Aggregate { agg, alias } => {
                        let resolved = self.resolve_aggregation(agg, &scope)?;
                        let (source, arg_ty) = match &resolved.arg {
                            Some(arg) => {
                                let desc = resolve_column(&scope, arg)?;
                                validate_aggregate_arg(resolved.func, desc.ty)?;
                                (Some(desc.selector()), desc.ty)
                            }
                            None => (None, SqlType::Integer),
                        };
                        let out_ty = match resolved.func {
                            AggregateFunc::Count | AggregateFunc::Sum | AggregateFunc::Avg => {
                                SqlType::Integer
                            }
                            AggregateFunc::Min | AggregateFunc::Max => arg_ty,
                        };
                        let name = alias.clone().unwrap_or_else(|| format!("col{pos}"));
                        let output = ColumnDescriptor {
                            database: self.database.name.clone(),
                            table: first_output_table.clone(),
                            column: name,
                            ty: out_ty,
                        };
                        agg_outputs.push((
                            resolved.clone(),
                            ColumnRef::qualified(output.table.clone(), output.column.clone()),
                        ));
                        agg_specs.push(AggregateSpec {
                            func: resolved.func,
                            source,
                            output,
                        });
                    }
                    SelectItem::Star => unreachable!("expanded above"),
                }
            }

            // The group reader needs its input sorted by the group keys
            if group_selectors.is_empty() {
                pushed = None;
            } else {
                let sorted_already = group_selectors.len() == 1
                    && pushed
                        .as_ref()
                        .is_some_and(|(sel, _)| sel == &group_selectors[0]);
                if !sorted_already {
                    let keys = group_selectors
                        .iter()
                        .map(|sel| SortKey {
                            selector: sel.clone(),
                            descending: false,
                        })
                        .collect();
                    reader = Box::new(SortReader::new(reader, keys));
                    pushed = match group_selectors.as_slice() {
                        [only] => Some((only.clone(), false)),
                        _ => None,
                    };
                }
            }

            reader = Box::new(GroupReader::new(
                reader,
                group_selectors,
                agg_specs.clone(),
            ));

            if let Some(having) = having {
                let resolved = self.resolve_expr(having, &scope, Some(&agg_outputs))?;
                reader = Box::new(FilterReader::new(reader, resolved, self.ctx.clone()));
            }
        }

        // Materialized ORDER BY, unless the scan already delivers it
        if !order_keys.is_empty() {
            let satisfied = order_keys.len() == 1
                && pushed
                    .as_ref()
                    .is_some_and(|(sel, desc)| {
                        sel == &order_keys[0].0.selector() && *desc == order_keys[0].1
                    });
            if !satisfied {
                let keys = order_keys
                    .iter()
                    .map(|(desc, descending)| SortKey {
                        selector: desc.selector(),
                        descending: *descending,
                    })
                    .collect();
                reader = Box::new(SortReader::new(reader, keys));
            }
        }

        // Projection
        let mut outputs = Vec::with_capacity(select_items.len());
        for (pos, item) in select_items.iter().enumerate() {
            match item {
                SelectItem::Column { column, alias } => {
                    let desc = resolve_column(&scope, column)?;
                    let out_table = output_tables
                        .get(&desc.table)
                        .cloned()
                        .unwrap_or_else(|| desc.table.clone());
                    outputs.push(OutputColumn {
                        source: desc.selector(),
                        descriptor: ColumnDescriptor {
                            database: desc.database.clone(),
                            table: out_table,
                            column: alias.clone().unwrap_or_else(|| desc.column.clone()),
                            ty: desc.ty,
                        },
                    });
                }
                SelectItem::Aggregate { alias, .. } => {
                    let name = alias.clone().unwrap_or_else(|| format!("col{pos}"));
                    let spec = agg_specs
                        .iter()
                        .find(|s| s.output.column == name)
                        .ok_or(SqlError::ColumnDoesNotExist)?;
                    outputs.push(OutputColumn {
                        source: spec.output.selector(),
                        descriptor: spec.output.clone(),
                    });
                }
                SelectItem::Star => unreachable!("expanded above"),
            }
        }

        Ok(Box::new(ProjectionReader::new(reader, outputs)))
    }

    fn build_source(&self, expr: TableExpr) -> SqlResult<Source> {
        match expr {
            TableExpr::Table {
                name,
                alias,
                rename,
            } => {
                let table = self.database.table_by_name(&name)?.clone();
                let alias = alias.unwrap_or_else(|| name.clone());
                let columns = table
                    .columns
                    .iter()
                    .map(|col| ColumnDescriptor {
                        database: self.database.name.clone(),
                        table: alias.clone(),
                        column: col.name.clone(),
                        ty: col.ty,
                    })
                    .collect();
                let aliases = HashSet::from([alias.clone()]);
                Ok(Source {
                    kind: SourceKind::Scan { table, alias },
                    columns,
                    aliases,
                    rename,
                })
            }
            TableExpr::SubQuery { select, alias } => {
                let mut reader = self.plan_select(*select)?;
                let mut columns = reader.columns();
                if let Some(alias) = alias {
                    // The alias hides every inner table alias from the
                    // outer query.
                    let outputs = columns
                        .iter()
                        .map(|col| OutputColumn {
                            source: col.selector(),
                            descriptor: ColumnDescriptor {
                                database: col.database.clone(),
                                table: alias.clone(),
                                column: col.column.clone(),
                                ty: col.ty,
                            },
                        })
                        .collect();
                    reader = Box::new(ProjectionReader::new(reader, outputs));
                    columns = reader.columns();
                }
                let aliases = columns.iter().map(|col| col.table.clone()).collect();
                Ok(Source {
                    kind: SourceKind::Reader(reader),
                    columns,
                    aliases,
                    rename: None,
                })
            }
        }
    }

    fn build_scan(
        &self,
        table: Table,
        alias: String,
        scan_order: Option<(u32, bool)>,
    ) -> Box<dyn RowReader> {
        match scan_order {
            Some((col_id, descending)) if col_id != table.pk_col_id => {
                Box::new(IndexScanReader::new(
                    self.store.clone(),
                    self.prefix,
                    self.database.id,
                    self.database.name.clone(),
                    table,
                    col_id,
                    alias,
                    descending,
                ))
            }
            Some((_, descending)) => Box::new(TableScanReader::new(
                self.store.clone(),
                self.prefix,
                self.database.id,
                self.database.name.clone(),
                table,
                alias,
                descending,
            )),
            None => Box::new(TableScanReader::new(
                self.store.clone(),
                self.prefix,
                self.database.id,
                self.database.name.clone(),
                table,
                alias,
                false,
            )),
        }
    }

    /// Qualifies every column reference in an expression; in HAVING
    /// position (`agg_outputs` given) aggregate references are rewritten to
    /// their aggregated output columns.
    fn resolve_expr(
        &self,
        expr: Expr,
        scope: &Scope,
        agg_outputs: Option<&[(Aggregation, ColumnRef)]>,
    ) -> SqlResult<Expr> {
        Ok(match expr {
            Expr::Column(col) => {
                let desc = resolve_column(scope, &col)?;
                Expr::Column(ColumnRef::qualified(desc.table, desc.column))
            }
            Expr::Aggregate(agg) => {
                let outputs = agg_outputs.ok_or_else(|| {
                    SqlError::syntax(0, "aggregation is only allowed in the select list and HAVING")
                })?;
                let resolved = self.resolve_aggregation(&agg, scope)?;
                let output = outputs
                    .iter()
                    .find(|(candidate, _)| candidate == &resolved)
                    .map(|(_, col)| col.clone())
                    .ok_or(SqlError::ColumnDoesNotExist)?;
                Expr::Column(output)
            }
            Expr::Not(inner) => Expr::Not(Box::new(self.resolve_expr(
                *inner,
                scope,
                agg_outputs,
            )?)),
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.resolve_expr(*left, scope, agg_outputs)?),
                right: Box::new(self.resolve_expr(*right, scope, agg_outputs)?),
            },
            other @ (Expr::Literal(_) | Expr::Param(_) | Expr::Now) => other,
        })
    }

    fn resolve_aggregation(
        &self,
        agg: &Aggregation,
        scope: &Scope,
    ) -> SqlResult<Aggregation> {
        let arg = match &agg.arg {
            Some(col) => {
                let desc = resolve_column(scope, col)?;
                Some(ColumnRef::qualified(desc.table, desc.column))
            }
            None => None,
        };
        Ok(Aggregation {
            func: agg.func,
            arg,
        })
    }
}

fn source_output_table(source: &Source) -> String {
    if let Some(rename) = &source.rename {
        return rename.clone();
    }
    match &source.kind {
        SourceKind::Scan { alias, .. } => alias.clone(),
        SourceKind::Reader(_) => source
            .columns
            .first()
            .map(|col| col.table.clone())
            .unwrap_or_default(),
    }
}

/// The columns visible to a statement, with the boundary of the leading
/// FROM source.
struct Scope {
    columns: Vec<ColumnDescriptor>,
    /// Number of columns contributed by the leading source.
    leading: usize,
}

/// Resolves a column reference against the columns in scope.
///
/// Unqualified names bind to the leading table when it declares them;
/// otherwise they must match exactly one joined column, several matches
/// being an [`SqlError::AmbiguousSelector`].
fn resolve_column(scope: &Scope, col: &ColumnRef) -> SqlResult<ColumnDescriptor> {
    match &col.table {
        Some(table) => scope
            .columns
            .iter()
            .find(|c| &c.table == table && c.column == col.name)
            .cloned()
            .ok_or(SqlError::ColumnDoesNotExist),
        None => {
            if let Some(desc) = scope.columns[..scope.leading]
                .iter()
                .find(|c| c.column == col.name)
            {
                return Ok(desc.clone());
            }
            let mut matches = scope.columns[scope.leading..]
                .iter()
                .filter(|c| c.column == col.name);
            let first = matches.next().ok_or(SqlError::ColumnDoesNotExist)?;
            if matches.next().is_some() {
                return Err(SqlError::AmbiguousSelector);
            }
            Ok(first.clone())
        }
    }
}

fn validate_aggregate_arg(func: AggregateFunc, ty: SqlType) -> SqlResult<()> {
    match func {
        AggregateFunc::Sum | AggregateFunc::Avg => {
            if ty != SqlType::Integer {
                return Err(SqlError::InvalidValue);
            }
        }
        AggregateFunc::Min | AggregateFunc::Max => {
            if !ty.is_ordered() {
                return Err(SqlError::InvalidValue);
            }
        }
        AggregateFunc::Count => {}
    }
    Ok(())
}
