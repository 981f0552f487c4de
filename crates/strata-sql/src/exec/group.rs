//! Grouping and aggregation.
//!
//! The reader requires its child to arrive sorted by the group keys (the
//! planner arranges that through an index scan or a materialized sort), so
//! a group is complete as soon as the key changes. One accumulator set
//! lives per open group; finished groups are emitted as single rows.

use crate::error::{SqlError, SqlResult};
use crate::exec::{ColumnDescriptor, Row, RowReader};
use crate::parser::AggregateFunc;
use crate::value::Value;

/// One aggregate computed by a [`GroupReader`].
#[derive(Debug, Clone)]
pub(crate) struct AggregateSpec {
    /// The function.
    pub func: AggregateFunc,
    /// Selector of the argument column; `None` for COUNT(*).
    pub source: Option<String>,
    /// Descriptor of the aggregated output column.
    pub output: ColumnDescriptor,
}

/// SUM and AVG use wrapping unsigned arithmetic; overflow is not detected.
#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    sum: u64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Accumulator {
    fn update(&mut self, spec: &AggregateSpec, row: &Row) -> SqlResult<()> {
        let value = match &spec.source {
            None => {
                // COUNT(*) counts rows, not values
                self.count += 1;
                return Ok(());
            }
            Some(selector) => row.get(selector).cloned().unwrap_or(Value::Null),
        };
        if value.is_null() {
            return Ok(());
        }

        match spec.func {
            AggregateFunc::Count => self.count += 1,
            AggregateFunc::Sum | AggregateFunc::Avg => match value {
                Value::Integer(v) => {
                    self.sum = self.sum.wrapping_add(v);
                    self.count += 1;
                }
                _ => return Err(SqlError::InvalidValue),
            },
            AggregateFunc::Min => {
                let replace = match &self.min {
                    Some(current) => value.sort_cmp(current).is_lt(),
                    None => true,
                };
                if replace {
                    self.min = Some(value);
                }
            }
            AggregateFunc::Max => {
                let replace = match &self.max {
                    Some(current) => value.sort_cmp(current).is_gt(),
                    None => true,
                };
                if replace {
                    self.max = Some(value);
                }
            }
        }
        Ok(())
    }

    fn finish(&self, func: AggregateFunc) -> Value {
        match func {
            AggregateFunc::Count => Value::Integer(self.count),
            AggregateFunc::Sum => Value::Integer(self.sum),
            AggregateFunc::Min => self.min.clone().unwrap_or(Value::Null),
            AggregateFunc::Max => self.max.clone().unwrap_or(Value::Null),
            AggregateFunc::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Integer(self.sum / self.count)
                }
            }
        }
    }
}

struct OpenGroup {
    key: Vec<Value>,
    representative: Row,
    accumulators: Vec<Accumulator>,
}

fn accumulate(specs: &[AggregateSpec], group: &mut OpenGroup, row: &Row) -> SqlResult<()> {
    for (spec, acc) in specs.iter().zip(group.accumulators.iter_mut()) {
        acc.update(spec, row)?;
    }
    Ok(())
}

/// Aggregates sorted input into one row per group.
pub(crate) struct GroupReader {
    child: Box<dyn RowReader>,
    group_selectors: Vec<String>,
    aggregates: Vec<AggregateSpec>,
    current: Option<OpenGroup>,
    emitted: bool,
    done: bool,
}

impl GroupReader {
    pub fn new(
        child: Box<dyn RowReader>,
        group_selectors: Vec<String>,
        aggregates: Vec<AggregateSpec>,
    ) -> Self {
        Self {
            child,
            group_selectors,
            aggregates,
            current: None,
            emitted: false,
            done: false,
        }
    }

    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.group_selectors
            .iter()
            .map(|sel| row.get(sel).cloned().unwrap_or(Value::Null))
            .collect()
    }

    fn open_group(&self, key: Vec<Value>, row: Row) -> SqlResult<OpenGroup> {
        let mut group = OpenGroup {
            key,
            representative: Row::new(),
            accumulators: self
                .aggregates
                .iter()
                .map(|_| Accumulator::default())
                .collect(),
        };
        accumulate(&self.aggregates, &mut group, &row)?;
        group.representative = row;
        Ok(group)
    }

    fn finalize(&self, group: OpenGroup) -> Row {
        let mut out = Row::new();
        for selector in &self.group_selectors {
            let value = group
                .representative
                .get(selector)
                .cloned()
                .unwrap_or(Value::Null);
            out.insert(selector.clone(), value);
        }
        for (spec, acc) in self.aggregates.iter().zip(group.accumulators.iter()) {
            out.insert(spec.output.selector(), acc.finish(spec.func));
        }
        out
    }
}

impl RowReader for GroupReader {
    fn columns(&self) -> Vec<ColumnDescriptor> {
        let child_columns = self.child.columns();
        let mut columns: Vec<ColumnDescriptor> = self
            .group_selectors
            .iter()
            .filter_map(|sel| child_columns.iter().find(|c| &c.selector() == sel).cloned())
            .collect();
        columns.extend(self.aggregates.iter().map(|a| a.output.clone()));
        columns
    }

    fn next(&mut self) -> SqlResult<Row> {
        if self.done {
            return Err(SqlError::NoMoreRows);
        }

        loop {
            match self.child.next() {
                Ok(row) => {
                    let key = self.key_of(&row);
                    let same_group = self
                        .current
                        .as_ref()
                        .is_some_and(|group| group.key == key);
                    if same_group {
                        let group = self.current.as_mut().expect("group checked above");
                        accumulate(&self.aggregates, group, &row)?;
                    } else if let Some(finished) = self.current.take() {
                        self.current = Some(self.open_group(key, row)?);
                        self.emitted = true;
                        return Ok(self.finalize(finished));
                    } else {
                        self.current = Some(self.open_group(key, row)?);
                    }
                }
                Err(SqlError::NoMoreRows) => {
                    self.done = true;
                    if let Some(group) = self.current.take() {
                        self.emitted = true;
                        return Ok(self.finalize(group));
                    }
                    // Aggregation without GROUP BY yields one row even over
                    // empty input.
                    if self.group_selectors.is_empty() && !self.emitted {
                        self.emitted = true;
                        let empty = OpenGroup {
                            key: Vec::new(),
                            representative: Row::new(),
                            accumulators: self
                                .aggregates
                                .iter()
                                .map(|_| Accumulator::default())
                                .collect(),
                        };
                        return Ok(self.finalize(empty));
                    }
                    return Err(SqlError::NoMoreRows);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn close(&mut self) {
        self.child.close();
        self.current = None;
        self.done = true;
    }
}
