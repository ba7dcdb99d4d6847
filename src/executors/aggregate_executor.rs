use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;

use super::Executor;
use crate::error::DbError;
use crate::query::expr::Expr;
use crate::query::predicate::order_values;
use crate::tuple::schema::{Column, Schema, TypeId};
use crate::tuple::value::Value;
use crate::tuple::Tuple;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        };
        Some(f)
    }
}

/// One partial aggregate. `fresh` clones the state back to its initial
/// value, which is how the executor stamps out per-group copies from the
/// configured template.
pub trait AggregateState {
    fn add(&mut self, tuple: &Tuple) -> Result<()>;
    fn finalize(&self) -> Result<Value>;
    fn output_column(&self) -> Column;
    fn fresh(&self) -> Box<dyn AggregateState>;
}

/// Builds the state for one aggregate call. Sum and avg require an integer
/// argument; count, min and max take any type.
pub fn build_state(
    function: AggregateFunction,
    alias: String,
    expr: Expr,
) -> Result<Box<dyn AggregateState>> {
    match function {
        AggregateFunction::Sum | AggregateFunction::Avg => {
            if expr.output_type() != TypeId::Integer {
                return Err(DbError::IncompatibleTypes(format!(
                    "{:?} needs an integer argument, got {}",
                    function,
                    expr.output_type()
                ))
                .into());
            }
        }
        AggregateFunction::Count | AggregateFunction::Min | AggregateFunction::Max => {}
    }

    let state: Box<dyn AggregateState> = match function {
        AggregateFunction::Count => Box::new(CountState {
            alias,
            count: 0,
        }),
        AggregateFunction::Sum => Box::new(SumState {
            alias,
            expr,
            sum: 0,
        }),
        AggregateFunction::Avg => Box::new(AvgState {
            alias,
            expr,
            sum: 0,
            count: 0,
        }),
        AggregateFunction::Min => Box::new(ExtremeState {
            alias,
            expr,
            keep: Ordering::Less,
            best: None,
        }),
        AggregateFunction::Max => Box::new(ExtremeState {
            alias,
            expr,
            keep: Ordering::Greater,
            best: None,
        }),
    };
    Ok(state)
}

struct CountState {
    alias: String,
    count: i64,
}

impl AggregateState for CountState {
    fn add(&mut self, _tuple: &Tuple) -> Result<()> {
        self.count += 1;
        Ok(())
    }

    fn finalize(&self) -> Result<Value> {
        Ok(Value::Integer(self.count))
    }

    fn output_column(&self) -> Column {
        Column::new(self.alias.clone(), "", TypeId::Integer)
    }

    fn fresh(&self) -> Box<dyn AggregateState> {
        Box::new(CountState {
            alias: self.alias.clone(),
            count: 0,
        })
    }
}

struct SumState {
    alias: String,
    expr: Expr,
    sum: i64,
}

impl AggregateState for SumState {
    fn add(&mut self, tuple: &Tuple) -> Result<()> {
        self.sum = self.sum.wrapping_add(self.expr.evaluate(tuple)?.as_i64());
        Ok(())
    }

    fn finalize(&self) -> Result<Value> {
        Ok(Value::Integer(self.sum))
    }

    fn output_column(&self) -> Column {
        Column::new(self.alias.clone(), "", TypeId::Integer)
    }

    fn fresh(&self) -> Box<dyn AggregateState> {
        Box::new(SumState {
            alias: self.alias.clone(),
            expr: self.expr.clone(),
            sum: 0,
        })
    }
}

struct AvgState {
    alias: String,
    expr: Expr,
    sum: i64,
    count: i64,
}

impl AggregateState for AvgState {
    fn add(&mut self, tuple: &Tuple) -> Result<()> {
        self.sum = self.sum.wrapping_add(self.expr.evaluate(tuple)?.as_i64());
        self.count += 1;
        Ok(())
    }

    fn finalize(&self) -> Result<Value> {
        if self.count == 0 {
            return Ok(Value::Integer(0));
        }
        // floor division; count is positive, so div_euclid rounds down even
        // for negative sums
        Ok(Value::Integer(self.sum.div_euclid(self.count)))
    }

    fn output_column(&self) -> Column {
        Column::new(self.alias.clone(), "", TypeId::Integer)
    }

    fn fresh(&self) -> Box<dyn AggregateState> {
        Box::new(AvgState {
            alias: self.alias.clone(),
            expr: self.expr.clone(),
            sum: 0,
            count: 0,
        })
    }
}

/// Min and max over any ordered value; `keep` picks which side of the
/// comparison wins.
struct ExtremeState {
    alias: String,
    expr: Expr,
    keep: Ordering,
    best: Option<Value>,
}

impl AggregateState for ExtremeState {
    fn add(&mut self, tuple: &Tuple) -> Result<()> {
        let value = self.expr.evaluate(tuple)?;
        match &self.best {
            None => self.best = Some(value),
            Some(best) => {
                if order_values(&value, best)? == self.keep {
                    self.best = Some(value);
                }
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Result<Value> {
        self.best.clone().ok_or_else(|| {
            DbError::IllegalOperation(format!("{} aggregated no input", self.alias)).into()
        })
    }

    fn output_column(&self) -> Column {
        Column::new(self.alias.clone(), "", self.expr.output_type())
    }

    fn fresh(&self) -> Box<dyn AggregateState> {
        Box::new(ExtremeState {
            alias: self.alias.clone(),
            expr: self.expr.clone(),
            keep: self.keep,
            best: None,
        })
    }
}

/// Folds the child into one row per group (or a single row without group-by
/// expressions). Lazy but blocking: the first `next` drains the child.
/// Groups come out in first-seen order.
pub struct AggregateExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    group_by: Vec<Expr>,
    template: Vec<Box<dyn AggregateState>>,
    schema: Schema,
    results: Option<Vec<Tuple>>,
    cursor: usize,
}

impl<'a> AggregateExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        group_by: Vec<Expr>,
        template: Vec<Box<dyn AggregateState>>,
    ) -> Self {
        let mut columns: Vec<Column> = group_by.iter().map(|e| e.output_column()).collect();
        columns.extend(template.iter().map(|state| state.output_column()));
        Self {
            child,
            group_by,
            template,
            schema: Schema::new(columns),
            results: None,
            cursor: 0,
        }
    }

    fn fresh_states(&self) -> Vec<Box<dyn AggregateState>> {
        self.template.iter().map(|state| state.fresh()).collect()
    }

    fn group_key(&self, tuple: &Tuple) -> Result<Tuple> {
        let mut values = Vec::with_capacity(self.group_by.len());
        for expr in &self.group_by {
            values.push(expr.evaluate(tuple)?);
        }
        Ok(Tuple::new(values))
    }

    fn materialize(&mut self) -> Result<Vec<Tuple>> {
        if self.group_by.is_empty() {
            let mut states = self.fresh_states();
            while let Some(tuple) = self.child.next().transpose()? {
                for state in states.iter_mut() {
                    state.add(&tuple)?;
                }
            }
            let mut values = Vec::with_capacity(states.len());
            for state in &states {
                values.push(state.finalize()?);
            }
            return Ok(vec![Tuple::new(values)]);
        }

        let mut group_index: HashMap<u64, usize> = HashMap::new();
        let mut groups: Vec<(Tuple, Vec<Box<dyn AggregateState>>)> = vec![];
        while let Some(tuple) = self.child.next().transpose()? {
            let key = self.group_key(&tuple)?;
            let position = match group_index.get(&key.key()) {
                Some(&position) => position,
                None => {
                    group_index.insert(key.key(), groups.len());
                    groups.push((key, self.fresh_states()));
                    groups.len() - 1
                }
            };
            for state in groups[position].1.iter_mut() {
                state.add(&tuple)?;
            }
        }

        let mut rows = Vec::with_capacity(groups.len());
        for (key, states) in groups {
            let mut values = key.into_values();
            for state in &states {
                values.push(state.finalize()?);
            }
            rows.push(Tuple::new(values));
        }
        Ok(rows)
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.results.is_none() {
            self.results = Some(self.materialize()?);
            self.cursor = 0;
        }
        let results = self.results.as_ref().expect("just materialized");
        if self.cursor < results.len() {
            let tuple = results[self.cursor].clone();
            self.cursor += 1;
            Ok(Some(tuple))
        } else {
            Ok(None)
        }
    }
}

impl<'a> Executor for AggregateExecutor<'a> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.results = None;
        self.cursor = 0;
        self.child.rewind()
    }
}
