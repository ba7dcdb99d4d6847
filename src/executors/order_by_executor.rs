use std::cmp::Ordering;

use anyhow::Result;

use super::Executor;
use crate::error::DbError;
use crate::query::expr::Expr;
use crate::query::predicate::order_values;
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// Blocking sort. The first `next` drains the child, evaluates every sort
/// key up front, and stable-sorts, so ties keep their arrival order.
pub struct OrderByExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    keys: Vec<(Expr, bool)>,
    sorted: Option<Vec<Tuple>>,
    cursor: usize,
}

impl std::fmt::Debug for OrderByExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderByExecutor")
            .field("keys", &self.keys)
            .field("sorted", &self.sorted)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl<'a> OrderByExecutor<'a> {
    /// `keys` pairs each sort expression with an ascending flag; earlier
    /// entries take precedence, later ones break ties. A key whose column
    /// reference disagrees with the child's schema is rejected here, so the
    /// comparator below only ever sees same-typed values.
    pub fn new(child: Box<dyn Executor + 'a>, keys: Vec<(Expr, bool)>) -> Result<Self> {
        for (expr, _) in &keys {
            if let Expr::Column { index, column } = expr {
                let declared = child.schema().columns().get(*index);
                if declared.map(|col| col.type_id) != Some(column.type_id) {
                    return Err(DbError::IncompatibleTypes(format!(
                        "sort key {} does not match the input schema",
                        column.name
                    ))
                    .into());
                }
            }
        }
        Ok(Self {
            child,
            keys,
            sorted: None,
            cursor: 0,
        })
    }

    fn materialize(&mut self) -> Result<Vec<Tuple>> {
        let mut rows = vec![];
        while let Some(tuple) = self.child.next().transpose()? {
            let mut key_values = Vec::with_capacity(self.keys.len());
            for (expr, _) in &self.keys {
                key_values.push(expr.evaluate(&tuple)?);
            }
            rows.push((key_values, tuple));
        }

        rows.sort_by(|(left, _), (right, _)| {
            for (idx, (_, ascending)) in self.keys.iter().enumerate() {
                let ordering = match order_values(&left[idx], &right[idx]) {
                    Ok(ordering) => ordering,
                    Err(_) => Ordering::Equal,
                };
                let ordering = if *ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(rows.into_iter().map(|(_, tuple)| tuple).collect())
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.sorted.is_none() {
            self.sorted = Some(self.materialize()?);
            self.cursor = 0;
        }
        let sorted = self.sorted.as_ref().expect("just materialized");
        if self.cursor < sorted.len() {
            let tuple = sorted[self.cursor].clone();
            self.cursor += 1;
            Ok(Some(tuple))
        } else {
            Ok(None)
        }
    }
}

impl<'a> Executor for OrderByExecutor<'a> {
    fn schema(&self) -> &Schema {
        self.child.schema()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.sorted = None;
        self.cursor = 0;
        self.child.rewind()
    }
}
