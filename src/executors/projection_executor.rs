use std::collections::HashSet;

use anyhow::Result;

use super::Executor;
use crate::error::DbError;
use crate::query::expr::Expr;
use crate::tuple::schema::{Column, Schema};
use crate::tuple::Tuple;

/// Evaluates a list of expressions against each child tuple and renames the
/// result columns. With `distinct`, duplicate output tuples are suppressed
/// by their value hash.
pub struct ProjectionExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    exprs: Vec<Expr>,
    schema: Schema,
    distinct: bool,
    seen: HashSet<u64>,
}

impl<'a> ProjectionExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        exprs: Vec<Expr>,
        output_names: Vec<String>,
        distinct: bool,
    ) -> Result<Self> {
        if output_names.len() != exprs.len() {
            return Err(DbError::IllegalOperation(format!(
                "{} output names for {} projections",
                output_names.len(),
                exprs.len()
            ))
            .into());
        }
        let columns = exprs
            .iter()
            .zip(&output_names)
            .map(|(expr, name)| {
                let column = expr.output_column();
                Column::new(name.clone(), column.table, column.type_id)
            })
            .collect();

        Ok(Self {
            child,
            exprs,
            schema: Schema::new(columns),
            distinct,
            seen: HashSet::new(),
        })
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next().transpose()? {
            let mut values = Vec::with_capacity(self.exprs.len());
            for expr in &self.exprs {
                values.push(expr.evaluate(&tuple)?);
            }
            let projected = Tuple::new(values);
            if self.distinct && !self.seen.insert(projected.key()) {
                continue;
            }
            return Ok(Some(projected));
        }
        Ok(None)
    }
}

impl<'a> Executor for ProjectionExecutor<'a> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.seen.clear();
        self.child.rewind()
    }
}
