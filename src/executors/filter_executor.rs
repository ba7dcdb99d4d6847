use anyhow::Result;

use super::Executor;
use crate::query::predicate::Predicate;
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// Passes through the child's tuples that satisfy the predicate.
pub struct FilterExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    predicate: Predicate,
}

impl<'a> FilterExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, predicate: Predicate) -> Self {
        Self { child, predicate }
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next().transpose()? {
            if self.predicate.evaluate(&tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }
}

impl<'a> Executor for FilterExecutor<'a> {
    fn schema(&self) -> &Schema {
        self.child.schema()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.child.rewind()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::seq_scan_executor::SeqScanExecutor;
    use super::super::tests::{drain, PeopleTable};
    use super::FilterExecutor;
    use crate::query::expr::Expr;
    use crate::query::predicate::{CompareOp, Predicate};
    use crate::tuple::schema::{Column, TypeId};
    use crate::tuple::value::Value;

    fn age() -> Expr {
        Expr::column(1, Column::new("age", "people", TypeId::Integer))
    }

    fn name() -> Expr {
        Expr::column(0, Column::new("name", "people", TypeId::Text))
    }

    #[test]
    fn keeps_only_matching_tuples() {
        let table = PeopleTable::with_rows(&[("sam", 25), ("george jones", 999), ("ann", 31)]);
        let tid = table.begin();

        let predicate =
            Predicate::new(age(), CompareOp::Greater, Expr::literal(Value::Integer(30))).unwrap();
        let scan = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        let mut filter = FilterExecutor::new(scan, predicate);

        let ages: Vec<i64> = drain(&mut filter)
            .unwrap()
            .iter()
            .map(|t| t.value(1).as_i64())
            .collect();
        assert_eq!(ages, vec![999, 31]);
        table.pool.commit_transaction(tid).unwrap();
    }

    #[test]
    fn like_filters_on_strings() {
        let table = PeopleTable::with_rows(&[("sam", 25), ("george jones", 999), ("georgia", 1)]);
        let tid = table.begin();

        let predicate = Predicate::new(
            name(),
            CompareOp::Like,
            Expr::literal(Value::String("george%".to_owned())),
        )
        .unwrap();
        let scan = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        let mut filter = FilterExecutor::new(scan, predicate);

        let names: Vec<String> = drain(&mut filter)
            .unwrap()
            .iter()
            .map(|t| t.value(0).as_str().to_owned())
            .collect();
        assert_eq!(names, vec!["george jones", "georgia"]);
        table.pool.commit_transaction(tid).unwrap();
    }
}
