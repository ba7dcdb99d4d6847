use anyhow::Result;

use super::Executor;
use crate::error::DbError;
use crate::query::expr::Expr;
use crate::tuple::schema::Schema;
use crate::tuple::value::Value;
use crate::tuple::Tuple;

/// Equality join by nested loops: the right child restarts once per left
/// tuple, and joined tuples come out in left-major order.
pub struct NestedLoopJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    left_expr: Expr,
    right_expr: Expr,
    schema: Schema,
    current_left: Option<(Tuple, Value)>,
}

impl<'a> NestedLoopJoinExecutor<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        left_expr: Expr,
        right_expr: Expr,
    ) -> Result<Self> {
        if left_expr.output_type() != right_expr.output_type() {
            return Err(DbError::TypeMismatch(format!(
                "cannot join a {} field with a {} field",
                left_expr.output_type(),
                right_expr.output_type()
            ))
            .into());
        }
        let schema = left.schema().merge(right.schema());
        Ok(Self {
            left,
            right,
            left_expr,
            right_expr,
            schema,
            current_left: None,
        })
    }

    fn advance_left(&mut self) -> Result<bool> {
        match self.left.next().transpose()? {
            Some(tuple) => {
                let value = self.left_expr.evaluate(&tuple)?;
                self.current_left = Some((tuple, value));
                self.right.rewind()?;
                Ok(true)
            }
            None => {
                self.current_left = None;
                Ok(false)
            }
        }
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.current_left.is_none() && !self.advance_left()? {
            return Ok(None);
        }
        loop {
            while let Some(right_tuple) = self.right.next().transpose()? {
                let (left_tuple, left_value) = match &self.current_left {
                    Some(current) => current,
                    None => return Ok(None),
                };
                if *left_value == self.right_expr.evaluate(&right_tuple)? {
                    return Ok(Some(left_tuple.clone().join(right_tuple)));
                }
            }
            if !self.advance_left()? {
                return Ok(None);
            }
        }
    }
}

impl<'a> Executor for NestedLoopJoinExecutor<'a> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.current_left = None;
        self.left.rewind()?;
        self.right.rewind()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::executors::Executor;

    use super::super::seq_scan_executor::SeqScanExecutor;
    use super::super::tests::{drain, people_schema, PeopleTable};
    use super::NestedLoopJoinExecutor;
    use crate::query::expr::Expr;
    use crate::storage::heap_file::HeapFile;
    use crate::tuple::schema::{Column, Schema, TypeId};
    use crate::tuple::value::Value;
    use crate::tuple::Tuple;

    fn orders_schema() -> Schema {
        Schema::new(vec![
            Column::new("customer", "orders", TypeId::Text),
            Column::new("total", "orders", TypeId::Integer),
        ])
    }

    #[test]
    fn joins_on_equal_values_in_left_major_order() {
        let table = PeopleTable::with_rows(&[("sam", 25), ("ann", 31), ("joe", 40)]);
        let orders = HeapFile::open(
            Arc::clone(&table.pool),
            table.data_dir.path().join("orders.dat"),
            orders_schema(),
        )
        .unwrap();

        let tid = table.begin();
        for (customer, total) in [("sam", 10), ("ann", 20), ("sam", 30)] {
            orders
                .insert_tuple(
                    &Tuple::new(vec![
                        Value::String(customer.to_owned()),
                        Value::Integer(total),
                    ]),
                    tid,
                )
                .unwrap();
        }
        table.pool.commit_transaction(tid).unwrap();

        let tid = table.begin();
        let left = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        let right = Box::new(SeqScanExecutor::new(Arc::clone(&orders), tid));
        let left_name = Expr::column(0, people_schema().columns()[0].clone());
        let right_name = Expr::column(0, orders_schema().columns()[0].clone());
        let mut join =
            NestedLoopJoinExecutor::new(left, right, left_name, right_name).unwrap();

        assert_eq!(join.schema().columns().len(), 4);
        let rows: Vec<(String, i64)> = drain(&mut join)
            .unwrap()
            .iter()
            .map(|t| (t.value(0).as_str().to_owned(), t.value(3).as_i64()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("sam".to_owned(), 10),
                ("sam".to_owned(), 30),
                ("ann".to_owned(), 20),
            ]
        );
        table.pool.commit_transaction(tid).unwrap();
    }

    #[test]
    fn mismatched_join_types_are_rejected() {
        let table = PeopleTable::with_rows(&[("sam", 25)]);
        let tid = table.begin();
        let left = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        let right = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        let name = Expr::column(0, people_schema().columns()[0].clone());
        let age = Expr::column(1, people_schema().columns()[1].clone());
        assert!(NestedLoopJoinExecutor::new(left, right, name, age).is_err());
        table.pool.commit_transaction(tid).unwrap();
    }
}
