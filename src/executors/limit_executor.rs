use anyhow::Result;

use super::Executor;
use crate::error::DbError;
use crate::query::expr::Expr;
use crate::tuple::schema::Schema;
use crate::tuple::value::Value;
use crate::tuple::Tuple;

/// Stops the stream after the child produced the configured number of
/// tuples.
pub struct LimitExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    limit: i64,
    emitted: i64,
}

impl<'a> LimitExecutor<'a> {
    /// `limit` is a constant expression, evaluated once.
    pub fn new(child: Box<dyn Executor + 'a>, limit: Expr) -> Result<Self> {
        let limit = match limit.evaluate_constant()? {
            Value::Integer(limit) => limit,
            other => {
                return Err(DbError::TypeMismatch(format!(
                    "limit must be an integer, got {}",
                    other.type_id()
                ))
                .into())
            }
        };
        Ok(Self {
            child,
            limit,
            emitted: 0,
        })
    }
}

impl<'a> Executor for LimitExecutor<'a> {
    fn schema(&self) -> &Schema {
        self.child.schema()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        if self.emitted >= self.limit {
            return None;
        }
        self.emitted += 1;
        self.child.next()
    }

    fn rewind(&mut self) -> Result<()> {
        self.emitted = 0;
        self.child.rewind()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::executors::Executor;

    use super::super::seq_scan_executor::SeqScanExecutor;
    use super::super::tests::{drain, PeopleTable};
    use super::LimitExecutor;
    use crate::query::expr::Expr;
    use crate::tuple::value::Value;

    #[test]
    fn truncates_the_stream() {
        let table = PeopleTable::with_rows(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let tid = table.begin();

        let scan = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        let mut limit =
            LimitExecutor::new(scan, Expr::literal(Value::Integer(2))).unwrap();
        assert_eq!(drain(&mut limit).unwrap().len(), 2);

        limit.rewind().unwrap();
        assert_eq!(drain(&mut limit).unwrap().len(), 2);
        table.pool.commit_transaction(tid).unwrap();
    }

    #[test]
    fn non_integer_limits_are_rejected() {
        let table = PeopleTable::with_rows(&[("a", 1)]);
        let tid = table.begin();
        let scan = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        assert!(
            LimitExecutor::new(scan, Expr::literal(Value::String("two".to_owned()))).is_err()
        );
        table.pool.commit_transaction(tid).unwrap();
    }
}
