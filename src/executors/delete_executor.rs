use std::sync::Arc;

use anyhow::Result;
use lazy_static::lazy_static;

use super::Executor;
use crate::concurrency::TransactionId;
use crate::error::DbError;
use crate::storage::heap_file::HeapFile;
use crate::tuple::schema::{Column, Schema, TypeId};
use crate::tuple::value::Value;
use crate::tuple::Tuple;

lazy_static! {
    static ref COUNT_SCHEMA: Schema =
        Schema::new(vec![Column::new("count", "", TypeId::Integer)]);
}

/// Deletes every tuple the child produces from the target heap file by its
/// record id, then emits a single row with the delete count. The child must
/// scan the same file so the record ids resolve.
pub struct DeleteExecutor<'a> {
    table: Arc<HeapFile>,
    child: Box<dyn Executor + 'a>,
    tid: TransactionId,
    done: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(table: Arc<HeapFile>, child: Box<dyn Executor + 'a>, tid: TransactionId) -> Self {
        Self {
            table,
            child,
            tid,
            done: false,
        }
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0i64;
        while let Some(tuple) = self.child.next().transpose()? {
            self.table.delete_tuple(&tuple, self.tid)?;
            count += 1;
        }
        Ok(Some(Tuple::new(vec![Value::Integer(count)])))
    }
}

impl<'a> Executor for DeleteExecutor<'a> {
    fn schema(&self) -> &Schema {
        &COUNT_SCHEMA
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        Err(DbError::IllegalOperation("delete cannot be restarted".to_owned()).into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::filter_executor::FilterExecutor;
    use super::super::seq_scan_executor::SeqScanExecutor;
    use super::super::tests::{drain, PeopleTable};
    use super::DeleteExecutor;
    use crate::query::expr::Expr;
    use crate::query::predicate::{CompareOp, Predicate};
    use crate::tuple::schema::{Column, TypeId};
    use crate::tuple::value::Value;

    #[test]
    fn deletes_filtered_rows_and_reports_the_count() {
        let table = PeopleTable::with_rows(&[("sam", 25), ("ann", 31), ("joe", 7)]);
        let tid = table.begin();

        let age = Expr::column(1, Column::new("age", "people", TypeId::Integer));
        let predicate =
            Predicate::new(age, CompareOp::Greater, Expr::literal(Value::Integer(20))).unwrap();
        let scan = Box::new(SeqScanExecutor::new(Arc::clone(&table.file), tid));
        let filter = Box::new(FilterExecutor::new(scan, predicate));
        let mut delete = DeleteExecutor::new(Arc::clone(&table.file), filter, tid);

        let result = drain(&mut delete).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].value(0).as_i64(), 2);
        table.pool.commit_transaction(tid).unwrap();

        let tid = table.begin();
        let mut scan = SeqScanExecutor::new(Arc::clone(&table.file), tid);
        let remaining = drain(&mut scan).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].value(0).as_str(), "joe");
        table.pool.commit_transaction(tid).unwrap();
    }
}
