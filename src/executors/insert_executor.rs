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

/// Drives the child to completion, inserting every tuple into the target
/// heap file, then emits a single row with the insert count. Runs under the
/// caller's transaction; committing or aborting afterwards is the caller's
/// business.
pub struct InsertExecutor<'a> {
    table: Arc<HeapFile>,
    child: Box<dyn Executor + 'a>,
    tid: TransactionId,
    done: bool,
}

impl<'a> InsertExecutor<'a> {
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
            self.table.insert_tuple(&tuple, self.tid)?;
            count += 1;
        }
        Ok(Some(Tuple::new(vec![Value::Integer(count)])))
    }
}

impl<'a> Executor for InsertExecutor<'a> {
    fn schema(&self) -> &Schema {
        &COUNT_SCHEMA
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.fetch_next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        Err(DbError::IllegalOperation("insert cannot be restarted".to_owned()).into())
    }
}

/// Feeds literal rows into an insert (or any other consumer) without a
/// backing table.
pub struct ValuesExecutor {
    rows: Vec<Tuple>,
    schema: Schema,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(rows: Vec<Tuple>, schema: Schema) -> Result<Self> {
        for row in &rows {
            row.conforms_to(&schema)?;
        }
        Ok(Self {
            rows,
            schema,
            cursor: 0,
        })
    }
}

impl Executor for ValuesExecutor {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        if self.cursor < self.rows.len() {
            let tuple = self.rows[self.cursor].clone();
            self.cursor += 1;
            Some(Ok(tuple))
        } else {
            None
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::seq_scan_executor::SeqScanExecutor;
    use super::super::tests::{drain, people_schema, person, PeopleTable};
    use super::{InsertExecutor, ValuesExecutor};
    use crate::tuple::value::Value;

    #[test]
    fn inserts_child_rows_and_reports_the_count() {
        let table = PeopleTable::with_rows(&[]);
        let tid = table.begin();

        let rows = vec![person("sam", 25), person("ann", 31), person("joe", 7)];
        let values = Box::new(ValuesExecutor::new(rows, people_schema()).unwrap());
        let mut insert = InsertExecutor::new(Arc::clone(&table.file), values, tid);

        let result = drain(&mut insert).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].value(0).as_i64(), 3);
        table.pool.commit_transaction(tid).unwrap();

        // a later transaction scans the inserted rows
        let tid = table.begin();
        let mut scan = SeqScanExecutor::new(Arc::clone(&table.file), tid);
        assert_eq!(drain(&mut scan).unwrap().len(), 3);
        table.pool.commit_transaction(tid).unwrap();
    }

    #[test]
    fn values_executor_type_checks_rows() {
        let bad = vec![crate::tuple::Tuple::new(vec![Value::Integer(1)])];
        assert!(ValuesExecutor::new(bad, people_schema()).is_err());
    }
}
