use std::sync::Arc;

use anyhow::Result;

use super::Executor;
use crate::concurrency::TransactionId;
use crate::storage::heap_file::{HeapFile, TableScan};
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// Table scan: yields every live tuple of a heap file, record ids set, under
/// shared page locks taken by the buffer pool.
pub struct SeqScanExecutor {
    table: Arc<HeapFile>,
    scan: TableScan,
    tid: TransactionId,
}

impl SeqScanExecutor {
    pub fn new(table: Arc<HeapFile>, tid: TransactionId) -> Self {
        let scan = table.scan(tid);
        Self { table, scan, tid }
    }
}

impl Executor for SeqScanExecutor {
    fn schema(&self) -> &Schema {
        self.table.schema()
    }

    fn next(&mut self) -> Option<Result<Tuple>> {
        self.scan.next().transpose()
    }

    fn rewind(&mut self) -> Result<()> {
        self.scan = self.table.scan(self.tid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::executors::Executor;

    use super::super::tests::{drain, PeopleTable};
    use super::SeqScanExecutor;

    #[test]
    fn scans_all_rows_and_rewinds() {
        let table = PeopleTable::with_rows(&[("sam", 25), ("george jones", 999)]);
        let tid = table.begin();
        let mut scan = SeqScanExecutor::new(Arc::clone(&table.file), tid);

        let first = drain(&mut scan).unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|t| t.rid().is_some()));

        scan.rewind().unwrap();
        let second = drain(&mut scan).unwrap();
        assert_eq!(first, second);
        table.pool.commit_transaction(tid).unwrap();
    }
}
