use anyhow::Result;

use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

pub mod aggregate_executor;
pub mod delete_executor;
pub mod filter_executor;
pub mod insert_executor;
pub mod limit_executor;
pub mod nested_loop_join_executor;
pub mod order_by_executor;
pub mod projection_executor;
pub mod seq_scan_executor;

/// The uniform pull interface every operator speaks. `next` yields tuples
/// until the stream ends; errors from a child propagate unchanged. `rewind`
/// restarts the stream, which the join uses on its inner side.
pub trait Executor {
    fn schema(&self) -> &Schema;
    fn next(&mut self) -> Option<Result<Tuple>>;
    fn rewind(&mut self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use tempfile::TempDir;

    use super::Executor;
    use crate::buffer::buffer_pool::BufferPool;
    use crate::concurrency::{next_transaction_id, TransactionId};
    use crate::storage::file_manager::FileManager;
    use crate::storage::heap_file::HeapFile;
    use crate::tuple::schema::{Column, Schema, TypeId};
    use crate::tuple::value::Value;
    use crate::tuple::Tuple;

    /// A heap file of (name string, age int) rows backed by its own
    /// temporary directory and buffer pool.
    pub struct PeopleTable {
        pub data_dir: TempDir,
        pub pool: Arc<BufferPool>,
        pub file: Arc<HeapFile>,
    }

    pub fn people_schema() -> Schema {
        Schema::new(vec![
            Column::new("name", "people", TypeId::Text),
            Column::new("age", "people", TypeId::Integer),
        ])
    }

    pub fn person(name: &str, age: i64) -> Tuple {
        Tuple::new(vec![Value::String(name.to_owned()), Value::Integer(age)])
    }

    impl PeopleTable {
        pub fn with_rows(rows: &[(&str, i64)]) -> Self {
            let data_dir = tempfile::tempdir().unwrap();
            let pool = BufferPool::new(FileManager::new(), 8);
            let file = HeapFile::open(
                Arc::clone(&pool),
                data_dir.path().join("people.dat"),
                people_schema(),
            )
            .unwrap();

            let tid = next_transaction_id();
            pool.begin_transaction(tid).unwrap();
            for (name, age) in rows {
                file.insert_tuple(&person(name, *age), tid).unwrap();
            }
            pool.commit_transaction(tid).unwrap();

            Self {
                data_dir,
                pool,
                file,
            }
        }

        pub fn begin(&self) -> TransactionId {
            let tid = next_transaction_id();
            self.pool.begin_transaction(tid).unwrap();
            tid
        }
    }

    pub fn drain(executor: &mut dyn Executor) -> Result<Vec<Tuple>> {
        let mut tuples = vec![];
        while let Some(tuple) = executor.next().transpose()? {
            tuples.push(tuple);
        }
        Ok(tuples)
    }
}
