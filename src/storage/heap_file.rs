use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::buffer::buffer_pool::BufferPool;
use crate::common::{FileId, PageNo, RecordId, SlotNo};
use crate::concurrency::lock_manager::LockMode;
use crate::concurrency::TransactionId;
use crate::error::DbError;
use crate::tuple::schema::Schema;
use crate::tuple::Tuple;

/// An unordered file of fixed-size heap pages. Every page access goes
/// through the buffer pool, which also takes the page lock for the calling
/// transaction.
#[derive(Debug)]
pub struct HeapFile {
    file_id: FileId,
    schema: Schema,
    buffer_pool: Arc<BufferPool>,
}

impl HeapFile {
    /// Opens (or creates) the heap file at `path` and registers it with the
    /// pool's file manager. Heap files are shared between scans, operators
    /// and the catalog, so they live behind an Arc from the start.
    pub fn open(
        buffer_pool: Arc<BufferPool>,
        path: impl AsRef<Path>,
        schema: Schema,
    ) -> Result<Arc<Self>> {
        let file_id = buffer_pool.file_manager().register(path)?;
        Ok(Arc::new(Self {
            file_id,
            schema,
            buffer_pool,
        }))
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_pages(&self) -> Result<PageNo> {
        self.buffer_pool.file_manager().num_pages(self.file_id)
    }

    /// Inserts the tuple into the first page with a free slot, appending a
    /// new page when every existing one is full. Probed pages that had no
    /// room are unlocked again on the way: the probe reads nothing but the
    /// free-slot count, and keeping write locks on full pages would
    /// serialize every concurrent inserter.
    pub fn insert_tuple(&self, tuple: &Tuple, tid: TransactionId) -> Result<RecordId> {
        tuple.conforms_to(&self.schema)?;

        loop {
            let num_pages = self.num_pages()?;
            for page_no in 0..num_pages {
                if let Some(rid) = self.try_insert_into(page_no, tuple, tid)? {
                    return Ok(rid);
                }
            }

            // every existing page is full: materialize the next one. Another
            // inserter may have appended (and even filled) that page first,
            // in which case the probe loop runs again over the longer file.
            let page_no = num_pages;
            if let Some(rid) = self.try_insert_new(page_no, tuple, tid)? {
                return Ok(rid);
            }
        }
    }

    fn try_insert_into(
        &self,
        page_no: PageNo,
        tuple: &Tuple,
        tid: TransactionId,
    ) -> Result<Option<RecordId>> {
        let guard =
            self.buffer_pool
                .get_page(self.file_id, &self.schema, page_no, tid, LockMode::Exclusive)?;
        if !guard.read().has_free_slot() {
            drop(guard);
            self.buffer_pool.release_page(tid, (self.file_id, page_no));
            return Ok(None);
        }
        let rid = guard.write().insert_tuple(tuple.clone())?;
        Ok(Some(rid))
    }

    fn try_insert_new(
        &self,
        page_no: PageNo,
        tuple: &Tuple,
        tid: TransactionId,
    ) -> Result<Option<RecordId>> {
        let guard =
            self.buffer_pool
                .new_page(self.file_id, &self.schema, page_no, tid, LockMode::Exclusive)?;
        if !guard.read().has_free_slot() {
            drop(guard);
            self.buffer_pool.release_page(tid, (self.file_id, page_no));
            return Ok(None);
        }
        let rid = guard.write().insert_tuple(tuple.clone())?;
        Ok(Some(rid))
    }

    /// Deletes the tuple behind the record id, which must have come from a
    /// scan of this file.
    pub fn delete_tuple(&self, tuple: &Tuple, tid: TransactionId) -> Result<()> {
        let rid = tuple.rid().ok_or_else(|| {
            DbError::IllegalOperation("cannot delete a tuple that has no record id".to_owned())
        })?;
        self.delete_record(rid, tid)
    }

    pub fn delete_record(&self, rid: RecordId, tid: TransactionId) -> Result<()> {
        let (page_no, _) = rid;
        let guard =
            self.buffer_pool
                .get_page(self.file_id, &self.schema, page_no, tid, LockMode::Exclusive)?;
        // probe first so a doomed delete does not dirty the page
        guard.read().fetch_tuple(rid.1)?;
        let result = guard.write().delete_tuple(rid);
        result
    }

    /// Streaming scan. Each `next` call pins the current page shared,
    /// copies one live tuple out, and unpins again, so at most one frame is
    /// held at any moment and the pool can be as small as two frames.
    pub fn scan(self: &Arc<Self>, tid: TransactionId) -> TableScan {
        TableScan {
            file: Arc::clone(self),
            tid,
            page_no: 0,
            slot: 0,
        }
    }
}

pub struct TableScan {
    file: Arc<HeapFile>,
    tid: TransactionId,
    page_no: PageNo,
    slot: usize,
}

impl TableScan {
    pub fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if self.page_no >= self.file.num_pages()? {
                return Ok(None);
            }
            let guard = self.file.buffer_pool.get_page(
                self.file.file_id,
                &self.file.schema,
                self.page_no,
                self.tid,
                LockMode::Shared,
            )?;
            let page = guard.read();
            while self.slot < page.slot_count() {
                let slot = self.slot;
                self.slot += 1;
                if page.is_deleted(slot) {
                    continue;
                }
                let mut tuple = page.fetch_tuple(slot as SlotNo)?.clone();
                tuple.set_rid((self.page_no, slot as SlotNo));
                return Ok(Some(tuple));
            }
            self.page_no += 1;
            self.slot = 0;
        }
    }
}
