use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::fifo_replacer::FifoReplacer;
use super::PoolPos;
use crate::common::{FileId, PageId, PageNo, PAGE_SIZE};
use crate::concurrency::lock_manager::{Acquired, LockManager, LockMode};
use crate::concurrency::TransactionId;
use crate::error::DbError;
use crate::storage::file_manager::FileManager;
use crate::storage::heap_page::HeapPage;
use crate::tuple::schema::Schema;

const DEADLOCK_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// A pinned page. Created by `get_page`/`new_page`, unpins on drop. Writing
/// through the guard is what marks the underlying frame dirty; the page
/// itself never does.
#[derive(Debug)]
pub struct PageGuard<'a> {
    buffer_pool: &'a BufferPool,
    frame: &'a Frame,
}

impl<'a> PageGuard<'a> {
    fn new(buffer_pool: &'a BufferPool, frame: &'a Frame) -> Self {
        Self { buffer_pool, frame }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        self.frame.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HeapPage> {
        self.frame.dirty.store(true, Ordering::Relaxed);
        self.frame.page.write()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.buffer_pool.unpin(self.frame.pool_pos)
    }
}

#[derive(Debug)]
struct Frame {
    pool_pos: PoolPos,
    dirty: AtomicBool,
    page: RwLock<HeapPage>,
}

impl Frame {
    fn new(pool_pos: PoolPos) -> Self {
        Self {
            pool_pos,
            dirty: AtomicBool::new(false),
            page: RwLock::new(HeapPage::unoccupied()),
        }
    }
}

#[derive(Debug)]
struct TransactionState {
    /// Every page key this transaction fetched and may still hold a lock on.
    pages: HashSet<PageId>,
}

#[derive(Debug)]
struct PoolState {
    coord: HashMap<PageId, PoolPos>,
    free: Vec<PoolPos>,
    replacer: FifoReplacer,
    pin_counts: Vec<u32>,
    transactions: HashMap<TransactionId, TransactionState>,
    /// Victims of the deadlock detector that have not yet observed their
    /// abort.
    aborted: HashSet<TransactionId>,
}

/// Fixed-capacity page cache and, at the same time, the transaction
/// manager: all page locks are taken on the way through `get_page`/
/// `new_page`, commit flushes every page the transaction dirtied before any
/// lock is released, and abort restores dirtied frames from disk. Dirty
/// pages are never written outside commit and never evicted.
#[derive(Debug)]
pub struct BufferPool {
    frames: Box<[Frame]>,
    state: Mutex<PoolState>,
    lock_manager: LockManager,
    file_manager: FileManager,
}

impl BufferPool {
    /// Creates the pool and spawns the deadlock detector, which runs until
    /// the last reference to the pool is gone.
    pub fn new(file_manager: FileManager, capacity: usize) -> Arc<Self> {
        let frames = (0..capacity).map(Frame::new).collect();
        let pool = Arc::new(Self {
            frames,
            state: Mutex::new(PoolState {
                coord: HashMap::new(),
                free: (0..capacity).rev().collect(),
                replacer: FifoReplacer::new(),
                pin_counts: vec![0; capacity],
                transactions: HashMap::new(),
                aborted: HashSet::new(),
            }),
            lock_manager: LockManager::new(),
            file_manager,
        });

        let weak = Arc::downgrade(&pool);
        thread::Builder::new()
            .name("deadlock-detector".to_owned())
            .spawn(move || loop {
                thread::sleep(DEADLOCK_CHECK_INTERVAL);
                match weak.upgrade() {
                    None => break,
                    Some(pool) => pool.run_deadlock_check(),
                }
            })
            .expect("could not spawn the deadlock detector");

        pool
    }

    pub fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    pub fn begin_transaction(&self, tid: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        if state.transactions.contains_key(&tid) {
            return Err(
                DbError::IllegalTransaction(format!("transaction {} already began", tid)).into(),
            );
        }
        state.transactions.insert(
            tid,
            TransactionState {
                pages: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Flushes every page the transaction dirtied, then releases its locks.
    pub fn commit_transaction(&self, tid: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        let transaction = state.transactions.remove(&tid).ok_or_else(|| {
            DbError::IllegalTransaction(format!("commit of unknown transaction {}", tid))
        })?;

        for key in &transaction.pages {
            if !self.lock_manager.holds_exclusive(tid, *key) {
                continue;
            }
            if let Some(&pos) = state.coord.get(key) {
                let frame = &self.frames[pos];
                if frame.dirty.load(Ordering::Relaxed) {
                    let page = frame.page.read();
                    self.file_manager.write_page(key.0, key.1, &page.to_buffer())?;
                    frame.dirty.store(false, Ordering::Relaxed);
                }
            }
        }
        drop(state);

        let keys: Vec<PageId> = transaction.pages.into_iter().collect();
        self.lock_manager.release_all(tid, &keys);
        self.lock_manager.remove_from_graph(tid);
        Ok(())
    }

    /// Restores every frame the transaction dirtied from disk, then releases
    /// its locks. Nothing the transaction wrote ever reached disk, so the
    /// re-read images are the pre-transaction state.
    pub fn abort_transaction(&self, tid: TransactionId) -> Result<()> {
        let mut state = self.state.lock();
        let transaction = state.transactions.remove(&tid).ok_or_else(|| {
            DbError::IllegalTransaction(format!("abort of unknown transaction {}", tid))
        })?;

        for key in &transaction.pages {
            if !self.lock_manager.holds_exclusive(tid, *key) {
                continue;
            }
            if let Some(&pos) = state.coord.get(key) {
                let frame = &self.frames[pos];
                if frame.dirty.load(Ordering::Relaxed) {
                    let schema = frame.page.read().schema().clone();
                    let restored = if key.1 < self.file_manager.num_pages(key.0)? {
                        let mut buffer = [0u8; PAGE_SIZE];
                        self.file_manager.read_page(key.0, key.1, &mut buffer)?;
                        HeapPage::from_buffer(schema, key.0, key.1, &buffer)?
                    } else {
                        HeapPage::new(schema, key.0, key.1)
                    };
                    *frame.page.write() = restored;
                    frame.dirty.store(false, Ordering::Relaxed);
                }
            }
        }
        state.aborted.insert(tid);
        drop(state);

        let keys: Vec<PageId> = transaction.pages.into_iter().collect();
        self.lock_manager.release_all(tid, &keys);
        self.lock_manager.cancel_waits(tid);
        self.lock_manager.remove_from_graph(tid);
        Ok(())
    }

    /// Acquires a `mode` lock on the page, pins it, and returns it, faulting
    /// it in from disk if it is not resident.
    pub fn get_page(
        &self,
        file_id: FileId,
        schema: &Schema,
        page_no: PageNo,
        tid: TransactionId,
        mode: LockMode,
    ) -> Result<PageGuard> {
        let key = (file_id, page_no);
        self.acquire_lock(tid, key, mode)?;
        let mut state = self.state.lock();
        self.register_fetch(&mut state, tid, key)?;

        if let Some(&pos) = state.coord.get(&key) {
            self.pin(&mut state, pos);
            return Ok(PageGuard::new(self, &self.frames[pos]));
        }

        let mut buffer = [0u8; PAGE_SIZE];
        self.file_manager.read_page(file_id, page_no, &mut buffer)?;
        let page = HeapPage::from_buffer(schema.clone(), file_id, page_no, &buffer)?;
        let pos = self.find_victim(&mut state)?;
        self.install(&mut state, pos, key, page);
        Ok(PageGuard::new(self, &self.frames[pos]))
    }

    /// Like `get_page`, but materializes a page that does not exist yet. The
    /// file is extended with an empty page image right away, so the page is
    /// observable (and survives an abort as empty); its contents only reach
    /// disk at commit. Falls back to `get_page` behavior when the page
    /// already exists.
    pub fn new_page(
        &self,
        file_id: FileId,
        schema: &Schema,
        page_no: PageNo,
        tid: TransactionId,
        mode: LockMode,
    ) -> Result<PageGuard> {
        let key = (file_id, page_no);
        self.acquire_lock(tid, key, mode)?;
        let mut state = self.state.lock();
        self.register_fetch(&mut state, tid, key)?;

        if let Some(&pos) = state.coord.get(&key) {
            self.pin(&mut state, pos);
            return Ok(PageGuard::new(self, &self.frames[pos]));
        }

        let page = if page_no < self.file_manager.num_pages(file_id)? {
            let mut buffer = [0u8; PAGE_SIZE];
            self.file_manager.read_page(file_id, page_no, &mut buffer)?;
            HeapPage::from_buffer(schema.clone(), file_id, page_no, &buffer)?
        } else {
            let page = HeapPage::new(schema.clone(), file_id, page_no);
            self.file_manager.write_page(file_id, page_no, &page.to_buffer())?;
            page
        };
        let pos = self.find_victim(&mut state)?;
        self.install(&mut state, pos, key, page);
        Ok(PageGuard::new(self, &self.frames[pos]))
    }

    /// Releases the transaction's lock on one page without ending the
    /// transaction. Only the insert path uses this, to let go of full pages
    /// it probed but did not touch. A page this transaction already wrote
    /// stays locked: its lock must survive until commit flushes it.
    pub fn release_page(&self, tid: TransactionId, key: PageId) {
        let mut state = self.state.lock();
        if let Some(&pos) = state.coord.get(&key) {
            if self.frames[pos].dirty.load(Ordering::Relaxed)
                && self.lock_manager.holds_exclusive(tid, key)
            {
                return;
            }
        }
        if let Some(transaction) = state.transactions.get_mut(&tid) {
            transaction.pages.remove(&key);
        }
        drop(state);
        self.lock_manager.release(tid, key);
    }

    /// Testing helper: writes every dirty frame out and marks it clean.
    pub fn flush_all_pages(&self) -> Result<()> {
        let _state = self.state.lock();
        for frame in self.frames.iter() {
            if frame.dirty.load(Ordering::Relaxed) {
                let page = frame.page.read();
                self.file_manager
                    .write_page(page.file_id(), page.page_no(), &page.to_buffer())?;
                frame.dirty.store(false, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Blocks until the lock is granted, re-checking between wake-ups
    /// whether this transaction was aborted by the deadlock detector.
    fn acquire_lock(&self, tid: TransactionId, key: PageId, mode: LockMode) -> Result<()> {
        loop {
            if self.take_abort_notice(tid) {
                return Err(DbError::Deadlock(format!(
                    "transaction {} was aborted to break a deadlock",
                    tid
                ))
                .into());
            }
            match self.lock_manager.acquire(tid, key, mode) {
                Acquired::Granted => return Ok(()),
                // a closed channel is a wake-up as well: the holder side
                // dropped our request while aborting us
                Acquired::Blocked(receiver) => _ = receiver.recv(),
            }
        }
    }

    fn take_abort_notice(&self, tid: TransactionId) -> bool {
        self.state.lock().aborted.remove(&tid)
    }

    /// Records the page on the transaction's fetched list. If the
    /// transaction is gone (e.g. the detector aborted it between lock
    /// acquisition and this point), the just-taken lock is given back.
    fn register_fetch(&self, state: &mut PoolState, tid: TransactionId, key: PageId) -> Result<()> {
        if state.aborted.remove(&tid) {
            self.lock_manager.release(tid, key);
            return Err(DbError::Deadlock(format!(
                "transaction {} was aborted to break a deadlock",
                tid
            ))
            .into());
        }
        match state.transactions.get_mut(&tid) {
            Some(transaction) => {
                transaction.pages.insert(key);
                Ok(())
            }
            None => {
                self.lock_manager.release(tid, key);
                Err(DbError::IllegalTransaction(format!("transaction {} is not active", tid))
                    .into())
            }
        }
    }

    fn pin(&self, state: &mut PoolState, pos: PoolPos) {
        state.pin_counts[pos] += 1;
    }

    fn unpin(&self, pos: PoolPos) {
        let mut state = self.state.lock();
        state.pin_counts[pos] -= 1;
        if state.pin_counts[pos] == 0 {
            state.replacer.touch(pos);
        }
    }

    /// Picks the frame for a page about to be cached: a free frame if one
    /// exists, otherwise the first-queued frame that is neither pinned nor
    /// dirty.
    fn find_victim(&self, state: &mut PoolState) -> Result<PoolPos> {
        if let Some(pos) = state.free.pop() {
            return Ok(pos);
        }

        for _ in 0..state.replacer.len() {
            let pos = match state.replacer.evict() {
                Some(pos) => pos,
                None => break,
            };
            let frame = &self.frames[pos];
            if state.pin_counts[pos] > 0 || frame.dirty.load(Ordering::Relaxed) {
                state.replacer.touch(pos);
                continue;
            }
            let page = frame.page.read();
            let old_key = (page.file_id(), page.page_no());
            drop(page);
            state.coord.remove(&old_key);
            log::debug!("evicted page {:?} from frame {}", old_key, pos);
            return Ok(pos);
        }

        Err(DbError::BufferPoolFull("every frame is pinned or dirty".to_owned()).into())
    }

    fn install(&self, state: &mut PoolState, pos: PoolPos, key: PageId, page: HeapPage) {
        let frame = &self.frames[pos];
        *frame.page.write() = page;
        frame.dirty.store(false, Ordering::Relaxed);
        state.coord.insert(key, pos);
        state.replacer.touch(pos);
        self.pin(state, pos);
    }

    fn run_deadlock_check(&self) {
        if let Some(cycle) = self.lock_manager.find_cycle() {
            // abort the youngest transaction on the cycle
            if let Some(&victim) = cycle.iter().max() {
                log::info!(
                    "deadlock among transactions {:?}, aborting {}",
                    cycle,
                    victim
                );
                if let Err(e) = self.abort_transaction(victim) {
                    log::warn!("could not abort deadlock victim {}: {}", victim, e);
                }
            }
        }
    }
}
