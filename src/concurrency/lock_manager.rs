use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::wait_for_graph::WaitForGraph;
use super::TransactionId;
use crate::common::PageId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn compatible(&self, other: LockMode) -> bool {
        match self {
            Self::Shared => other == LockMode::Shared,
            Self::Exclusive => false,
        }
    }
}

/// Outcome of a lock request. A refused caller blocks on the receiver; any
/// release of the key (or an abort of the caller) wakes it, after which it
/// must retry the request.
pub enum Acquired {
    Granted,
    Blocked(Receiver<()>),
}

#[derive(Debug)]
struct LockState {
    mode: LockMode,
    holders: HashSet<TransactionId>,
    waiters: Vec<(TransactionId, Sender<()>)>,
    /// Set right before the entry leaves the table. A caller that raced the
    /// removal and still holds the old Arc must start over.
    removed: bool,
}

impl LockState {
    fn new(tid: TransactionId, mode: LockMode) -> Self {
        Self {
            mode,
            holders: HashSet::from([tid]),
            waiters: vec![],
            removed: false,
        }
    }
}

#[derive(Debug)]
struct Lock {
    state: Mutex<LockState>,
}

/// Page-level lock table with shared/exclusive modes and sole-holder
/// upgrade. Requests never block inside the manager; the buffer pool owns
/// the wait loop so it can record wait-for edges between retries.
#[derive(Debug)]
pub struct LockManager {
    lock_table: DashMap<PageId, Arc<Lock>>,
    wait_for: Mutex<WaitForGraph>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: DashMap::new(),
            wait_for: Mutex::new(WaitForGraph::new()),
        }
    }

    /// Requests `mode` on `key` for `tid`. Re-acquiring an already-held lock
    /// with a sufficient mode is a no-op; holding Shared alone upgrades in
    /// place. A refusal registers the caller as a waiter and records its
    /// wait-for edges before returning.
    pub fn acquire(&self, tid: TransactionId, key: PageId, mode: LockMode) -> Acquired {
        loop {
            let lock = match self.lock_table.entry(key) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(Lock {
                        state: Mutex::new(LockState::new(tid, mode)),
                    }));
                    self.wait_for.lock().remove_waits_of(tid);
                    return Acquired::Granted;
                }
                Entry::Occupied(occupied) => occupied.get().clone(),
            };
            let mut state = lock.state.lock();
            if state.removed {
                continue;
            }

            let granted = if state.holders.contains(&tid) {
                match (state.mode, mode) {
                    (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared) => true,
                    (LockMode::Shared, LockMode::Exclusive) => {
                        // upgrade only as the sole holder
                        if state.holders.len() == 1 {
                            state.mode = LockMode::Exclusive;
                            true
                        } else {
                            false
                        }
                    }
                }
            } else if state.holders.is_empty() {
                state.mode = mode;
                state.holders.insert(tid);
                true
            } else if state.mode.compatible(mode) {
                state.holders.insert(tid);
                true
            } else {
                false
            };

            if granted {
                self.wait_for.lock().remove_waits_of(tid);
                return Acquired::Granted;
            }

            let (sender, receiver) = channel();
            state.waiters.push((tid, sender));
            let mut wait_for = self.wait_for.lock();
            for holder in &state.holders {
                if *holder != tid {
                    wait_for.add_edge(tid, *holder);
                }
            }
            return Acquired::Blocked(receiver);
        }
    }

    /// Removes `tid` from the holder set of `key` and wakes every waiter so
    /// it can retry. Releasing a key the transaction does not hold is a
    /// no-op.
    pub fn release(&self, tid: TransactionId, key: PageId) {
        if let Entry::Occupied(entry) = self.lock_table.entry(key) {
            let lock = entry.get().clone();
            let mut state = lock.state.lock();
            if !state.holders.remove(&tid) {
                return;
            }
            for (_, waiter) in state.waiters.drain(..) {
                _ = waiter.send(());
            }
            if state.holders.is_empty() {
                state.removed = true;
                drop(state);
                entry.remove();
            }
        }
    }

    pub fn release_all(&self, tid: TransactionId, keys: &[PageId]) {
        for key in keys {
            self.release(tid, *key);
        }
    }

    pub fn holds_exclusive(&self, tid: TransactionId, key: PageId) -> bool {
        match self.lock_table.get(&key) {
            Some(lock) => {
                let state = lock.state.lock();
                state.mode == LockMode::Exclusive && state.holders.contains(&tid)
            }
            None => false,
        }
    }

    /// Drops every pending request of `tid` and wakes it, used when the
    /// deadlock detector aborts a blocked transaction.
    pub fn cancel_waits(&self, tid: TransactionId) {
        for entry in self.lock_table.iter() {
            let mut state = entry.value().state.lock();
            // dropping the sender makes the waiter's recv fail, which counts
            // as a wake-up
            state.waiters.retain(|(waiter, _)| *waiter != tid);
        }
    }

    pub fn remove_from_graph(&self, tid: TransactionId) {
        self.wait_for.lock().remove_transaction(tid);
    }

    pub fn find_cycle(&self) -> Option<Vec<TransactionId>> {
        self.wait_for.lock().find_cycle()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::{Acquired, LockManager, LockMode};
    use crate::common::PageId;

    const PAGE: PageId = (1, 0);

    fn expect_granted(result: Acquired) {
        assert!(matches!(result, Acquired::Granted));
    }

    #[test]
    fn shared_locks_compose() {
        let lock_manager = LockManager::new();
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Shared));
        expect_granted(lock_manager.acquire(2, PAGE, LockMode::Shared));
        expect_granted(lock_manager.acquire(3, PAGE, LockMode::Shared));
    }

    #[test]
    fn exclusive_conflicts_with_any_other_holder() {
        let lock_manager = LockManager::new();
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Exclusive));
        assert!(matches!(
            lock_manager.acquire(2, PAGE, LockMode::Shared),
            Acquired::Blocked(_)
        ));
        assert!(matches!(
            lock_manager.acquire(2, PAGE, LockMode::Exclusive),
            Acquired::Blocked(_)
        ));
    }

    #[test]
    fn reacquire_is_idempotent_and_exclusive_covers_shared() {
        let lock_manager = LockManager::new();
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Exclusive));
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Shared));
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Exclusive));
    }

    #[test]
    fn sole_holder_upgrades_in_place() {
        let lock_manager = LockManager::new();
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Shared));
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Exclusive));
        assert!(lock_manager.holds_exclusive(1, PAGE));
    }

    #[test]
    fn upgrade_refused_while_another_shared_holder_exists() {
        let lock_manager = LockManager::new();
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Shared));
        expect_granted(lock_manager.acquire(2, PAGE, LockMode::Shared));
        assert!(matches!(
            lock_manager.acquire(1, PAGE, LockMode::Exclusive),
            Acquired::Blocked(_)
        ));
    }

    #[test]
    fn release_wakes_waiters() {
        let lock_manager = LockManager::new();
        expect_granted(lock_manager.acquire(1, PAGE, LockMode::Exclusive));
        let woke_up = AtomicBool::new(false);

        thread::scope(|scope| {
            let lock_manager = &lock_manager;
            let woke_up = &woke_up;
            scope.spawn(move || {
                let mut attempt = lock_manager.acquire(2, PAGE, LockMode::Exclusive);
                loop {
                    match attempt {
                        Acquired::Granted => break,
                        Acquired::Blocked(receiver) => {
                            _ = receiver.recv();
                            attempt = lock_manager.acquire(2, PAGE, LockMode::Exclusive);
                        }
                    }
                }
                woke_up.store(true, Ordering::Relaxed);
            });

            thread::sleep(Duration::from_millis(100));
            assert!(!woke_up.load(Ordering::Relaxed));
            lock_manager.release(1, PAGE);
        });

        assert!(woke_up.load(Ordering::Relaxed));
        assert!(lock_manager.holds_exclusive(2, PAGE));
    }

    #[test]
    fn blocked_requests_record_wait_edges() {
        let lock_manager = LockManager::new();
        expect_granted(lock_manager.acquire(1, (1, 0), LockMode::Shared));
        expect_granted(lock_manager.acquire(2, (1, 1), LockMode::Shared));
        assert!(matches!(
            lock_manager.acquire(1, (1, 1), LockMode::Exclusive),
            Acquired::Blocked(_)
        ));
        assert!(lock_manager.find_cycle().is_none());
        assert!(matches!(
            lock_manager.acquire(2, (1, 0), LockMode::Exclusive),
            Acquired::Blocked(_)
        ));
        let mut cycle = lock_manager.find_cycle().unwrap();
        cycle.sort_unstable();
        assert_eq!(cycle, vec![1, 2]);
    }
}
