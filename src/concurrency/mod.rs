use std::sync::atomic::{AtomicU32, Ordering};

pub mod lock_manager;
pub mod wait_for_graph;

pub type TransactionId = u32;

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

/// Hands out process-wide unique transaction ids.
pub fn next_transaction_id() -> TransactionId {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}
