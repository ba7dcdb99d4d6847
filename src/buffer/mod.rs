pub mod buffer_pool;
pub mod fifo_replacer;

/// Position of a frame inside the buffer pool's frame array.
pub type PoolPos = usize;
