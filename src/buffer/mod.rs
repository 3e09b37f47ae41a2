pub mod buffer_manager;
mod clock_replacer;

/// Position of a buffer inside the buffer pool
pub(in crate::buffer) type PoolPos = usize;
