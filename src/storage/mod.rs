pub mod bitmap;
pub mod file_manager;
pub mod heap;
pub(in crate::storage) mod utils;
