//! Key-value backends.

pub mod atomic_file;
mod json_file;
mod memory;

pub use json_file::JsonFileKeyValueStore;
pub use memory::MemoryKeyValueStore;
