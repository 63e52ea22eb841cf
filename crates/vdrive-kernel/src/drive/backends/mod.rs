//! Built-in drive backends.

mod memory;

pub use memory::{MemoryDrive, MemoryEntry};
