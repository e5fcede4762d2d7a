//! Managed storage: the heap, its identity registry and owning slots

pub mod codec;
mod heap;
mod slot;

pub use heap::{Heap, HeapConfig, HeapStats, Identity, HEADER_SIZE};
pub use slot::Slot;
