//! # managed-ptr - C-style pointers for a managed runtime
//!
//! Explicit aliasing and mutation through indirection, without raw addresses.
//! Values live in a paged heap in their storage representation; a
//! [`Pointer`] names that storage by identity and can be dereferenced,
//! rebound, or used to overwrite the storage in place.
//!
//! ## Quick Start
//!
//! ```rust
//! use managed_ptr::{guarded, make_from, to_null, Error, MoveMode, Slot, Value};
//!
//! # fn main() -> managed_ptr::Result<()> {
//! let a = Slot::new(10i64)?;
//! let b = Slot::new(20i64)?;
//!
//! let mut ptr = make_from(&a)?;
//! ptr.move_value(&Value::Int(11), MoveMode::Checked)?;
//! assert_eq!(a.get()?, Value::Int(11));
//!
//! // Rebinding repoints, it never writes
//! ptr.rebind(&b)?;
//! assert_eq!(ptr.dereference()?, Value::Int(20));
//! assert_eq!(a.get()?, Value::Int(11));
//!
//! // NULL
//! assert!(matches!(to_null().dereference(), Err(Error::NullPointer { .. })));
//!
//! // Released storage is a segment violation, not undefined behavior
//! drop(b);
//! let err = guarded(|| ptr.load_raw()).unwrap_err();
//! assert!(matches!(err, Error::SegmentViolation { .. }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Main Components
//!
//! - [`Slot`] - Owning handle of a managed value; clones are aliases
//! - [`Heap`] - Paged arena and identity registry
//! - [`Pointer`] - Identity + captured size, or null
//! - [`guarded`] - Fault interception scope
//! - [`bridge`] - Parameter decay for callables taking pointers
//!
//! ## Safety Model
//!
//! [`MoveMode::Unchecked`] deliberately writes past the end of a storage
//! block. The damage is confined to the emulated heap but is otherwise real:
//! neighbouring values become unreadable and reclaiming the overrun block
//! faults. See [`fault`] for how and when such faults are intercepted.

// Module declarations
/// Version of the managed-ptr runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bridge;
pub mod error;
pub mod fault;
pub mod memory;
pub mod pointer;
pub mod runtime;

// Re-export main types
pub use error::{Error, ErrorSeverity, Result};
pub use fault::{guarded, FaultKind, FaultRecord, FaultScope};
pub use memory::{Heap, HeapConfig, Identity, Slot};
pub use pointer::{make_from, to_null, MoveMode, Null, Pointer, PointerTarget, NULL};
pub use runtime::{Value, ValueKind};
