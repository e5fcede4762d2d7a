//! Fault interception for guarded pointer operations
//!
//! Illegal accesses to managed storage (a released slot, a block header
//! overwritten by an unchecked move, a write past the mapped heap) raise a
//! *fault*. While a [`guarded`] scope is active on the faulting thread the
//! fault unwinds to that scope and comes back as
//! [`Error::SegmentViolation`](crate::Error::SegmentViolation). Without an
//! active scope the fault is unguarded and panics.
//!
//! ## Scope state machine
//!
//! ```text
//! Uninstalled --enter--> Installed(1) --enter--> Installed(2) ...
//! Installed(n) --exit--> Installed(n-1)
//! Installed(1) --exit--> Uninstalled
//! ```
//!
//! The depth counter and the trap mechanism are process-wide and shared by
//! every thread. Recovery is per thread: a fault only unwinds into a
//! [`guarded`] call running on the thread that raised it. A bare
//! [`FaultScope`] keeps the trap installed but recovers nothing.
//!
//! ## Deferred reclamation
//!
//! Dropping the last alias of a slot reclaims its block. If an earlier
//! unchecked move overran that block, reclamation faults at the drop site,
//! which may be long after the move returned. The fault is converted only
//! when a [`guarded`] call is active on the dropping thread; otherwise it
//! panics. Use [`Slot::release`](crate::memory::Slot::release) for ordered
//! reclamation that reports the fault as an error.

mod scope;
mod trap;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use scope::{frame_depth, guarded, interception_depth, is_installed, set_trap_mechanism, FaultScope};
pub use trap::{PanicHookTrap, TrapMechanism};

/// Class of illegal access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    /// The identity names a slot that was released, or a heap that was dropped
    Dangling,
    /// The block header or payload is not a valid image
    Corrupted,
    /// The access reaches past the mapped heap
    OutOfBounds,
    /// Reclamation found a payload longer than its block
    HeapOverrun,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FaultKind::Dangling => "dangling",
            FaultKind::Corrupted => "corrupted",
            FaultKind::OutOfBounds => "out-of-bounds",
            FaultKind::HeapOverrun => "heap-overrun",
        };
        f.write_str(name)
    }
}

/// An illegal access detected by a storage operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Class of illegal access
    pub kind: FaultKind,
    /// Identity handle (`index << 32 | generation`) or heap offset
    pub address: u64,
    /// Human readable description
    pub message: String,
}

impl FaultRecord {
    pub(crate) fn new(kind: FaultKind, address: u64, message: impl Into<String>) -> Self {
        FaultRecord {
            kind,
            address,
            message: message.into(),
        }
    }
}

impl fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "segmentation fault ({}) at {:#x}: {}",
            self.kind, self.address, self.message
        )
    }
}

/// Raises a fault on the current thread.
///
/// With an active guarded frame the record unwinds to it. Otherwise the
/// fault is unguarded and panics with the record's message. A fault raised
/// while the thread is already unwinding cannot be recovered and aborts.
pub(crate) fn raise(record: FaultRecord) -> ! {
    if std::thread::panicking() {
        tracing::error!(%record, "fault raised while unwinding, aborting");
        std::process::abort();
    }
    if scope::frame_depth() > 0 {
        std::panic::panic_any(record);
    }
    panic!("unguarded {}", record);
}

/// Unwraps a storage outcome, raising the fault on failure
pub(crate) fn check<T>(outcome: std::result::Result<T, FaultRecord>) -> T {
    match outcome {
        Ok(value) => value,
        Err(record) => raise(record),
    }
}
