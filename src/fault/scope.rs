use parking_lot::Mutex;
use std::cell::Cell;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};

use super::trap::{PanicHookTrap, TrapMechanism};
use super::FaultRecord;
use crate::error::{Error, Result};

// =============================================================================
// Global State
// =============================================================================

struct Interceptor {
    depth: usize,
    trap: Box<dyn TrapMechanism>,
}

lazy_static::lazy_static! {
    /// Process-wide interception state. `depth` only changes under this lock.
    static ref INTERCEPTOR: Mutex<Interceptor> = Mutex::new(Interceptor {
        depth: 0,
        trap: Box::new(PanicHookTrap::default()),
    });
}

thread_local! {
    /// Guarded frames entered on this thread
    static FRAMES: Cell<usize> = const { Cell::new(0) };
}

/// Number of guarded frames active on the current thread
pub fn frame_depth() -> usize {
    FRAMES.with(|frames| frames.get())
}

/// Process-wide interception depth (0 means `Uninstalled`)
pub fn interception_depth() -> usize {
    INTERCEPTOR.lock().depth
}

/// Returns true while the trap mechanism is installed
pub fn is_installed() -> bool {
    interception_depth() > 0
}

/// Replaces the trap mechanism.
///
/// Only allowed while no scope is active anywhere in the process.
pub fn set_trap_mechanism(trap: Box<dyn TrapMechanism>) -> Result<()> {
    let mut interceptor = INTERCEPTOR.lock();
    if interceptor.depth > 0 {
        return Err(Error::InvalidConfig(format!(
            "cannot replace trap mechanism '{}' while installed (depth {})",
            interceptor.trap.name(),
            interceptor.depth
        )));
    }
    tracing::debug!(
        from = interceptor.trap.name(),
        to = trap.name(),
        "trap mechanism replaced"
    );
    interceptor.trap = trap;
    Ok(())
}

// =============================================================================
// Scope
// =============================================================================

/// RAII guard for one level of fault interception.
///
/// Entering installs the trap mechanism when the process-wide depth is zero;
/// dropping the outermost guard uninstalls it. Guards are tied to the thread
/// that entered them.
///
/// A bare scope keeps the trap installed but is not a recovery frame: a fault
/// raised under it alone is still unguarded. Use [`guarded`] to convert
/// faults into errors.
#[must_use = "interception ends when the scope is dropped"]
pub struct FaultScope {
    _thread_bound: PhantomData<*const ()>,
}

impl FaultScope {
    /// Enters a (possibly nested) interception scope
    pub fn enter() -> Self {
        {
            let mut interceptor = INTERCEPTOR.lock();
            if interceptor.depth == 0 {
                interceptor.trap.install();
                tracing::debug!(trap = interceptor.trap.name(), "fault interception installed");
            }
            interceptor.depth += 1;
        }
        FaultScope {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for FaultScope {
    fn drop(&mut self) {
        let mut interceptor = INTERCEPTOR.lock();
        interceptor.depth = interceptor.depth.saturating_sub(1);
        if interceptor.depth == 0 {
            interceptor.trap.uninstall();
            tracing::debug!(trap = interceptor.trap.name(), "fault interception uninstalled");
        }
    }
}

impl std::fmt::Debug for FaultScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultScope")
            .field("depth", &interception_depth())
            .finish()
    }
}

/// Marks the current thread as able to recover from faults until dropped
struct RecoveryFrame;

impl RecoveryFrame {
    fn push() -> Self {
        FRAMES.with(|frames| frames.set(frames.get() + 1));
        RecoveryFrame
    }
}

impl Drop for RecoveryFrame {
    fn drop(&mut self) {
        FRAMES.with(|frames| frames.set(frames.get().saturating_sub(1)));
    }
}

/// Runs `f` inside a fault interception scope.
///
/// The scope is exited on every path. A fault raised inside `f` on this
/// thread is returned as [`Error::SegmentViolation`]; `f`'s own result is
/// returned unchanged, and any other panic resumes after the scope exits.
pub fn guarded<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let scope = FaultScope::enter();
    let frame = RecoveryFrame::push();
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    drop(frame);
    drop(scope);

    match outcome {
        Ok(result) => result,
        Err(payload) => match payload.downcast::<FaultRecord>() {
            Ok(record) => {
                tracing::debug!(%record, "fault intercepted");
                Err(Error::from(*record))
            }
            Err(other) => panic::resume_unwind(other),
        },
    }
}
