//! Trap mechanisms behind the fault interception scope

use std::panic::{self, PanicHookInfo};
use std::sync::Arc;

use super::{scope, FaultRecord};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Platform hook that the interception scope installs on first entry and
/// removes on last exit.
///
/// `install` and `uninstall` are always called in pairs, with the scope's
/// mutex held.
pub trait TrapMechanism: Send {
    /// Mechanism name, for logs
    fn name(&self) -> &str;

    /// Start intercepting faults
    fn install(&mut self);

    /// Restore the behavior that was in place before `install`
    fn uninstall(&mut self);
}

/// Default trap: a process panic hook.
///
/// Faults travel as `FaultRecord` panic payloads. While installed, the hook
/// keeps payloads raised on threads with an active guarded frame silent, so a
/// converted fault leaves no trace on stderr. Every other panic is forwarded
/// to the hook that was in place at install time.
#[derive(Default)]
pub struct PanicHookTrap {
    previous: Option<Arc<PanicHook>>,
}

impl TrapMechanism for PanicHookTrap {
    fn name(&self) -> &str {
        "panic-hook"
    }

    fn install(&mut self) {
        // Still chained from an uninstall that ran during unwinding
        if self.previous.is_some() {
            return;
        }
        // set_hook panics on an unwinding thread
        if std::thread::panicking() {
            tracing::warn!("cannot install panic hook while unwinding");
            return;
        }
        let previous = Arc::new(panic::take_hook());
        let chained = Arc::clone(&previous);
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<FaultRecord>() && scope::frame_depth() > 0 {
                return;
            }
            (**chained)(info);
        }));
        self.previous = Some(previous);
    }

    fn uninstall(&mut self) {
        if self.previous.is_some() && std::thread::panicking() {
            // Restored by the next uninstall that runs outside a panic
            tracing::warn!("cannot restore panic hook while unwinding");
            return;
        }
        let Some(previous) = self.previous.take() else {
            return;
        };
        // Dropping our hook releases its clone, so the original box can
        // usually be put back as is.
        drop(panic::take_hook());
        match Arc::try_unwrap(previous) {
            Ok(hook) => panic::set_hook(hook),
            Err(shared) => panic::set_hook(Box::new(move |info| (**shared)(info))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trap_with_previous() -> PanicHookTrap {
        let previous: PanicHook = Box::new(|_: &PanicHookInfo<'_>| {});
        PanicHookTrap {
            previous: Some(Arc::new(previous)),
        }
    }

    struct UninstallOnUnwind<'a>(&'a mut PanicHookTrap);

    impl Drop for UninstallOnUnwind<'_> {
        fn drop(&mut self) {
            assert!(std::thread::panicking());
            self.0.uninstall();
        }
    }

    #[test]
    fn test_uninstall_while_unwinding_keeps_previous_hook() {
        let mut trap = trap_with_previous();
        let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _guard = UninstallOnUnwind(&mut trap);
            panic::resume_unwind(Box::new("unwinding"));
        }));
        assert!(outcome.is_err());
        assert!(trap.previous.is_some());
        trap.previous = None;
    }

    #[test]
    fn test_install_does_not_chain_twice() {
        let mut trap = trap_with_previous();
        let before = trap.previous.clone().unwrap();
        trap.install();
        assert!(Arc::ptr_eq(&before, trap.previous.as_ref().unwrap()));
        trap.previous = None;
    }
}
