//! Integration tests for the fault interception scope
//!
//! The interception depth is process-wide, so every test in this file holds
//! `SERIAL` to observe it without interference from the others.

use managed_ptr::fault::{
    frame_depth, interception_depth, is_installed, set_trap_mechanism, PanicHookTrap,
    TrapMechanism,
};
use managed_ptr::{
    guarded, make_from, Error, FaultKind, FaultScope, Heap, HeapConfig, MoveMode, Slot, Value,
};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

static SERIAL: Mutex<()> = parking_lot::const_mutex(());

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "<non-string panic>".to_string()
    }
}

/// Slot whose block was overrun by an unchecked move, plus the neighbor it damaged
fn overrun_slot(heap: &Heap) -> (Slot, Slot) {
    let target = Slot::new_in(heap, "ab").unwrap();
    let neighbor = Slot::new_in(heap, "cd").unwrap();
    make_from(&target)
        .unwrap()
        .move_value(&Value::from("abcdefghijkl"), MoveMode::Unchecked)
        .unwrap();
    (target, neighbor)
}

// =============================================================================
// State Machine
// =============================================================================

#[test]
fn test_nested_entry_and_exit() {
    let _serial = SERIAL.lock();
    assert_eq!(interception_depth(), 0);
    assert!(!is_installed());

    let outer = FaultScope::enter();
    let inner = FaultScope::enter();
    assert_eq!(interception_depth(), 2);

    drop(inner);
    assert_eq!(interception_depth(), 1);
    assert!(is_installed());

    drop(outer);
    assert_eq!(interception_depth(), 0);
    assert!(!is_installed());
}

#[test]
fn test_guarded_exits_on_every_path() {
    let _serial = SERIAL.lock();

    guarded(|| {
        assert_eq!(interception_depth(), 1);
        guarded(|| {
            assert_eq!(interception_depth(), 2);
            Ok(())
        })
    })
    .unwrap();
    assert_eq!(interception_depth(), 0);

    let _ = guarded::<(), _>(|| Err(Error::NullPointer { operation: "test" }));
    assert_eq!(interception_depth(), 0);

    let outcome = panic::catch_unwind(|| guarded::<(), _>(|| panic!("boom")));
    assert_eq!(panic_message(outcome.unwrap_err()), "boom");
    assert_eq!(interception_depth(), 0);
    assert_eq!(frame_depth(), 0);
}

struct CountingTrap {
    installs: Arc<AtomicUsize>,
    uninstalls: Arc<AtomicUsize>,
}

impl TrapMechanism for CountingTrap {
    fn name(&self) -> &str {
        "counting"
    }

    fn install(&mut self) {
        self.installs.fetch_add(1, Ordering::SeqCst);
    }

    fn uninstall(&mut self) {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_trap_installed_once_per_outermost_scope() {
    let _serial = SERIAL.lock();
    let installs = Arc::new(AtomicUsize::new(0));
    let uninstalls = Arc::new(AtomicUsize::new(0));
    set_trap_mechanism(Box::new(CountingTrap {
        installs: installs.clone(),
        uninstalls: uninstalls.clone(),
    }))
    .unwrap();

    {
        let _a = FaultScope::enter();
        let _b = FaultScope::enter();
        let _c = FaultScope::enter();
        assert_eq!(installs.load(Ordering::SeqCst), 1);
        assert!(set_trap_mechanism(Box::new(PanicHookTrap::default())).is_err());
    }
    assert_eq!(uninstalls.load(Ordering::SeqCst), 1);

    guarded(|| Ok(())).unwrap();
    assert_eq!(installs.load(Ordering::SeqCst), 2);
    assert_eq!(uninstalls.load(Ordering::SeqCst), 2);

    set_trap_mechanism(Box::new(PanicHookTrap::default())).unwrap();
}

// =============================================================================
// Guarded vs Unguarded
// =============================================================================

#[test]
fn test_fault_inside_guarded_becomes_segment_violation() {
    let _serial = SERIAL.lock();
    let slot = Slot::new("gone soon").unwrap();
    let ptr = make_from(&slot).unwrap();
    drop(slot);

    let err = guarded(|| ptr.load_raw()).unwrap_err();
    assert!(matches!(
        err,
        Error::SegmentViolation {
            kind: FaultKind::Dangling,
            ..
        }
    ));
    assert_eq!(interception_depth(), 0);
}

#[test]
fn test_same_fault_unguarded_panics() {
    let _serial = SERIAL.lock();
    let slot = Slot::new("gone soon").unwrap();
    let ptr = make_from(&slot).unwrap();
    drop(slot);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| ptr.load_raw()));
    let message = panic_message(outcome.unwrap_err());
    assert!(message.contains("unguarded segmentation fault (dangling)"));
}

#[test]
fn test_recovery_is_per_thread() {
    let _serial = SERIAL.lock();
    let slot = Slot::new(5i64).unwrap();
    let ptr = make_from(&slot).unwrap();
    drop(slot);

    let _scope = FaultScope::enter();
    assert!(is_installed());

    // Installed process-wide, but the other thread has no frame to unwind to
    let worker = thread::spawn(move || ptr.load_raw());
    let joined = worker.join();
    assert!(joined.is_err());
    assert!(panic_message(joined.unwrap_err()).contains("unguarded"));
}

#[test]
fn test_bare_scope_does_not_swallow_faults() {
    let _serial = SERIAL.lock();
    let slot = Slot::new("gone soon").unwrap();
    let ptr = make_from(&slot).unwrap();
    drop(slot);

    let worker = thread::spawn(move || {
        let _scope = FaultScope::enter();
        assert_eq!(frame_depth(), 0);
        ptr.load_raw()
    });
    let joined = worker.join();
    let message = panic_message(joined.unwrap_err());
    assert!(message.contains("unguarded segmentation fault (dangling)"));
    assert_eq!(interception_depth(), 0);
}

#[test]
fn test_threads_share_one_depth_counter() {
    let _serial = SERIAL.lock();
    let barrier = Arc::new(Barrier::new(2));

    let main_scope = FaultScope::enter();
    let worker = {
        let barrier = barrier.clone();
        thread::spawn(move || {
            let scope = FaultScope::enter();
            barrier.wait();
            barrier.wait();
            drop(scope);
        })
    };

    barrier.wait();
    assert_eq!(interception_depth(), 2);
    assert_eq!(frame_depth(), 0);
    barrier.wait();
    worker.join().unwrap();

    assert_eq!(interception_depth(), 1);
    drop(main_scope);
    assert_eq!(interception_depth(), 0);
}

// =============================================================================
// Deferred Reclamation
// =============================================================================

#[test]
fn test_reclamation_fault_caught_by_active_scope() {
    let _serial = SERIAL.lock();
    let heap = Heap::new(HeapConfig::default()).unwrap();
    let (target, neighbor) = overrun_slot(&heap);

    let err = guarded(|| {
        drop(target);
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(
        err,
        Error::SegmentViolation {
            kind: FaultKind::HeapOverrun,
            ..
        }
    ));
    assert!(neighbor.release().is_err());
}

#[test]
fn test_reclamation_fault_without_scope_panics() {
    let _serial = SERIAL.lock();
    let heap = Heap::new(HeapConfig::default()).unwrap();
    let (target, neighbor) = overrun_slot(&heap);

    let outcome = panic::catch_unwind(AssertUnwindSafe(move || drop(target)));
    assert!(panic_message(outcome.unwrap_err()).contains("heap-overrun"));
    assert!(neighbor.release().is_err());
    assert_eq!(heap.stats().quarantined, 2);
}

#[test]
fn test_explicit_release_reports_instead_of_raising() {
    let _serial = SERIAL.lock();
    let heap = Heap::new(HeapConfig::default()).unwrap();
    let (target, neighbor) = overrun_slot(&heap);

    let err = target.release().unwrap_err();
    assert_eq!(err.fault_record().unwrap().kind, FaultKind::HeapOverrun);
    assert!(matches!(
        neighbor.release(),
        Err(Error::SegmentViolation {
            kind: FaultKind::Corrupted,
            ..
        })
    ));
}
