use std::fmt;
use std::sync::Arc;

use super::heap::{Heap, Identity};
use crate::error::{Error, Result};
use crate::fault::{self, guarded};
use crate::runtime::Value;

/// Owning handle to a value held by the managed runtime.
///
/// A slot is what a variable binds to. Cloning a slot creates an alias of the
/// same storage; the storage is reclaimed when the last alias is dropped or
/// explicitly released. Host resources (locks, atomic integers, collections
/// containing them) are held outside the heap and cannot be pointed at.
#[derive(Clone)]
pub struct Slot {
    inner: Arc<SlotInner>,
}

enum SlotInner {
    Stored(Stored),
    Host(Value),
}

struct Stored {
    heap: Heap,
    identity: Identity,
    released: bool,
}

impl Drop for Stored {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(record) = self.heap.release(&self.identity) {
            if std::thread::panicking() {
                tracing::error!(%record, "reclamation fault during unwinding, block quarantined");
                return;
            }
            fault::raise(record);
        }
    }
}

impl Slot {
    /// Stores `value` on the global heap
    pub fn new(value: impl Into<Value>) -> Result<Self> {
        Self::new_in(Heap::global(), value)
    }

    /// Stores `value` on `heap`
    pub fn new_in(heap: &Heap, value: impl Into<Value>) -> Result<Self> {
        let value = value.into();
        let inner = match heap.allocate(&value) {
            Ok(identity) => SlotInner::Stored(Stored {
                heap: heap.clone(),
                identity,
                released: false,
            }),
            Err(Error::UnsupportedType { .. }) => SlotInner::Host(value),
            Err(e) => return Err(e),
        };
        Ok(Slot {
            inner: Arc::new(inner),
        })
    }

    /// Reads the current value
    pub fn get(&self) -> Result<Value> {
        match &*self.inner {
            SlotInner::Stored(stored) => guarded(|| Ok(fault::check(stored.identity.read()))),
            SlotInner::Host(value) => Ok(value.clone()),
        }
    }

    /// Returns true if the value lives on a heap and can be pointed at
    pub fn is_addressable(&self) -> bool {
        matches!(&*self.inner, SlotInner::Stored(_))
    }

    /// Number of live aliases, this one included
    pub fn alias_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Drops this alias, reclaiming the storage if it was the last one.
    ///
    /// Unlike a plain drop, a reclamation fault (an earlier unchecked move
    /// overran the block) is returned as [`Error::SegmentViolation`] instead
    /// of being raised at the drop site.
    pub fn release(self) -> Result<()> {
        // into_inner hands the storage to exactly one of several racing releases
        match Arc::into_inner(self.inner) {
            Some(SlotInner::Stored(mut stored)) => {
                let outcome = stored.heap.release(&stored.identity);
                stored.released = true;
                outcome.map_err(Error::from)
            }
            Some(SlotInner::Host(_)) | None => Ok(()),
        }
    }

    pub(crate) fn identity(&self) -> std::result::Result<&Identity, &Value> {
        match &*self.inner {
            SlotInner::Stored(stored) => Ok(&stored.identity),
            SlotInner::Host(value) => Err(value),
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            SlotInner::Stored(stored) => f
                .debug_struct("Slot")
                .field("identity", &stored.identity)
                .field("aliases", &self.alias_count())
                .finish(),
            SlotInner::Host(value) => f.debug_struct("Slot").field("host", value).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use crate::memory::HeapConfig;

    #[test]
    fn test_aliases_share_storage() {
        let heap = Heap::new(HeapConfig::default()).unwrap();
        let slot = Slot::new_in(&heap, "shared").unwrap();
        let alias = slot.clone();
        assert_eq!(slot.alias_count(), 2);
        assert_eq!(alias.get().unwrap(), Value::from("shared"));

        drop(alias);
        assert_eq!(heap.stats().live_slots, 1);
        drop(slot);
        assert_eq!(heap.stats().live_slots, 0);
    }

    #[test]
    fn test_host_values_are_held_off_heap() {
        let lock = Value::lock(Some("io".to_string()));
        let slot = Slot::new(lock.clone()).unwrap();
        assert!(!slot.is_addressable());
        assert_eq!(slot.get().unwrap(), lock);
        assert!(slot.release().is_ok());
    }

    #[test]
    fn test_release_keeps_storage_while_aliased() {
        let heap = Heap::new(HeapConfig::default()).unwrap();
        let slot = Slot::new_in(&heap, 3i64).unwrap();
        let alias = slot.clone();

        slot.release().unwrap();
        assert_eq!(alias.get().unwrap(), Value::Int(3));
        alias.release().unwrap();
        assert_eq!(heap.stats().live_slots, 0);
    }

    #[test]
    fn test_release_reports_overrun() {
        let heap = Heap::new(HeapConfig::default()).unwrap();
        let slot = Slot::new_in(&heap, "ab").unwrap();
        let neighbor = Slot::new_in(&heap, "cd").unwrap();
        slot.identity()
            .unwrap()
            .write(crate::runtime::ValueKind::String, b"abcdef")
            .unwrap();

        let err = slot.release().unwrap_err();
        assert!(matches!(
            err,
            Error::SegmentViolation {
                kind: FaultKind::HeapOverrun,
                ..
            }
        ));
        // The overrun landed in the neighbor's header
        assert!(matches!(
            neighbor.release(),
            Err(Error::SegmentViolation {
                kind: FaultKind::Corrupted,
                ..
            })
        ));
        assert_eq!(heap.stats().quarantined, 2);
    }

    #[test]
    fn test_concurrent_release_reports_overrun_once() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..50 {
            let heap = Heap::new(HeapConfig::default()).unwrap();
            let slot = Slot::new_in(&heap, "ab").unwrap();
            let neighbor = Slot::new_in(&heap, "cd").unwrap();
            slot.identity()
                .unwrap()
                .write(crate::runtime::ValueKind::String, b"abcdef")
                .unwrap();

            let aliases: Vec<Slot> = (0..4).map(|_| slot.clone()).collect();
            drop(slot);

            let barrier = Arc::new(Barrier::new(aliases.len()));
            let workers: Vec<_> = aliases
                .into_iter()
                .map(|alias| {
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        alias.release()
                    })
                })
                .collect();

            let failures = workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .filter(|outcome| outcome.is_err())
                .count();
            assert_eq!(failures, 1);
            assert!(neighbor.release().is_err());
        }
    }
}
