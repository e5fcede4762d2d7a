//! C-style pointers over managed storage
//!
//! A [`Pointer`] names a slot's storage by [`Identity`] and remembers the
//! storage size it saw when it was bound. Dereference reads whatever the
//! storage currently holds. [`Pointer::move_value`] overwrites the storage in
//! place, so every alias of the slot and every pointer sharing the identity
//! sees the new value. [`Pointer::rebind`] only repoints the pointer.
//!
//! ```
//! use managed_ptr::{make_from, MoveMode, Slot, Value, Error};
//!
//! # fn main() -> managed_ptr::Result<()> {
//! let greeting = Slot::new("hello world")?;
//! let ptr = make_from(&greeting)?;
//! assert_eq!(ptr.dereference()?, Value::from("hello world"));
//!
//! ptr.move_value(&Value::from("HI"), MoveMode::Checked)?;
//! assert_eq!(greeting.get()?, Value::from("HI"));
//!
//! let long = Value::from("this text is far longer than eleven characters");
//! assert!(matches!(
//!     ptr.move_value(&long, MoveMode::Checked),
//!     Err(Error::SizeMismatch { captured: 11, requested: 46 })
//! ));
//! assert_eq!(ptr.dereference()?, Value::from("HI"));
//! # Ok(())
//! # }
//! ```

use std::fmt;

use crate::error::{Error, Result};
use crate::fault::{self, guarded};
use crate::memory::{codec, Identity, Slot};
use crate::runtime::{Value, ValueKind};

/// The NULL sentinel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Null;

/// The NULL sentinel. Pointers built from it are null.
pub static NULL: Null = Null;

/// Bounds policy for [`Pointer::move_value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    /// Reject values larger than the captured size
    #[default]
    Checked,
    /// Allow values larger than the captured size. The excess bytes are
    /// written past the end of the storage block and can corrupt whatever
    /// storage follows it.
    Unchecked,
}

/// Anything a pointer can be bound to
pub trait PointerTarget {
    /// Builds a pointer to this target
    fn to_pointer(&self) -> Result<Pointer>;
}

impl PointerTarget for Null {
    fn to_pointer(&self) -> Result<Pointer> {
        Ok(to_null())
    }
}

impl PointerTarget for Slot {
    fn to_pointer(&self) -> Result<Pointer> {
        let identity = self.identity().map_err(|value| Error::UnsupportedType {
            type_name: value.type_name(),
        })?;
        let (type_tag, captured_size) = guarded(|| Ok(fault::check(identity.capture())))?;
        Ok(Pointer {
            identity: Some(identity.clone()),
            type_tag,
            captured_size,
        })
    }
}

/// Builds a pointer to `target`.
///
/// The captured size is the size of the value currently stored. If an earlier
/// unchecked move overran the slot's block, that size exceeds the block and
/// checked moves through the new pointer can still spill into the next block.
/// Such captures are logged at `warn`.
pub fn make_from<T: PointerTarget + ?Sized>(target: &T) -> Result<Pointer> {
    target.to_pointer()
}

/// Builds a null pointer
pub fn to_null() -> Pointer {
    Pointer {
        identity: None,
        type_tag: ValueKind::Null,
        captured_size: 0,
    }
}

/// Address-like handle to a slot's storage, or null
#[derive(Clone)]
pub struct Pointer {
    identity: Option<Identity>,
    type_tag: ValueKind,
    captured_size: usize,
}

impl Pointer {
    /// Returns true for a null pointer
    pub fn is_null(&self) -> bool {
        self.identity.is_none()
    }

    /// Identity of the referenced storage, `None` when null
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Kind of the value the pointer was bound to
    pub fn type_tag(&self) -> ValueKind {
        self.type_tag
    }

    /// Storage size captured at binding time. Moves never update it.
    pub fn captured_size(&self) -> usize {
        self.captured_size
    }

    /// Packed identity handle, `0` for null
    pub fn address(&self) -> u64 {
        self.identity.as_ref().map_or(0, Identity::address)
    }

    /// Repoints this pointer at `target` without touching either storage.
    ///
    /// On error the pointer is left unchanged.
    pub fn rebind<T: PointerTarget + ?Sized>(&mut self, target: &T) -> Result<()> {
        *self = target.to_pointer()?;
        Ok(())
    }

    /// Reads the current value behind the pointer
    pub fn dereference(&self) -> Result<Value> {
        let identity = self.require("dereference")?;
        guarded(|| Ok(fault::check(identity.read())))
    }

    /// Reads the current value without entering a guarded scope.
    ///
    /// Inside a caller's [`guarded`] an illegal access becomes
    /// [`Error::SegmentViolation`].
    ///
    /// # Panics
    ///
    /// On an illegal access when no guarded scope is active on this thread.
    pub fn load_raw(&self) -> Result<Value> {
        let identity = self.require("dereference")?;
        Ok(fault::check(identity.read()))
    }

    /// Overwrites the referenced storage with `value`.
    ///
    /// With [`MoveMode::Checked`] a value whose storage size exceeds
    /// [`captured_size`](Self::captured_size) is rejected with
    /// [`Error::SizeMismatch`] and nothing is written. With
    /// [`MoveMode::Unchecked`] it is written anyway, past the end of the block.
    pub fn move_value(&self, value: &Value, mode: MoveMode) -> Result<()> {
        let identity = self.require("move")?;
        let bytes = codec::encode(value)?;

        guarded(|| {
            fault::check(identity.validate());
            if bytes.len() > self.captured_size {
                if mode == MoveMode::Checked {
                    return Err(Error::SizeMismatch {
                        captured: self.captured_size,
                        requested: bytes.len(),
                    });
                }
                tracing::warn!(
                    address = identity.address(),
                    captured = self.captured_size,
                    requested = bytes.len(),
                    "unchecked move past captured size"
                );
            }
            fault::check(identity.write(value.kind(), &bytes));
            Ok(())
        })
    }

    fn require(&self, operation: &'static str) -> Result<&Identity> {
        self.identity
            .as_ref()
            .ok_or(Error::NullPointer { operation })
    }
}

// Identity equality, never value equality
impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Pointer {}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Some(identity) => f
                .debug_struct("Pointer")
                .field("identity", identity)
                .field("type_tag", &self.type_tag)
                .field("captured_size", &self.captured_size)
                .finish(),
            None => write!(f, "Pointer(NULL)"),
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null pointer>")
        } else {
            write!(f, "<pointer to {} at {:#x}>", self.type_tag, self.address())
        }
    }
}
