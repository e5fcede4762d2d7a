//! Parameter decay bridge
//!
//! Lets a callable declare which of its parameters are pointer-typed. When it
//! is invoked with slots, pointer-typed positions receive a [`Pointer`] built
//! with [`make_from`] and the other positions receive the slot's current
//! value, the way an array argument decays to a pointer in C.

use crate::error::{Error, Result};
use crate::memory::Slot;
use crate::pointer::{make_from, Pointer};
use crate::runtime::Value;

/// Declared kind of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Passed by value
    Value,
    /// Decays to a pointer to the argument's storage
    Pointer,
}

/// Declared parameter list of a bridged callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Callable name, used in error messages
    pub name: String,
    /// Parameter kinds in positional order
    pub params: Vec<ParamKind>,
}

impl Signature {
    /// Creates a signature
    pub fn new(name: impl Into<String>, params: Vec<ParamKind>) -> Self {
        Signature {
            name: name.into(),
            params,
        }
    }
}

/// An argument after decay
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Value parameter
    Value(Value),
    /// Pointer parameter
    Pointer(Pointer),
}

impl Arg {
    /// Returns the pointer of a pointer argument
    pub fn as_pointer(&self) -> Result<&Pointer> {
        match self {
            Arg::Pointer(ptr) => Ok(ptr),
            Arg::Value(value) => Err(Error::TypeError {
                expected: "pointer".to_string(),
                got: value.type_name(),
            }),
        }
    }

    /// Returns the value of a value argument
    pub fn as_value(&self) -> Result<&Value> {
        match self {
            Arg::Value(value) => Ok(value),
            Arg::Pointer(_) => Err(Error::TypeError {
                expected: "value".to_string(),
                got: "pointer".to_string(),
            }),
        }
    }
}

/// Converts positional slots into arguments according to `signature`
pub fn decay(signature: &Signature, args: &[Slot]) -> Result<Vec<Arg>> {
    if args.len() != signature.params.len() {
        return Err(Error::InvalidArguments {
            tool: signature.name.clone(),
            reason: format!(
                "expected {} arguments, got {}",
                signature.params.len(),
                args.len()
            ),
        });
    }

    signature
        .params
        .iter()
        .zip(args)
        .map(|(kind, slot)| match kind {
            ParamKind::Pointer => make_from(slot).map(Arg::Pointer),
            ParamKind::Value => slot.get().map(Arg::Value),
        })
        .collect()
}

/// A callable with pointer-typed parameters
pub trait PointerTool: Send + Sync {
    /// Declared parameters
    fn signature(&self) -> Signature;

    /// Runs the tool on decayed arguments
    fn call(&self, args: Vec<Arg>) -> Result<Value>;
}

/// Decays `args` for `tool` and calls it
pub fn invoke(tool: &dyn PointerTool, args: &[Slot]) -> Result<Value> {
    let signature = tool.signature();
    let decayed = decay(&signature, args)?;
    tracing::debug!(tool = %signature.name, args = decayed.len(), "invoking bridged tool");
    tool.call(decayed)
}
