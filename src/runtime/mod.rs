//! Managed runtime values

mod value;

pub use value::{Value, ValueKind};
