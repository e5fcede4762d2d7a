//! Error types for managed-ptr

use thiserror::Error;

use crate::fault::{FaultKind, FaultRecord};

/// Pointer runtime errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Pointer errors
    /// Dereference or move attempted through a null pointer
    ///
    /// **Triggered by:** `to_null().dereference()`, or a pointer built from `NULL`
    /// **Prevention:** Check `Pointer::is_null` before using a pointer that may be null
    #[error("Null pointer: cannot {operation} through a null pointer")]
    NullPointer {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// A guarded operation touched storage that is absent or inaccessible
    ///
    /// **Triggered by:** Dereferencing a pointer whose slot was released, reading a
    /// block whose header was overwritten by an unchecked move, writing past the
    /// mapped heap
    #[error("Segment violation at {address:#x} ({kind}): {message}")]
    SegmentViolation {
        /// Offending identity handle or heap address
        address: u64,
        /// Class of illegal access
        kind: FaultKind,
        /// Fault description
        message: String,
    },

    /// A checked move's payload exceeds the pointer's captured size
    ///
    /// **Triggered by:** `move_value(&v, MoveMode::Checked)` with `size(v) > captured_size`
    /// **Recovery:** No mutation happened; retry with a smaller value or `MoveMode::Unchecked`
    #[error("Size mismatch: {requested} bytes do not fit in {captured} captured bytes")]
    SizeMismatch {
        /// Size captured when the pointer was bound
        captured: usize,
        /// Storage size of the value being moved in
        requested: usize,
    },

    /// A value cannot be given a stable identity or storage size
    #[error("Unsupported type: {type_name} has no storage boundary")]
    UnsupportedType {
        /// Type of the offending value
        type_name: String,
    },

    // Runtime errors
    /// Type mismatch error
    #[error("Type error: expected {expected}, got {got}")]
    TypeError {
        /// Expected type
        expected: String,
        /// Actual type
        got: String,
    },

    /// Heap page limit exceeded
    #[error("Out of memory (limit: {0} bytes)")]
    OutOfMemory(usize),

    /// Invalid arguments provided to a bridged tool
    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidArguments {
        /// Tool name
        tool: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Heap configuration could not be parsed or is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Fatal error that cannot be recovered from
    Fatal,
    /// Recoverable error that may be retried
    Recoverable,
    /// Warning that doesn't prevent execution
    Warning,
}

impl Error {
    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::SegmentViolation { .. } => ErrorSeverity::Fatal,
            Error::OutOfMemory(_) => ErrorSeverity::Fatal,

            Error::SizeMismatch { .. } => ErrorSeverity::Recoverable,
            Error::InvalidArguments { .. } => ErrorSeverity::Recoverable,
            Error::InvalidConfig(_) => ErrorSeverity::Recoverable,

            Error::NullPointer { .. } => ErrorSeverity::Warning,
            Error::UnsupportedType { .. } => ErrorSeverity::Warning,
            Error::TypeError { .. } => ErrorSeverity::Warning,
        }
    }

    /// Returns the fault record behind a segment violation
    pub fn fault_record(&self) -> Option<FaultRecord> {
        match self {
            Error::SegmentViolation {
                address,
                kind,
                message,
            } => Some(FaultRecord {
                kind: *kind,
                address: *address,
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

impl From<FaultRecord> for Error {
    fn from(record: FaultRecord) -> Self {
        Error::SegmentViolation {
            address: record.address,
            kind: record.kind,
            message: record.message,
        }
    }
}

/// Result type for pointer operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_violation_round_trips_record() {
        let record = FaultRecord {
            kind: FaultKind::Dangling,
            address: 0x2_0000_0003,
            message: "slot released".to_string(),
        };
        let err = Error::from(record.clone());
        assert_eq!(err.fault_record(), Some(record));
        assert!(err.to_string().contains("0x200000003"));
        assert_eq!(err.classify(), ErrorSeverity::Fatal);
    }

    #[test]
    fn test_size_mismatch_message() {
        let err = Error::SizeMismatch {
            captured: 11,
            requested: 46,
        };
        assert_eq!(
            err.to_string(),
            "Size mismatch: 46 bytes do not fit in 11 captured bytes"
        );
        assert_eq!(err.classify(), ErrorSeverity::Recoverable);
        assert!(err.fault_record().is_none());
    }
}
