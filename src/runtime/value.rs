use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Runtime value representation
#[derive(Debug, Clone)]
pub enum Value {
    // Primitives
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit integer value
    Int(i64),
    /// 64-bit floating-point value
    Float(f64),
    /// String value
    String(String),

    // Collections (use Arc for large values)
    /// Array of values (reference-counted)
    Array(Arc<Vec<Value>>),
    /// Object with string keys and value fields (reference-counted)
    Object(Arc<HashMap<String, Value>>),

    /// Range value with start and end (exclusive)
    Range {
        /// Start value of the range (inclusive)
        start: i64,
        /// End value of the range (exclusive)
        end: i64,
    },

    // Host resources. These live outside the heap and have no storage boundary,
    // so they can be held in a slot but never pointed at.
    /// Mutex lock
    Lock {
        /// Optional lock name for debugging
        name: Option<String>,
        /// The actual mutex
        inner: Arc<Mutex<()>>,
    },

    /// Atomic integer for lock-free concurrent operations
    AtomicInteger {
        /// The atomic value
        inner: Arc<AtomicI64>,
    },
}

/// Discriminant of a [`Value`], used as the pointer type tag and the storage tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    /// `null`
    Null = 0,
    /// `bool`
    Bool = 1,
    /// `int`
    Int = 2,
    /// `float`
    Float = 3,
    /// `string`
    String = 4,
    /// `array`
    Array = 5,
    /// `object`
    Object = 6,
    /// `range`
    Range = 7,
    /// `lock`
    Lock = 8,
    /// `atomic-integer`
    AtomicInteger = 9,
}

impl ValueKind {
    /// Decodes a storage tag. Host resource kinds are never stored, so their
    /// tags are rejected along with unknown bytes.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::Null),
            1 => Some(ValueKind::Bool),
            2 => Some(ValueKind::Int),
            3 => Some(ValueKind::Float),
            4 => Some(ValueKind::String),
            5 => Some(ValueKind::Array),
            6 => Some(ValueKind::Object),
            7 => Some(ValueKind::Range),
            _ => None,
        }
    }

    /// Storage tag byte
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Returns the type name as a string
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Range => "range",
            ValueKind::Lock => "lock",
            ValueKind::AtomicInteger => "atomic-integer",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Creates an array value from a vector of values
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Arc::new(values))
    }

    /// Creates an object value from a hashmap of fields
    pub fn object(fields: HashMap<String, Value>) -> Self {
        Value::Object(Arc::new(fields))
    }

    /// Creates a new unlocked mutex value
    pub fn lock(name: Option<String>) -> Self {
        Value::Lock {
            name,
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a new atomic integer value
    pub fn atomic_integer(initial: i64) -> Self {
        Value::AtomicInteger {
            inner: Arc::new(AtomicI64::new(initial)),
        }
    }

    /// Returns the value's kind
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Range { .. } => ValueKind::Range,
            Value::Lock { .. } => ValueKind::Lock,
            Value::AtomicInteger { .. } => ValueKind::AtomicInteger,
        }
    }

    /// Returns the type name as a string
    pub fn type_name(&self) -> String {
        self.kind().name().to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, val) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", val)?;
                }
                write!(f, "]")
            }
            Value::Object(obj) => {
                let mut keys: Vec<&String> = obj.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, obj[key])?;
                }
                write!(f, "}}")
            }
            Value::Range { start, end } => write!(f, "[{}..{}]", start, end),
            Value::Lock { name, .. } => {
                if let Some(n) = name {
                    write!(f, "<lock \"{}\">", n)
                } else {
                    write!(f, "<lock>")
                }
            }
            Value::AtomicInteger { inner } => {
                write!(f, "<atomic-integer {}>", inner.load(Ordering::SeqCst))
            }
        }
    }
}

// Host resources compare by identity
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Range { start: s1, end: e1 }, Value::Range { start: s2, end: e2 }) => {
                s1 == s2 && e1 == e2
            }
            (Value::Lock { inner: a, .. }, Value::Lock { inner: b, .. }) => Arc::ptr_eq(a, b),
            (Value::AtomicInteger { inner: a }, Value::AtomicInteger { inner: b }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::array(values)
    }
}
