//! Runtime values for configuration evaluation.
//!
//! Evaluation is dynamically typed: every expression produces a [`Value`]
//! from a small tagged union, and argument schemas coerce values into the
//! shapes components declare. Two variants need care:
//!
//! - [`Secret`] never renders its contents; error messages and debug output
//!   show `(secret)`.
//! - [`Capsule`] is an opaque shared handle used to pass live objects
//!   (receivers, auth handlers) between components by reference. It cannot
//!   be serialized; equality is pointer identity.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// A dynamically typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Duration(Duration),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
    Secret(Secret),
    Capsule(Capsule),
}

/// The kind of a [`Value`], used by schemas and coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Duration,
    /// A list whose elements coerce to the inner kind.
    List(Box<ValueKind>),
    Object,
    Secret,
    /// A string that must compile as a regular expression.
    Regex,
    Capsule,
    /// Accept any value unchanged.
    Any,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::String => write!(f, "string"),
            ValueKind::Duration => write!(f, "duration"),
            ValueKind::List(inner) => write!(f, "list({})", inner),
            ValueKind::Object => write!(f, "object"),
            ValueKind::Secret => write!(f, "secret"),
            ValueKind::Regex => write!(f, "regex"),
            ValueKind::Capsule => write!(f, "capsule"),
            ValueKind::Any => write!(f, "any"),
        }
    }
}

/// A string value that must never appear in logs or error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying secret text.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(secret)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(secret)")
    }
}

/// An opaque handle passed between components by reference.
#[derive(Clone)]
pub struct Capsule {
    type_name: &'static str,
    handle: Arc<dyn Any + Send + Sync>,
}

impl Capsule {
    /// Wrap a shared value in a capsule.
    pub fn new<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            handle: value,
        }
    }

    /// The Rust type name of the wrapped value, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Downcast the capsule back to its concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.handle).downcast::<T>().ok()
    }
}

impl PartialEq for Capsule {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl std::fmt::Debug for Capsule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "capsule({})", self.type_name)
    }
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Duration(_) => ValueKind::Duration,
            Value::List(_) => ValueKind::List(Box::new(ValueKind::Any)),
            Value::Object(_) => ValueKind::Object,
            Value::Secret(_) => ValueKind::Secret,
            Value::Capsule(_) => ValueKind::Capsule,
        }
    }

    /// Short kind name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Duration(_) => "duration",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Secret(_) => "secret",
            Value::Capsule(_) => "capsule",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Value::Duration(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_capsule(&self) -> Option<&Capsule> {
        match self {
            Value::Capsule(c) => Some(c),
            _ => None,
        }
    }

    /// Coerce this value to the requested kind.
    ///
    /// The coercion table:
    /// int → float; int/float → duration (seconds); duration strings
    /// (`"1h30m"`) → duration; string → secret; string → regex (validated);
    /// lists coerce element-wise; everything coerces to its own kind.
    pub fn coerce(self, kind: &ValueKind) -> Result<Value, CoerceError> {
        match (self, kind) {
            (value, ValueKind::Any) => Ok(value),
            (Value::Null, ValueKind::Null) => Ok(Value::Null),
            (Value::Bool(b), ValueKind::Bool) => Ok(Value::Bool(b)),
            (Value::Int(n), ValueKind::Int) => Ok(Value::Int(n)),
            (Value::Int(n), ValueKind::Float) => Ok(Value::Float(n as f64)),
            (Value::Float(x), ValueKind::Float) => Ok(Value::Float(x)),
            (Value::Float(x), ValueKind::Int) if x.fract() == 0.0 => Ok(Value::Int(x as i64)),
            (Value::String(s), ValueKind::String) => Ok(Value::String(s)),
            (Value::Duration(d), ValueKind::Duration) => Ok(Value::Duration(d)),
            (Value::Int(n), ValueKind::Duration) if n >= 0 => {
                Ok(Value::Duration(Duration::from_secs(n as u64)))
            }
            (Value::Float(x), ValueKind::Duration) if x >= 0.0 => {
                Ok(Value::Duration(Duration::from_secs_f64(x)))
            }
            (Value::String(s), ValueKind::Duration) => parse_duration_str(&s)
                .map(Value::Duration)
                .ok_or_else(|| CoerceError {
                    expected: kind.clone(),
                    actual: "string",
                }),
            (Value::String(s), ValueKind::Secret) => Ok(Value::Secret(Secret::new(s))),
            (Value::Secret(s), ValueKind::Secret) => Ok(Value::Secret(s)),
            (Value::String(s), ValueKind::Regex) => match regex::Regex::new(&s) {
                Ok(_) => Ok(Value::String(s)),
                Err(_) => Err(CoerceError {
                    expected: kind.clone(),
                    actual: "string",
                }),
            },
            (Value::List(items), ValueKind::List(inner)) => {
                let coerced = items
                    .into_iter()
                    .map(|item| item.coerce(inner))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(coerced))
            }
            (Value::Object(fields), ValueKind::Object) => Ok(Value::Object(fields)),
            (Value::Capsule(c), ValueKind::Capsule) => Ok(Value::Capsule(c)),
            (value, kind) => Err(CoerceError {
                expected: kind.clone(),
                actual: value.kind_name(),
            }),
        }
    }
}

/// Failure to coerce a value to a schema kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoerceError {
    pub expected: ValueKind,
    pub actual: &'static str,
}

impl std::fmt::Display for CoerceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for CoerceError {}

/// Parse a chained duration string (`"1h30m"`, `"250ms"`).
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let (num, tail) = rest.split_at(digits);
        let value: f64 = num.parse().ok()?;
        let (factor, unit_len) = if tail.starts_with("ns") {
            (1e-9, 2)
        } else if tail.starts_with("us") {
            (1e-6, 2)
        } else if tail.starts_with("ms") {
            (1e-3, 2)
        } else if tail.starts_with('s') {
            (1.0, 1)
        } else if tail.starts_with('m') {
            (60.0, 1)
        } else if tail.starts_with('h') {
            (3600.0, 1)
        } else {
            return None;
        };
        total += Duration::from_secs_f64(value * factor);
        rest = &tail[unit_len..];
    }
    Some(total)
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Duration(d) => write!(f, "{:?}", d),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Secret(s) => write!(f, "{}", s),
            Value::Capsule(c) => write!(f, "{:?}", c),
        }
    }
}

// Serialization is for status surfaces only: secrets stay redacted and
// capsules serialize as their type marker.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Duration(d) => serializer.serialize_str(&format!("{:?}", d)),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Secret(_) => serializer.serialize_str("(secret)"),
            Value::Capsule(c) => serializer.serialize_str(&format!("capsule({})", c.type_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_to_float_coercion() {
        assert_eq!(
            Value::Int(3).coerce(&ValueKind::Float),
            Ok(Value::Float(3.0))
        );
    }

    #[test]
    fn test_number_to_duration_coercion() {
        assert_eq!(
            Value::Int(90).coerce(&ValueKind::Duration),
            Ok(Value::Duration(Duration::from_secs(90)))
        );
        assert_eq!(
            Value::Float(0.25).coerce(&ValueKind::Duration),
            Ok(Value::Duration(Duration::from_millis(250)))
        );
    }

    #[test]
    fn test_duration_string_coercion() {
        assert_eq!(
            Value::String("1h30m".to_string()).coerce(&ValueKind::Duration),
            Ok(Value::Duration(Duration::from_secs(5400)))
        );
        assert!(
            Value::String("abc".to_string())
                .coerce(&ValueKind::Duration)
                .is_err()
        );
    }

    #[test]
    fn test_string_to_secret() {
        let coerced = Value::String("hunter2".to_string())
            .coerce(&ValueKind::Secret)
            .unwrap();
        match &coerced {
            Value::Secret(s) => assert_eq!(s.reveal(), "hunter2"),
            other => panic!("expected secret, got {:?}", other),
        }
        // Neither Debug nor Display leaks the content.
        assert!(!format!("{:?}", coerced).contains("hunter2"));
        assert!(!format!("{}", coerced).contains("hunter2"));
    }

    #[test]
    fn test_regex_coercion_validates() {
        assert!(
            Value::String("^foo$".to_string())
                .coerce(&ValueKind::Regex)
                .is_ok()
        );
        assert!(
            Value::String("(unclosed".to_string())
                .coerce(&ValueKind::Regex)
                .is_err()
        );
    }

    #[test]
    fn test_list_elementwise_coercion() {
        let value = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let coerced = value
            .coerce(&ValueKind::List(Box::new(ValueKind::Float)))
            .unwrap();
        assert_eq!(coerced, Value::List(vec![Value::Float(1.0), Value::Float(2.0)]));
    }

    #[test]
    fn test_mismatch_reports_kinds() {
        let err = Value::Bool(true).coerce(&ValueKind::Int).unwrap_err();
        assert_eq!(err.actual, "bool");
    }

    #[test]
    fn test_capsule_identity() {
        let shared = Arc::new(42u32);
        let a = Capsule::new(Arc::clone(&shared));
        let b = Capsule::new(shared);
        let c = Capsule::new(Arc::new(42u32));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast::<u32>().as_deref(), Some(&42));
    }
}
