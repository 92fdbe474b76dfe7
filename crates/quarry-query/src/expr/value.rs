//! Runtime values carried by constant nodes and produced by client evaluation.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// A value that can appear in a constant node or a parameter binding.
///
/// Floats compare and hash by their bit pattern so that `Value` can be used
/// inside cache keys.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Enum(EnumValue),
    List(Arc<[Value]>),
    /// Object with named fields (closure displays, captured instances, contexts)
    Record(Arc<Record>),
}

/// A named enum constant such as `StringComparison.Ordinal`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub ty: Arc<str>,
    pub name: Arc<str>,
}

/// Object value with a type name and fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub type_name: Arc<str>,
    pub fields: BTreeMap<Arc<str>, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field (builder style)
    pub fn with_field(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// String comparison modes used by the canonical `String.Compare` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringComparison {
    Ordinal,
    OrdinalIgnoreCase,
}

impl StringComparison {
    pub const TYPE_NAME: &'static str = "StringComparison";

    pub fn name(self) -> &'static str {
        match self {
            Self::Ordinal => "Ordinal",
            Self::OrdinalIgnoreCase => "OrdinalIgnoreCase",
        }
    }

    pub fn to_value(self) -> Value {
        Value::Enum(EnumValue {
            ty: Self::TYPE_NAME.into(),
            name: self.name().into(),
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Enum(e) if &*e.ty == Self::TYPE_NAME => match &*e.name {
                "Ordinal" => Some(Self::Ordinal),
                "OrdinalIgnoreCase" => Some(Self::OrdinalIgnoreCase),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Self::List(values.into_iter().collect::<Vec<_>>().into())
    }

    pub fn record(record: Record) -> Self {
        Self::Record(Arc::new(record))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Short type label used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Uuid(_) => "uuid",
            Self::DateTime(_) => "datetime",
            Self::Enum(_) => "enum",
            Self::List(_) => "list",
            Self::Record(_) => "record",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Uuid(u) => u.hash(state),
            Self::DateTime(d) => d.hash(state),
            Self::Enum(e) => e.hash(state),
            Self::List(items) => items.hash(state),
            Self::Record(r) => r.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Uuid(u) => write!(f, "{}", u),
            Self::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
            Self::Enum(e) => write!(f, "{}.{}", e.ty, e.name),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Record(r) => write!(f, "value({})", r.type_name),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Self::record(r)
    }
}
