//! Parsed values produced by the driver.

use std::net::IpAddr;

/// A value produced by interpreting a grammar against input.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value (epsilon, skipped data, control productions).
    Null,
    /// A boolean.
    Bool(bool),
    /// An unsigned integer.
    UInt(u64),
    /// A signed integer.
    SInt(i64),
    /// An IEEE real.
    Real(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A network address.
    Address(IpAddr),
    /// Container elements, in parse order.
    List(Vec<Value>),
    /// A unit's fields, in parse order.
    Unit(Vec<(String, Value)>),
}

impl Value {
    /// The value as an unsigned integer, if it is one.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as bytes, if it is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a field of a unit value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Unit(fields) => fields
                .iter()
                .rev()
                .find(|(id, _)| id == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
