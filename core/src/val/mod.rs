//! Boxed values, declared types and the register category each resolves to.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::vm::VmError;

mod convert;
mod error_value;

pub use error_value::{BError, ErrorFrame};

/// Register category a value is placed in.
///
/// Boolean values live in the 32-bit `ints` bank, every composite value in `refs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueTag {
    Int,
    Float,
    Str,
    Bool,
    Blob,
    Ref,
}

impl ValueTag {
    pub const ALL: [ValueTag; 6] = [
        ValueTag::Int,
        ValueTag::Float,
        ValueTag::Str,
        ValueTag::Bool,
        ValueTag::Blob,
        ValueTag::Ref,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ValueTag::Int => "int",
            ValueTag::Float => "float",
            ValueTag::Str => "string",
            ValueTag::Bool => "boolean",
            ValueTag::Blob => "blob",
            ValueTag::Ref => "ref",
        }
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a parameter, return value or global variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BType {
    Int,
    Float,
    String,
    Boolean,
    Blob,
    Map,
    Json,
    Xml,
    Any,
    Error,
    Array(Box<BType>),
    Struct(Arc<str>),
    /// Only valid as the absence of a value; has no register category.
    Void,
    Null,
}

impl BType {
    /// Resolve the register category for this type.
    ///
    /// Composite types all land in the reference bank. `Void` and `Null` carry no value
    /// and are rejected instead of silently falling through to a reference slot.
    pub fn tag(&self) -> Result<ValueTag, VmError> {
        match self {
            BType::Int => Ok(ValueTag::Int),
            BType::Float => Ok(ValueTag::Float),
            BType::String => Ok(ValueTag::Str),
            BType::Boolean => Ok(ValueTag::Bool),
            BType::Blob => Ok(ValueTag::Blob),
            BType::Map
            | BType::Json
            | BType::Xml
            | BType::Any
            | BType::Error
            | BType::Array(_)
            | BType::Struct(_) => Ok(ValueTag::Ref),
            BType::Void | BType::Null => Err(VmError::UnsupportedType(self.to_string())),
        }
    }
}

impl fmt::Display for BType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BType::Int => f.write_str("int"),
            BType::Float => f.write_str("float"),
            BType::String => f.write_str("string"),
            BType::Boolean => f.write_str("boolean"),
            BType::Blob => f.write_str("blob"),
            BType::Map => f.write_str("map"),
            BType::Json => f.write_str("json"),
            BType::Xml => f.write_str("xml"),
            BType::Any => f.write_str("any"),
            BType::Error => f.write_str("error"),
            BType::Array(inner) => write!(f, "{}[]", inner),
            BType::Struct(name) => f.write_str(name),
            BType::Void => f.write_str("void"),
            BType::Null => f.write_str("null"),
        }
    }
}

/// A value as seen by the host, outside of any register file.
#[derive(Debug, Clone, PartialEq)]
pub enum BValue {
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bool(bool),
    Blob(Arc<[u8]>),
    Ref(BRef),
}

/// Contents of a reference register.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BRef {
    #[default]
    Nil,
    Array(Arc<[BValue]>),
    Map(Arc<BTreeMap<Arc<str>, BValue>>),
    Error(Arc<BError>),
}

impl BValue {
    #[inline]
    pub fn tag(&self) -> ValueTag {
        match self {
            BValue::Int(_) => ValueTag::Int,
            BValue::Float(_) => ValueTag::Float,
            BValue::Str(_) => ValueTag::Str,
            BValue::Bool(_) => ValueTag::Bool,
            BValue::Blob(_) => ValueTag::Blob,
            BValue::Ref(_) => ValueTag::Ref,
        }
    }

    pub fn nil() -> Self {
        BValue::Ref(BRef::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BValue::Ref(BRef::Nil) => "nil",
            BValue::Ref(BRef::Array(_)) => "array",
            BValue::Ref(BRef::Map(_)) => "map",
            BValue::Ref(BRef::Error(_)) => "error",
            other => other.tag().name(),
        }
    }
}
