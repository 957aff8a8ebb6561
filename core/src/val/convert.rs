use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{BError, BRef, BValue};

impl From<i64> for BValue {
    #[inline]
    fn from(i: i64) -> Self {
        BValue::Int(i)
    }
}

impl From<f64> for BValue {
    #[inline]
    fn from(f: f64) -> Self {
        BValue::Float(f)
    }
}

impl From<bool> for BValue {
    #[inline]
    fn from(b: bool) -> Self {
        BValue::Bool(b)
    }
}

impl From<&str> for BValue {
    #[inline]
    fn from(s: &str) -> Self {
        BValue::Str(Arc::from(s))
    }
}

impl From<String> for BValue {
    #[inline]
    fn from(s: String) -> Self {
        BValue::Str(Arc::<str>::from(s))
    }
}

impl From<Vec<u8>> for BValue {
    fn from(bytes: Vec<u8>) -> Self {
        BValue::Blob(Arc::<[u8]>::from(bytes))
    }
}

impl From<BRef> for BValue {
    #[inline]
    fn from(r: BRef) -> Self {
        BValue::Ref(r)
    }
}

impl From<BError> for BValue {
    fn from(err: BError) -> Self {
        BValue::Ref(BRef::Error(Arc::new(err)))
    }
}

impl<T> From<Vec<T>> for BRef
where
    T: Into<BValue>,
{
    fn from(items: Vec<T>) -> Self {
        let items: Vec<BValue> = items.into_iter().map(Into::into).collect();
        BRef::Array(Arc::<[BValue]>::from(items))
    }
}

impl<S, V> FromIterator<(S, V)> for BRef
where
    S: AsRef<str>,
    V: Into<BValue>,
{
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        let map: BTreeMap<Arc<str>, BValue> = iter
            .into_iter()
            .map(|(k, v)| (Arc::from(k.as_ref()), v.into()))
            .collect();
        BRef::Map(Arc::new(map))
    }
}

impl BValue {
    /// Render the value the way the runtime prints it.
    pub fn string_value(&self) -> String {
        match self {
            BValue::Int(i) => {
                let mut buf = itoa::Buffer::new();
                buf.format(*i).to_string()
            }
            BValue::Float(f) => {
                let mut buf = ryu::Buffer::new();
                buf.format(*f).to_string()
            }
            BValue::Str(s) => s.to_string(),
            BValue::Bool(b) => b.to_string(),
            BValue::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            BValue::Ref(r) => r.to_string(),
        }
    }
}

impl fmt::Display for BValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_value())
    }
}

impl fmt::Display for BRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BRef::Nil => f.write_str("nil"),
            BRef::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            BRef::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            BRef::Error(err) => write!(f, "error({})", err.message()),
        }
    }
}
