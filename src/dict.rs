//! Key/value dictionary (C1): the options/xdata bag threaded through every
//! FOP and every op-sm payload. `Dict` is the typed replacement for
//! GlusterFS's duck-typed `dict_t`: a `Map<String, Value>` with typed
//! accessors, reference counting handled by `Arc` clone rather than a
//! manual refcount, and `merge`/iteration helpers used by option validation
//! and op-sm dict aggregation.

use std::collections::HashMap;
use std::sync::Arc;

/// A dictionary value. Covers the scalar types GlusterFS's `dict_t` stores;
/// `Ptr` stands in for the opaque blob variant (`iobref`/binary payloads).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Arc<[u8]>),
    Str(Arc<str>),
    I32(i32),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::I32(v) => Some(*v as i64),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            Value::I64(v) => u64::try_from(*v).ok(),
            Value::I32(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Reference-counted, shareable key/value dictionary. Cloning a `Dict` is
/// O(1) (an `Arc` bump) until a write forces a copy-on-write split, mirroring
/// `dict_ref`/`dict_unref` semantics without manual refcounting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict {
    inner: Arc<HashMap<String, Value>>,
}

impl Dict {
    pub fn new() -> Self {
        Dict::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        Arc::make_mut(&mut self.inner).insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        Arc::make_mut(&mut self.inner).remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    /// `dict_copy_with_ref`: an independent deep copy that shares no
    /// mutable state with `self` even before the next write.
    pub fn deep_copy(&self) -> Dict {
        Dict {
            inner: Arc::new((*self.inner).clone()),
        }
    }

    /// Merge `other` into `self`, with `other`'s values winning on key
    /// collision (matches `dict_copy`'s overwrite-in-place behavior used
    /// when aggregating per-peer op-sm payloads).
    pub fn merge(&mut self, other: &Dict) {
        let map = Arc::make_mut(&mut self.inner);
        for (k, v) in other.iter() {
            map.insert(k.clone(), v.clone());
        }
    }
}

impl FromIterator<(String, Value)> for Dict {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Dict {
            inner: Arc::new(HashMap::from_iter(iter)),
        }
    }
}
