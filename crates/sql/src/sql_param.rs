use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single bound value, as carried through the replicated log.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum SqlParam {
    /// BLOB value
    Blob(Bytes),

    /// INTEGER value
    Integer(i64),

    /// NULL
    Null,

    /// REAL value
    Real(f64),

    /// TEXT value
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(Bytes::from(value))
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
