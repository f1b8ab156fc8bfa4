//! Dynamic field values.

use crate::error::{Error, TypeError};
use crate::identifiers::RecordId;
use serde::{Deserialize, Serialize};

/// A dynamically-typed field value as held by the record cache.
///
/// Relational fields are represented at the cache level by
/// [`Value::Records`]: a many2one holds zero or one id, one2many and
/// many2many hold any number of ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// JSON value
    Json(serde_json::Value),

    /// Ids of related records
    Records(Vec<RecordId>),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value is "empty": NULL, or a relational value without ids.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Records(ids) => ids.is_empty(),
            _ => false,
        }
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Json(_) => "JSON",
            Value::Records(_) => "RECORDS",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Get the related record ids of a relational value.
    ///
    /// NULL is treated as the empty set, so a many2one that was never
    /// assigned reads as "no record".
    pub fn as_ids(&self) -> Option<&[RecordId]> {
        match self {
            Value::Records(ids) => Some(ids),
            Value::Null => Some(&[]),
            _ => None,
        }
    }

    /// Get the single related id of a many2one value.
    #[allow(clippy::result_large_err)]
    pub fn single_id(&self) -> crate::Result<Option<RecordId>> {
        match self.as_ids() {
            Some([]) => Ok(None),
            Some([id]) => Ok(Some(*id)),
            Some(ids) => Err(Error::Type(TypeError {
                expected: "at most one record",
                actual: format!("{} records", ids.len()),
                field: None,
            })),
            None => Err(Error::Type(TypeError {
                expected: "RECORDS",
                actual: self.type_name().to_string(),
                field: None,
            })),
        }
    }

    /// Build a relational value from ids.
    pub fn records(ids: impl IntoIterator<Item = RecordId>) -> Self {
        Value::Records(ids.into_iter().collect())
    }

    /// Build a many2one value.
    pub fn record(id: Option<RecordId>) -> Self {
        Value::Records(id.into_iter().collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_bool().ok_or_else(|| {
            Error::Type(TypeError {
                expected: "bool",
                actual: value.type_name().to_string(),
                field: None,
            })
        })
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_i64().ok_or_else(|| {
            Error::Type(TypeError {
                expected: "i64",
                actual: value.type_name().to_string(),
                field: None,
            })
        })
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64().ok_or_else(|| {
            Error::Type(TypeError {
                expected: "f64",
                actual: value.type_name().to_string(),
                field: None,
            })
        })
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s),
            other => Err(Error::Type(TypeError {
                expected: "string",
                actual: other.type_name().to_string(),
                field: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_primitives() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::BigInt(42));
        assert_eq!(Value::from(42i64), Value::BigInt(42));
        assert_eq!(Value::from(1.5f64), Value::Double(1.5));
        assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_null_reads_as_empty_recordset() {
        assert_eq!(Value::Null.as_ids(), Some(&[][..]));
        assert!(Value::Null.is_empty());
        assert!(Value::records([]).is_empty());
        assert!(!Value::record(Some(3)).is_empty());
    }

    #[test]
    fn test_single_id() {
        assert_eq!(Value::record(None).single_id().unwrap(), None);
        assert_eq!(Value::record(Some(7)).single_id().unwrap(), Some(7));
        assert!(Value::records([1, 2]).single_id().is_err());
        assert!(Value::Text("x".into()).single_id().is_err());
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(Value::BigInt(3).as_f64(), Some(3.0));
        assert_eq!(Value::Decimal("2.50".into()).as_f64(), Some(2.5));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
        let n: i64 = Value::BigInt(9).try_into().unwrap();
        assert_eq!(n, 9);
        let s: Result<String, _> = Value::BigInt(9).try_into();
        assert!(s.is_err());
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&Value::records([1, 2])).unwrap();
        assert_eq!(json, r#"{"Records":[1,2]}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::records([1, 2]));
    }
}
