use bytes::Bytes;
use serde::ser::Error as _;

use super::{Format, FormatError, FormatTypeId};
use crate::Value;

/// JSON format.
///
/// JSON has no NaN or infinity, so values containing a non-finite float are
/// rejected on encode rather than stored as `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

fn has_non_finite(value: &Value) -> bool {
    match value {
        Value::Float(x) => !x.is_finite(),
        Value::List(items) => items.iter().any(has_non_finite),
        Value::Map(map) => map.values().any(has_non_finite),
        _ => false,
    }
}

impl Format for JsonFormat {
    fn encode(&self, value: &Value) -> Result<Bytes, FormatError> {
        if has_non_finite(value) {
            let err = serde_json::Error::custom("JSON cannot represent NaN or infinite floats");
            return Err(FormatError::Serialize(Box::new(err)));
        }
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| FormatError::Serialize(Box::new(e)))
    }

    fn decode(&self, data: &[u8]) -> Result<Value, FormatError> {
        serde_json::from_slice(data).map_err(|e| FormatError::Deserialize(Box::new(e)))
    }

    fn format_type_id(&self) -> FormatTypeId {
        FormatTypeId::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_non_finite_floats_rejected() {
        let mut map = IndexMap::new();
        map.insert("x".to_owned(), Value::Float(f64::NEG_INFINITY));
        let values = [
            Value::Float(f64::NAN),
            Value::Float(f64::INFINITY),
            Value::List(vec![Value::Int(1), Value::Float(f64::NAN)]),
            Value::Map(map),
        ];
        for value in &values {
            assert!(
                matches!(JsonFormat.encode(value), Err(FormatError::Serialize(_))),
                "{value:?} should not encode"
            );
        }
    }

    #[test]
    fn test_finite_floats_roundtrip() {
        for x in [0.0, -1.5, 0.25, 1e10] {
            let bytes = JsonFormat.encode(&Value::Float(x)).unwrap();
            assert_eq!(JsonFormat.decode(&bytes).unwrap(), Value::Float(x));
        }
    }
}
