use ::bincode::config::standard;
use ::bincode::serde::{decode_from_slice, encode_to_vec};
use bytes::Bytes;

use super::{Format, FormatError, FormatTypeId};
use crate::Value;

/// Bincode format (default).
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeFormat;

impl Format for BincodeFormat {
    fn encode(&self, value: &Value) -> Result<Bytes, FormatError> {
        encode_to_vec(value, standard())
            .map(Bytes::from)
            .map_err(|e| FormatError::Serialize(Box::new(e)))
    }

    fn decode(&self, data: &[u8]) -> Result<Value, FormatError> {
        let (value, _read) = decode_from_slice::<Value, _>(data, standard())
            .map_err(|e| FormatError::Deserialize(Box::new(e)))?;
        Ok(value)
    }

    fn format_type_id(&self) -> FormatTypeId {
        FormatTypeId::Bincode
    }
}
