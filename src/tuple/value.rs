use std::fmt::Display;

use anyhow::Result;

use super::schema::TypeId;
use crate::common::STRING_WIDTH;
use crate::error::DbError;

/// A single field value. Integers are 64 bit; strings are stored in a fixed
/// 32-byte window and truncated to it on the way in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    Integer(i64),
    String(String),
}

impl Value {
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Integer(_) => TypeId::Integer,
            Value::String(_) => TypeId::Text,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Integer(val) => *val,
            _ => unreachable!(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Value::String(val) => val,
            _ => unreachable!(),
        }
    }

    /// Writes the fixed-width field image. Integers are little-endian;
    /// strings are zero-padded to the string window.
    pub fn serialize(&self, buffer: &mut [u8]) {
        match self {
            Value::Integer(val) => {
                buffer[..8].copy_from_slice(&val.to_le_bytes());
            }
            Value::String(val) => {
                let bytes = val.as_bytes();
                let len = bytes.len().min(STRING_WIDTH);
                buffer[..len].copy_from_slice(&bytes[..len]);
                buffer[len..STRING_WIDTH].fill(0);
            }
        }
    }

    /// Reads a field image back. A string value ends at the first NUL byte.
    pub fn parse(bytes: &[u8], type_id: TypeId) -> Result<Self> {
        match type_id {
            TypeId::Integer => {
                let image: [u8; 8] = bytes[..8]
                    .try_into()
                    .map_err(|_| DbError::MalformedData("truncated integer field".to_owned()))?;
                Ok(Value::Integer(i64::from_le_bytes(image)))
            }
            TypeId::Text => {
                let window = &bytes[..STRING_WIDTH];
                let len = window.iter().position(|b| *b == 0).unwrap_or(STRING_WIDTH);
                let val = std::str::from_utf8(&window[..len])
                    .map_err(|_| DbError::MalformedData("string field is not utf-8".to_owned()))?;
                Ok(Value::String(val.to_owned()))
            }
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(val) => Display::fmt(val, f),
            Value::String(val) => Display::fmt(val, f),
        }
    }
}
