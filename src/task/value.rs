//! Versioned, self-describing encoding for task arguments and return values.
//!
//! Every value carries its own type tag, and every encoded blob carries a
//! format version, so submitters and workers can evolve independently:
//!
//! ```json
//! {"version": 1, "values": [{"type": "i32", "value": 3}, {"type": "text", "value": "hi"}]}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current encoding version written by this crate.
pub const VALUE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Unit,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    List(Vec<Value>),
}

/// The type tag of a [`Value`], used to match arguments against entry point signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Unit,
    Bool,
    I32,
    I64,
    F32,
    F64,
    Text,
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Unit => "unit",
            ValueKind::Bool => "bool",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Text => "text",
            ValueKind::List => "list",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Unit => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::I32(_) => ValueKind::I32,
            Value::I64(_) => ValueKind::I64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Text(_) => ValueKind::Text,
            Value::List(_) => ValueKind::List,
        }
    }

    fn check_finite(&self) -> Result<(), CodecError> {
        match self {
            Value::F32(v) if !v.is_finite() => Err(CodecError::NonFinite(v.to_string())),
            Value::F64(v) if !v.is_finite() => Err(CodecError::NonFinite(v.to_string())),
            Value::List(items) => items.iter().try_for_each(Value::check_finite),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Parses CLI literals of the form `kind:literal`, e.g. `i32:3` or `text:hello`.
impl FromStr for Value {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "unit" {
            return Ok(Value::Unit);
        }
        let (kind, literal) = s
            .split_once(':')
            .ok_or_else(|| CodecError::InvalidLiteral(s.to_string()))?;
        let invalid = || CodecError::InvalidLiteral(s.to_string());
        match kind {
            "bool" => literal.parse().map(Value::Bool).map_err(|_| invalid()),
            "i32" => literal.parse().map(Value::I32).map_err(|_| invalid()),
            "i64" => literal.parse().map(Value::I64).map_err(|_| invalid()),
            "f32" => literal.parse().map(Value::F32).map_err(|_| invalid()),
            "f64" => literal.parse().map(Value::F64).map_err(|_| invalid()),
            "text" => Ok(Value::Text(literal.to_string())),
            _ => Err(invalid()),
        }
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed value encoding: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported value format version {0} (expected {})", VALUE_FORMAT_VERSION)]
    UnsupportedVersion(u32),

    #[error("non-finite float {0} cannot be encoded")]
    NonFinite(String),

    #[error("invalid value literal '{0}', expected kind:literal")]
    InvalidLiteral(String),
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct ListEnvelope<V> {
    version: u32,
    values: V,
}

#[derive(Serialize, Deserialize)]
struct SingleEnvelope<V> {
    version: u32,
    value: V,
}

fn check_version(bytes: &[u8]) -> Result<(), CodecError> {
    let header: Header = serde_json::from_slice(bytes)?;
    if header.version != VALUE_FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(header.version));
    }
    Ok(())
}

/// Encode an argument list.
pub fn encode_values(values: &[Value]) -> Result<Vec<u8>, CodecError> {
    values.iter().try_for_each(Value::check_finite)?;
    Ok(serde_json::to_vec(&ListEnvelope {
        version: VALUE_FORMAT_VERSION,
        values,
    })?)
}

/// Decode an argument list produced by [`encode_values`].
pub fn decode_values(bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
    check_version(bytes)?;
    let envelope: ListEnvelope<Vec<Value>> = serde_json::from_slice(bytes)?;
    Ok(envelope.values)
}

/// Encode a single return value.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, CodecError> {
    value.check_finite()?;
    Ok(serde_json::to_vec(&SingleEnvelope {
        version: VALUE_FORMAT_VERSION,
        value,
    })?)
}

/// Decode a single return value produced by [`encode_value`].
pub fn decode_value(bytes: &[u8]) -> Result<Value, CodecError> {
    check_version(bytes)?;
    let envelope: SingleEnvelope<Value> = serde_json::from_slice(bytes)?;
    Ok(envelope.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_argument_list_survives_encoding() {
        let args = vec![
            Value::I32(3),
            Value::I64(-9_000_000_000),
            Value::F64(2.5),
            Value::Bool(true),
            Value::Text("héllo".to_string()),
            Value::Unit,
        ];
        let bytes = encode_values(&args).unwrap();
        assert_eq!(decode_values(&bytes).unwrap(), args);
    }

    #[test]
    fn encoding_is_self_describing() {
        let bytes = encode_values(&[Value::I32(3)]).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["values"][0]["type"], "i32");
        assert_eq!(json["values"][0]["value"], 3);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let bytes = br#"{"version": 2, "values": []}"#;
        assert!(matches!(
            decode_values(bytes),
            Err(CodecError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            decode_values(b"\xac\xed\x00\x05"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_values(br#"{"version": 1, "values": [{"type": "u128", "value": 1}]}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn non_finite_floats_are_refused() {
        assert!(matches!(
            encode_value(&Value::F64(f64::NAN)),
            Err(CodecError::NonFinite(_))
        ));
        assert!(matches!(
            encode_values(&[Value::List(vec![Value::F32(f32::INFINITY)])]),
            Err(CodecError::NonFinite(_))
        ));
    }

    #[test]
    fn single_value_envelope() {
        let value = Value::List(vec![Value::I32(1), Value::F32(0.5)]);
        let bytes = encode_value(&value).unwrap();
        assert_eq!(decode_value(&bytes).unwrap(), value);
    }

    #[test]
    fn parse_cli_literals() {
        assert_eq!("i32:3".parse::<Value>().unwrap(), Value::I32(3));
        assert_eq!("i64:-4".parse::<Value>().unwrap(), Value::I64(-4));
        assert_eq!("f64:2.5".parse::<Value>().unwrap(), Value::F64(2.5));
        assert_eq!("bool:false".parse::<Value>().unwrap(), Value::Bool(false));
        assert_eq!(
            "text:a:b".parse::<Value>().unwrap(),
            Value::Text("a:b".to_string())
        );
        assert_eq!("unit".parse::<Value>().unwrap(), Value::Unit);
        assert!("i32:abc".parse::<Value>().is_err());
        assert!("7".parse::<Value>().is_err());
        assert!("u8:1".parse::<Value>().is_err());
    }
}
