//! Dynamically typed ABI values.
//!
//! App states and actions travel as JSON; before they can be hashed they are
//! coerced against the app's declared [AbiType]. Coercion is where malformed
//! states and actions get rejected.

use serde_json::Value;

use super::{
    types::{decode_prefixed_hex, Address, U256},
    AbiType, Error,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Uint(U256),
    /// Two's complement.
    Int(U256),
    Address(Address),
    Bool(bool),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<AbiValue>),
    FixedArray(Vec<AbiValue>),
    Tuple(Vec<AbiValue>),
}

impl AbiValue {
    pub fn is_dynamic(&self) -> bool {
        match self {
            AbiValue::Bytes(_) | AbiValue::String(_) | AbiValue::Array(_) => true,
            AbiValue::FixedArray(items) | AbiValue::Tuple(items) => {
                items.iter().any(AbiValue::is_dynamic)
            }
            _ => false,
        }
    }

    /// Interpret `json` as a value of type `kind`.
    pub fn from_json(kind: &AbiType, json: &Value) -> Result<Self, Error> {
        match kind {
            AbiType::Uint(bits) => {
                let v = json_to_u256(kind, json)?;
                if *bits < 256 && v >> *bits != U256::zero() {
                    return Err(Error::ValueOutOfRange(kind.to_string()));
                }
                Ok(AbiValue::Uint(v))
            }
            AbiType::Int(bits) => json_to_int(kind, *bits, json).map(AbiValue::Int),
            AbiType::Address => {
                let s = expect_str(kind, json)?;
                s.parse::<Address>()
                    .map(AbiValue::Address)
                    .map_err(|e| Error::InvalidValue(e.to_string()))
            }
            AbiType::Bool => match json {
                Value::Bool(b) => Ok(AbiValue::Bool(*b)),
                other => Err(mismatch(kind, other)),
            },
            AbiType::FixedBytes(n) => {
                let bytes = json_to_bytes(kind, json)?;
                if bytes.len() != *n {
                    return Err(Error::LengthMismatch {
                        expected: *n,
                        found: bytes.len(),
                    });
                }
                Ok(AbiValue::FixedBytes(bytes))
            }
            AbiType::Bytes => json_to_bytes(kind, json).map(AbiValue::Bytes),
            AbiType::String => expect_str(kind, json).map(|s| AbiValue::String(s.to_string())),
            AbiType::Array(inner) => {
                let items = expect_array(kind, json)?;
                items
                    .iter()
                    .map(|item| AbiValue::from_json(inner, item))
                    .collect::<Result<_, _>>()
                    .map(AbiValue::Array)
            }
            AbiType::FixedArray(inner, n) => {
                let items = expect_array(kind, json)?;
                if items.len() != *n {
                    return Err(Error::LengthMismatch {
                        expected: *n,
                        found: items.len(),
                    });
                }
                items
                    .iter()
                    .map(|item| AbiValue::from_json(inner, item))
                    .collect::<Result<_, _>>()
                    .map(AbiValue::FixedArray)
            }
            AbiType::Tuple(params) => match json {
                Value::Object(fields) => params
                    .iter()
                    .map(|p| {
                        let name = p
                            .name
                            .as_deref()
                            .ok_or_else(|| Error::InvalidValue("unnamed tuple component".into()))?;
                        let field = fields
                            .get(name)
                            .ok_or_else(|| Error::MissingField(name.to_string()))?;
                        AbiValue::from_json(&p.kind, field)
                    })
                    .collect::<Result<_, _>>()
                    .map(AbiValue::Tuple),
                Value::Array(items) => {
                    if items.len() != params.len() {
                        return Err(Error::LengthMismatch {
                            expected: params.len(),
                            found: items.len(),
                        });
                    }
                    params
                        .iter()
                        .zip(items)
                        .map(|(p, item)| AbiValue::from_json(&p.kind, item))
                        .collect::<Result<_, _>>()
                        .map(AbiValue::Tuple)
                }
                other => Err(mismatch(kind, other)),
            },
        }
    }
}

fn json_kind(json: &Value) -> &'static str {
    match json {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(kind: &AbiType, json: &Value) -> Error {
    Error::TypeMismatch {
        expected: kind.to_string(),
        found: json_kind(json),
    }
}

fn expect_str<'a>(kind: &AbiType, json: &'a Value) -> Result<&'a str, Error> {
    json.as_str().ok_or_else(|| mismatch(kind, json))
}

fn expect_array<'a>(kind: &AbiType, json: &'a Value) -> Result<&'a Vec<Value>, Error> {
    json.as_array().ok_or_else(|| mismatch(kind, json))
}

fn json_to_bytes(kind: &AbiType, json: &Value) -> Result<Vec<u8>, Error> {
    decode_prefixed_hex(expect_str(kind, json)?).map_err(|e| Error::InvalidValue(e.to_string()))
}

fn json_to_u256(kind: &AbiType, json: &Value) -> Result<U256, Error> {
    match json {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| Error::ValueOutOfRange(kind.to_string())),
        Value::String(_) | Value::Object(_) => serde_json::from_value::<U256>(json.clone())
            .map_err(|e| Error::InvalidValue(e.to_string())),
        other => Err(mismatch(kind, other)),
    }
}

fn json_to_int(kind: &AbiType, bits: usize, json: &Value) -> Result<U256, Error> {
    let (negative, magnitude) = match json {
        Value::Number(n) => match n.as_i64() {
            Some(v) => (v < 0, U256::from(v.unsigned_abs())),
            None => return Err(Error::ValueOutOfRange(kind.to_string())),
        },
        Value::String(s) => match s.trim().strip_prefix('-') {
            Some(rest) => (true, U256::parse(rest).map_err(|e| Error::InvalidValue(e.to_string()))?),
            None => (false, U256::parse(s).map_err(|e| Error::InvalidValue(e.to_string()))?),
        },
        other => return Err(mismatch(kind, other)),
    };

    let bound = U256::one() << (bits - 1);
    if negative {
        if magnitude > bound {
            return Err(Error::ValueOutOfRange(kind.to_string()));
        }
        Ok((!magnitude).overflowing_add(U256::one()).0)
    } else {
        if magnitude >= bound {
            return Err(Error::ValueOutOfRange(kind.to_string()));
        }
        Ok(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ty(s: &str) -> AbiType {
        s.parse().unwrap()
    }

    #[test]
    fn tuple_from_object_and_array() {
        let kind = ty("tuple(uint256 counter, bool done)");
        let expected = AbiValue::Tuple(vec![AbiValue::Uint(U256::from(3)), AbiValue::Bool(true)]);
        assert_eq!(
            AbiValue::from_json(&kind, &json!({"counter": "0x3", "done": true})).unwrap(),
            expected
        );
        assert_eq!(AbiValue::from_json(&kind, &json!([3, true])).unwrap(), expected);
        assert_eq!(
            AbiValue::from_json(&kind, &json!({"counter": 3})),
            Err(Error::MissingField("done".into()))
        );
    }

    #[test]
    fn rejects_out_of_range_and_wrong_kinds() {
        assert!(AbiValue::from_json(&ty("uint8"), &json!(256)).is_err());
        assert!(AbiValue::from_json(&ty("uint8"), &json!(255)).is_ok());
        assert!(AbiValue::from_json(&ty("bool"), &json!("true")).is_err());
        assert!(AbiValue::from_json(&ty("address"), &json!("0x12")).is_err());
        assert!(AbiValue::from_json(&ty("uint256[2]"), &json!([1])).is_err());
    }

    #[test]
    fn negative_ints_are_twos_complement() {
        let v = AbiValue::from_json(&ty("int256"), &json!(-1)).unwrap();
        assert_eq!(v, AbiValue::Int(U256::MAX));
        let v = AbiValue::from_json(&ty("int8"), &json!("-128")).unwrap();
        assert_eq!(v, AbiValue::Int(U256::MAX - U256::from(127)));
        assert!(AbiValue::from_json(&ty("int8"), &json!(128)).is_err());
    }
}
