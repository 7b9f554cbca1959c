//! Marker decoding and encoding
//!
//! Schema: a marker is an object with `module` (alias `mod`), `operator`
//! (alias `op`) and `args`. Each argument carries `name` and `kind` (alias
//! `type`) plus the fields that kind requires:
//!
//! | kind                | required        | optional |
//! |---------------------|-----------------|----------|
//! | `tensor`, `ndarray` | `shape`, `dtype`|          |
//! | `list`, `tuple`     | `value` (array) |          |
//! | `scalar`            | `value`         | `dtype`  |
//! | `int`, `float`, `bool`, `str`, `NoneType` | `value` | |
//!
//! The last row is the producer's native spelling of a scalar, where the
//! kind field holds the scalar's type name.
//!
//! A non-finite float is written `{"float": "inf"}` (also `"-inf"`, `"nan"`)
//! wherever a scalar may appear. A `float`-typed scalar also accepts the
//! bare strings `"inf"`, `"-inf"` and `"nan"`.

use super::literal::parse_literal;
use super::DecodeError;
use crate::types::record::{
    ArgDescriptor, ArgKind, ArgValue, CallRecord, ScalarValue, TraceContext, NON_FINITE_KEY,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Scalar type names the producer records
const SCALAR_TYPES: &[&str] = &["int", "float", "bool", "str", "NoneType"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMarker {
    #[serde(alias = "mod")]
    module: String,
    #[serde(alias = "op")]
    operator: String,
    args: Vec<RawArg>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawArg {
    name: String,
    #[serde(alias = "type")]
    kind: String,
    #[serde(default)]
    shape: Option<Vec<u64>>,
    #[serde(default)]
    dtype: Option<String>,
    /// Present-but-null must stay distinguishable from absent
    #[serde(default, deserialize_with = "present")]
    value: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

impl RawArg {
    fn into_descriptor(self, index: usize) -> Result<ArgDescriptor, DecodeError> {
        let kind = self.kind.clone();
        let missing = |field| DecodeError::MissingField {
            index,
            kind: kind.clone(),
            field,
        };
        let unexpected = |field| DecodeError::UnexpectedField {
            index,
            kind: kind.clone(),
            field,
        };

        let value = match kind.as_str() {
            "tensor" | "ndarray" => {
                if self.value.is_some() {
                    return Err(unexpected("value"));
                }
                let shape = self.shape.ok_or_else(|| missing("shape"))?;
                let dtype = self.dtype.ok_or_else(|| missing("dtype"))?;
                if kind == "tensor" {
                    ArgValue::Tensor { shape, dtype }
                } else {
                    ArgValue::Ndarray { shape, dtype }
                }
            }
            "list" | "tuple" => {
                if self.shape.is_some() {
                    return Err(unexpected("shape"));
                }
                if self.dtype.is_some() {
                    return Err(unexpected("dtype"));
                }
                let items = match self.value.ok_or_else(|| missing("value"))? {
                    Value::Array(items) => items,
                    other => {
                        return Err(DecodeError::InvalidValue {
                            index,
                            field: "value",
                            message: format!("expected a sequence, found {}", other),
                        })
                    }
                };
                let values = items
                    .into_iter()
                    .map(|item| scalar_from_json(index, item, None))
                    .collect::<Result<Vec<_>, _>>()?;
                if kind == "list" {
                    ArgValue::List(values)
                } else {
                    ArgValue::Tuple(values)
                }
            }
            "scalar" => {
                if self.shape.is_some() {
                    return Err(unexpected("shape"));
                }
                let value = self.value.ok_or_else(|| missing("value"))?;
                ArgValue::Scalar(scalar_from_json(index, value, self.dtype.as_deref())?)
            }
            t if SCALAR_TYPES.contains(&t) => {
                if self.shape.is_some() {
                    return Err(unexpected("shape"));
                }
                if self.dtype.is_some() {
                    return Err(unexpected("dtype"));
                }
                let value = self.value.ok_or_else(|| missing("value"))?;
                ArgValue::Scalar(scalar_from_json(index, value, Some(t))?)
            }
            _ => {
                return Err(DecodeError::UnknownKind {
                    index,
                    kind: kind.clone(),
                })
            }
        };

        Ok(ArgDescriptor {
            name: self.name,
            value,
        })
    }
}

/// Convert a JSON value into a scalar, checking it against the recorded
/// scalar type when there is one.
fn scalar_from_json(
    index: usize,
    value: Value,
    type_name: Option<&str>,
) -> Result<ScalarValue, DecodeError> {
    let mismatch = |value: &Value| DecodeError::InvalidValue {
        index,
        field: "value",
        message: match type_name {
            Some(t) => format!("{} is not a valid {} value", value, t),
            None => format!("{} is not a scalar", value),
        },
    };

    if let Some(t) = type_name {
        if !SCALAR_TYPES.contains(&t) {
            return Err(DecodeError::InvalidValue {
                index,
                field: "dtype",
                message: format!("unsupported scalar type '{}'", t),
            });
        }
    }

    let scalar = match (type_name, &value) {
        (None | Some("NoneType"), Value::Null) => ScalarValue::None,
        (None | Some("bool"), Value::Bool(b)) => ScalarValue::Bool(*b),
        (None | Some("int"), Value::Number(n)) if n.is_i64() => {
            ScalarValue::Int(n.as_i64().ok_or_else(|| mismatch(&value))?)
        }
        (None | Some("float"), Value::Number(n)) => {
            ScalarValue::Float(n.as_f64().ok_or_else(|| mismatch(&value))?)
        }
        (None | Some("float"), Value::Object(map)) => {
            ScalarValue::Float(non_finite(map).ok_or_else(|| mismatch(&value))?)
        }
        (Some("float"), Value::String(s)) => {
            ScalarValue::Float(ScalarValue::parse_non_finite(s).ok_or_else(|| mismatch(&value))?)
        }
        (None | Some("str"), Value::String(s)) => ScalarValue::Str(s.clone()),
        _ => return Err(mismatch(&value)),
    };
    Ok(scalar)
}

/// Payload of a `{"float": "inf"}` object
fn non_finite(map: &Map<String, Value>) -> Option<f64> {
    match (map.len(), map.get(NON_FINITE_KEY)) {
        (1, Some(Value::String(s))) => ScalarValue::parse_non_finite(s),
        _ => None,
    }
}

/// Decode a captured marker (JSON or producer literal syntax).
pub fn decode(text: &str, context: TraceContext) -> Result<CallRecord, DecodeError> {
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => parse_literal(text)?,
    };
    decode_value(value, context)
}

/// Validate an already-parsed value tree against the marker schema.
pub fn decode_value(value: Value, context: TraceContext) -> Result<CallRecord, DecodeError> {
    let raw: RawMarker = serde_json::from_value(value)?;
    let args = raw
        .args
        .into_iter()
        .enumerate()
        .map(|(index, arg)| arg.into_descriptor(index))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CallRecord {
        module: raw.module,
        operator: raw.operator,
        args,
        context,
    })
}

#[derive(Serialize)]
struct EncodedMarker<'a> {
    module: &'a str,
    operator: &'a str,
    args: Vec<EncodedArg<'a>>,
}

#[derive(Serialize)]
struct EncodedArg<'a> {
    name: &'a str,
    kind: ArgKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    shape: Option<&'a [u64]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dtype: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<EncodedValue<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EncodedValue<'a> {
    Scalar(&'a ScalarValue),
    Sequence(&'a [ScalarValue]),
}

impl<'a> From<&'a ArgDescriptor> for EncodedArg<'a> {
    fn from(arg: &'a ArgDescriptor) -> Self {
        let (shape, dtype, value) = match &arg.value {
            ArgValue::Tensor { shape, dtype } | ArgValue::Ndarray { shape, dtype } => {
                (Some(shape.as_slice()), Some(dtype.as_str()), None)
            }
            ArgValue::List(values) | ArgValue::Tuple(values) => {
                (None, None, Some(EncodedValue::Sequence(values)))
            }
            ArgValue::Scalar(v) => (None, Some(v.type_name()), Some(EncodedValue::Scalar(v))),
        };
        Self {
            name: &arg.name,
            kind: arg.kind(),
            shape,
            dtype,
            value,
        }
    }
}

/// Encode a record's body (module, operator, args) as canonical JSON.
///
/// The trace context is not part of the marker body and is not encoded.
pub fn encode(record: &CallRecord) -> Result<String, serde_json::Error> {
    let marker = EncodedMarker {
        module: &record.module,
        operator: &record.operator,
        args: record.args.iter().map(EncodedArg::from).collect(),
    };
    serde_json::to_string(&marker)
}
