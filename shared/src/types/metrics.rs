//! Per-invocation metric tuples
//!
//! These are what the analyzer emits for each scored record and what
//! downstream aggregation consumes.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Whether specialized matrix hardware applies to an invocation.
///
/// Always rendered as a single-character token so report columns line up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorCoreTag {
    /// Not tracked for this operator family
    #[default]
    #[serde(rename = "-")]
    NotApplicable,
    /// The correlated kernel ran on tensor cores
    #[serde(rename = "1")]
    Used,
    /// Applicable, but the correlated kernel did not use tensor cores
    #[serde(rename = "0")]
    NotUsed,
}

impl TensorCoreTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TensorCoreTag::NotApplicable => "-",
            TensorCoreTag::Used => "1",
            TensorCoreTag::NotUsed => "0",
        }
    }
}

impl fmt::Display for TensorCoreTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value in a [`Params`] summary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(u64),
    Shape(Vec<u64>),
    Shapes(Vec<Vec<u64>>),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn shape(f: &mut fmt::Formatter<'_>, s: &[u64]) -> fmt::Result {
            let dims: Vec<String> = s.iter().map(|d| d.to_string()).collect();
            write!(f, "({})", dims.join(","))
        }
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Shape(s) => shape(f, s),
            ParamValue::Shapes(shapes) => {
                for (i, s) in shapes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    shape(f, s)?;
                }
                Ok(())
            }
            ParamValue::Str(s) => f.write_str(s),
        }
    }
}

/// Ordered key/value summary of an invocation, used to group calls with
/// identical shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a key; keys keep insertion order
    pub fn with(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.0.push((key.into(), value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Normalized cost estimate for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MetricRecord {
    pub module: String,
    pub operator: String,
    pub params: Params,
    pub tensor_core: TensorCoreTag,
    pub elements: u64,
    pub bytes: u64,
    pub flops: u64,
}

impl MetricRecord {
    /// Cost arithmetic saturates; a count pinned at `u64::MAX` did not fit.
    pub fn is_saturated(&self) -> bool {
        [self.elements, self.bytes, self.flops].contains(&u64::MAX)
    }
}
