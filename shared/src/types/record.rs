//! Captured call record types
//!
//! A [`CallRecord`] describes one instrumented operator invocation: the
//! module and operator names plus an ordered description of every argument.
//! The trace row it came from contributes the [`TraceContext`].

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key of the one-entry object (`{"float": "inf"}`) that carries a
/// non-finite float through JSON, which has no literal for it
pub const NON_FINITE_KEY: &str = "float";

/// Pass direction of the traced invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "fprop", alias = "fwd")]
    Forward,
    #[serde(alias = "bprop", alias = "bwd")]
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forward" | "fprop" | "fwd" => Ok(Direction::Forward),
            "backward" | "bprop" | "bwd" => Ok(Direction::Backward),
            _ => Err(format!("invalid direction: {}", s)),
        }
    }
}

/// Context supplied by the trace row rather than the record body
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceContext {
    /// Forward or backward pass
    pub direction: Direction,

    /// Nesting depth: 0 is the outermost invocation, anything greater is a
    /// sub-call that reuses its parent's buffers
    pub sub_level: u32,

    /// Name of the device kernel correlated with this invocation, if known
    #[serde(default)]
    pub kernel: Option<String>,
}

impl TraceContext {
    pub fn new(direction: Direction, sub_level: u32) -> Self {
        Self {
            direction,
            sub_level,
            kernel: None,
        }
    }

    pub fn with_kernel(mut self, kernel: impl Into<String>) -> Self {
        self.kernel = Some(kernel.into());
        self
    }

    /// True for the outermost (attributable) invocation
    pub fn is_primary(&self) -> bool {
        self.sub_level == 0
    }
}

/// Argument kind as recorded by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Tensor,
    Ndarray,
    List,
    Tuple,
    Scalar,
}

impl ArgKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgKind::Tensor => "tensor",
            ArgKind::Ndarray => "ndarray",
            ArgKind::List => "list",
            ArgKind::Tuple => "tuple",
            ArgKind::Scalar => "scalar",
        }
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured scalar value.
///
/// Floats may be infinite or NaN; these are carried as-is and never feed
/// shape arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScalarValue {
    /// Scalar type name as the producer spells it
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarValue::None => "NoneType",
            ScalarValue::Bool(_) => "bool",
            ScalarValue::Int(_) => "int",
            ScalarValue::Float(_) => "float",
            ScalarValue::Str(_) => "str",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(v) => Some(*v as f64),
            ScalarValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ScalarValue::None)
    }

    /// Parse the producer's spelling of a non-finite float
    pub fn parse_non_finite(text: &str) -> Option<f64> {
        match text {
            "inf" | "+inf" => Some(f64::INFINITY),
            "-inf" => Some(f64::NEG_INFINITY),
            "nan" => Some(f64::NAN),
            _ => None,
        }
    }

    fn non_finite_spelling(v: f64) -> &'static str {
        if v.is_nan() {
            "nan"
        } else if v > 0.0 {
            "inf"
        } else {
            "-inf"
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScalarValue::None => serializer.serialize_none(),
            ScalarValue::Bool(v) => serializer.serialize_bool(*v),
            ScalarValue::Int(v) => serializer.serialize_i64(*v),
            ScalarValue::Float(v) if !v.is_finite() => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(NON_FINITE_KEY, Self::non_finite_spelling(*v))?;
                map.end()
            }
            ScalarValue::Float(v) => serializer.serialize_f64(*v),
            ScalarValue::Str(s) => serializer.serialize_str(s),
        }
    }
}

/// Kind-specific payload of an argument
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Tensor { shape: Vec<u64>, dtype: String },
    Ndarray { shape: Vec<u64>, dtype: String },
    List(Vec<ScalarValue>),
    Tuple(Vec<ScalarValue>),
    Scalar(ScalarValue),
}

/// One argument of a captured invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ArgDescriptor {
    /// Keyword name; empty for positional arguments
    pub name: String,
    pub value: ArgValue,
}

impl ArgDescriptor {
    pub fn tensor(name: impl Into<String>, shape: Vec<u64>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArgValue::Tensor {
                shape,
                dtype: dtype.into(),
            },
        }
    }

    pub fn scalar(name: impl Into<String>, value: ScalarValue) -> Self {
        Self {
            name: name.into(),
            value: ArgValue::Scalar(value),
        }
    }

    pub fn list(name: impl Into<String>, values: Vec<ScalarValue>) -> Self {
        Self {
            name: name.into(),
            value: ArgValue::List(values),
        }
    }

    pub fn tuple(name: impl Into<String>, values: Vec<ScalarValue>) -> Self {
        Self {
            name: name.into(),
            value: ArgValue::Tuple(values),
        }
    }

    pub fn kind(&self) -> ArgKind {
        match self.value {
            ArgValue::Tensor { .. } => ArgKind::Tensor,
            ArgValue::Ndarray { .. } => ArgKind::Ndarray,
            ArgValue::List(_) => ArgKind::List,
            ArgValue::Tuple(_) => ArgKind::Tuple,
            ArgValue::Scalar(_) => ArgKind::Scalar,
        }
    }

    pub fn is_positional(&self) -> bool {
        self.name.is_empty()
    }

    /// Shape of a tensor or ndarray argument
    pub fn shape(&self) -> Option<&[u64]> {
        match &self.value {
            ArgValue::Tensor { shape, .. } | ArgValue::Ndarray { shape, .. } => Some(shape),
            _ => None,
        }
    }

    /// Element dtype for arrays, scalar type name for scalars
    pub fn dtype(&self) -> Option<&str> {
        match &self.value {
            ArgValue::Tensor { dtype, .. } | ArgValue::Ndarray { dtype, .. } => Some(dtype),
            ArgValue::Scalar(v) => Some(v.type_name()),
            _ => None,
        }
    }

    pub fn scalar_value(&self) -> Option<&ScalarValue> {
        match &self.value {
            ArgValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn sequence(&self) -> Option<&[ScalarValue]> {
        match &self.value {
            ArgValue::List(v) | ArgValue::Tuple(v) => Some(v),
            _ => None,
        }
    }

    /// True for tensor/ndarray arguments with at least one dimension.
    /// Zero-dimensional tensors behave as scalars.
    pub fn is_array(&self) -> bool {
        self.shape().map(|s| !s.is_empty()).unwrap_or(false)
    }
}

/// Structured description of one captured operator invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub module: String,
    pub operator: String,
    pub args: Vec<ArgDescriptor>,
    pub context: TraceContext,
}

impl CallRecord {
    pub fn new(
        module: impl Into<String>,
        operator: impl Into<String>,
        args: Vec<ArgDescriptor>,
        context: TraceContext,
    ) -> Self {
        Self {
            module: module.into(),
            operator: operator.into(),
            args,
            context,
        }
    }

    pub fn sub_level(&self) -> u32 {
        self.context.sub_level
    }

    pub fn direction(&self) -> Direction {
        self.context.direction
    }

    /// Arguments without a keyword name, in call order
    pub fn positional(&self) -> Vec<&ArgDescriptor> {
        self.args.iter().filter(|a| a.is_positional()).collect()
    }

    /// First argument carrying the given keyword name
    pub fn named(&self, name: &str) -> Option<&ArgDescriptor> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Positional slot `index`, falling back to the keyword `name`
    pub fn slot(&self, index: usize, name: &str) -> Option<&ArgDescriptor> {
        self.positional()
            .get(index)
            .copied()
            .or_else(|| self.named(name))
    }
}
