//! Operator family calculators
//!
//! Each submodule owns one or more families and registers the
//! (module, operator) pairs it handles. Adding coverage means adding a
//! calculator and its `register` entries; nothing else changes.

pub mod activation;
pub mod blas;
pub mod conv;
pub mod dropout;
pub mod embedding;
pub mod linear;
pub mod loss;
pub mod memory;
pub mod normalization;
pub mod pointwise;
pub mod reduction;
pub mod softmax;

use crate::error::{AnalysisError, Result};
use crate::registry::OperatorRegistry;
use opmeter_shared::utils::{num_elems, type_to_bytes};
use opmeter_shared::{ArgDescriptor, ArgValue, CallRecord, ParamValue, Params, TensorCoreTag};

pub(crate) const TORCH: &str = "torch";
pub(crate) const TENSOR: &str = "Tensor";
pub(crate) const FUNCTIONAL: &str = "torch.nn.functional";

/// Kernel name fragments that identify tensor-core GEMM/convolution kernels
const TENSOR_CORE_SIGNATURES: &[&str] = &[
    "884gemm",
    "1688gemm",
    "16816gemm",
    "hmma",
    "884cudnn",
    "1688cudnn",
    "xmma",
];

/// Register every built-in family.
pub fn register_defaults(registry: &mut OperatorRegistry) -> Result<()> {
    reduction::register(registry)?;
    pointwise::register(registry)?;
    activation::register(registry)?;
    softmax::register(registry)?;
    blas::register(registry)?;
    linear::register(registry)?;
    conv::register(registry)?;
    normalization::register(registry)?;
    loss::register(registry)?;
    dropout::register(registry)?;
    embedding::register(registry)?;
    memory::register(registry)?;
    Ok(())
}

/// Reject records whose (module, operator) pair the calculator does not own.
pub(crate) fn ensure_owner(
    record: &CallRecord,
    calculator: &'static str,
    modules: &[&str],
    operators: &[&str],
) -> Result<()> {
    if modules.contains(&record.module.as_str()) && operators.contains(&record.operator.as_str()) {
        Ok(())
    } else {
        Err(contract_violation(record, calculator))
    }
}

pub(crate) fn contract_violation(record: &CallRecord, calculator: &'static str) -> AnalysisError {
    AnalysisError::ContractViolation {
        calculator,
        module: record.module.clone(),
        operator: record.operator.clone(),
    }
}

pub(crate) fn invalid(record: &CallRecord, reason: impl Into<String>) -> AnalysisError {
    AnalysisError::InvalidArguments {
        module: record.module.clone(),
        operator: record.operator.clone(),
        reason: reason.into(),
    }
}

/// Saturating sum of operand traffic
pub(crate) fn total_bytes<'a>(operands: impl IntoIterator<Item = &'a Operand>) -> u64 {
    operands
        .into_iter()
        .map(Operand::bytes)
        .fold(0, u64::saturating_add)
}

/// Default nesting policy: only the outermost invocation is charged.
pub(crate) fn primary_only(sub_level: u32, value: u64) -> u64 {
    if sub_level == 0 {
        value
    } else {
        0
    }
}

pub(crate) fn tensor_core_tag(kernel: Option<&str>) -> TensorCoreTag {
    match kernel {
        None => TensorCoreTag::NotApplicable,
        Some(name) if TENSOR_CORE_SIGNATURES.iter().any(|s| name.contains(s)) => {
            TensorCoreTag::Used
        }
        Some(_) => TensorCoreTag::NotUsed,
    }
}

fn describe(arg: &ArgDescriptor) -> String {
    match arg.shape() {
        Some(shape) => format!("{} of shape {:?}", arg.kind(), shape),
        None => arg.kind().to_string(),
    }
}

/// A resolved array operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Operand {
    pub shape: Vec<u64>,
    pub dtype: String,
    pub width: u64,
}

impl Operand {
    fn new(shape: Vec<u64>, dtype: &str) -> Result<Self> {
        let width = type_to_bytes(dtype)?;
        Ok(Self {
            shape,
            dtype: dtype.to_string(),
            width,
        })
    }

    /// Tensor, ndarray or scalar operand. Scalars and zero-dimensional
    /// tensors become a single-element operand of shape `(1,)`.
    pub fn resolve(record: &CallRecord, arg: &ArgDescriptor) -> Result<Self> {
        match &arg.value {
            ArgValue::Tensor { shape, dtype } | ArgValue::Ndarray { shape, dtype } => {
                let shape = if shape.is_empty() {
                    vec![1]
                } else {
                    shape.clone()
                };
                Self::new(shape, dtype)
            }
            ArgValue::Scalar(v) => Self::new(vec![1], v.type_name()),
            _ => Err(invalid(
                record,
                format!("expected a tensor or scalar operand, found {}", describe(arg)),
            )),
        }
    }

    /// Tensor or ndarray with at least one dimension
    pub fn array(record: &CallRecord, arg: &ArgDescriptor, role: &str) -> Result<Self> {
        match (&arg.value, arg.is_array()) {
            (ArgValue::Tensor { shape, dtype } | ArgValue::Ndarray { shape, dtype }, true) => {
                Self::new(shape.clone(), dtype)
            }
            _ => Err(invalid(
                record,
                format!("{} must be a non-scalar tensor, found {}", role, describe(arg)),
            )),
        }
    }

    /// Like [`Operand::array`], but the argument must be present
    pub fn required(
        record: &CallRecord,
        arg: Option<&ArgDescriptor>,
        role: &str,
    ) -> Result<Self> {
        let arg = arg.ok_or_else(|| invalid(record, format!("missing {}", role)))?;
        Self::array(record, arg, role)
    }

    pub fn elements(&self) -> u64 {
        num_elems(&self.shape)
    }

    pub fn bytes(&self) -> u64 {
        self.elements().saturating_mul(self.width)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// `T` (shape) and `type` (dtype) summary
    pub fn params(&self) -> Params {
        Params::new()
            .with("T", ParamValue::Shape(self.shape.clone()))
            .with("type", ParamValue::Str(self.dtype.clone()))
    }
}
