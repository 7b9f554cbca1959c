//! Data movement: copies, concatenation and view changes

use super::{ensure_owner, invalid, primary_only, total_bytes, Operand, TENSOR, TORCH};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::{ArgValue, CallRecord, ParamValue, Params};

const VIEW_OPS: &[&str] = &[
    "view", "reshape", "flatten", "squeeze", "unsqueeze", "permute", "transpose", "t", "expand",
];

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register(TENSOR, "copy_", "Copy", |r| Ok(Box::new(TensorCopy::new(r)?)))?;
    registry.register_all(&[TORCH, TENSOR], &["clone", "contiguous"], "Copy", |r| {
        Ok(Box::new(TensorCopy::new(r)?))
    })?;
    registry.register(TORCH, "cat", "Cat", |r| Ok(Box::new(Cat::new(r)?)))?;
    registry.register_all(&[TORCH, TENSOR], VIEW_OPS, "View", |r| {
        Ok(Box::new(View::new(r)?))
    })?;
    Ok(())
}

/// Materializing copy of one tensor
#[derive(Debug, Clone)]
pub struct TensorCopy {
    module: String,
    operator: String,
    src: Operand,
    /// Destination of `copy_`; other copies write a tensor like `src`
    dst: Option<Operand>,
    sub_level: u32,
}

impl TensorCopy {
    pub fn new(record: &CallRecord) -> Result<Self> {
        let in_place = record.module == TENSOR && record.operator == "copy_";
        if !in_place {
            ensure_owner(record, "Copy", &[TORCH, TENSOR], &["clone", "contiguous"])?;
        }
        let positional = record.positional();
        let (src, dst) = if in_place {
            let dst = positional
                .first()
                .ok_or_else(|| invalid(record, "missing destination"))?;
            let src = positional
                .get(1)
                .ok_or_else(|| invalid(record, "missing source"))?;
            (
                Operand::resolve(record, src)?,
                Some(Operand::resolve(record, dst)?),
            )
        } else {
            let src = positional
                .first()
                .ok_or_else(|| invalid(record, "missing input operand"))?;
            (Operand::resolve(record, src)?, None)
        };
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            src,
            dst,
            sub_level: record.sub_level(),
        })
    }
}

impl Operator for TensorCopy {
    fn module(&self) -> &str {
        &self.module
    }

    fn operator(&self) -> &str {
        &self.operator
    }

    fn params(&self) -> Params {
        let mut params = self.src.params();
        if let Some(dst) = &self.dst {
            params = params.with("dtype", ParamValue::Str(dst.dtype.clone()));
        }
        params
    }

    fn elements(&self) -> u64 {
        self.dst.as_ref().unwrap_or(&self.src).elements()
    }

    fn bytes(&self) -> u64 {
        let written = self.dst.as_ref().unwrap_or(&self.src).bytes();
        primary_only(self.sub_level, self.src.bytes().saturating_add(written))
    }

    fn flops(&self) -> u64 {
        0
    }
}

#[derive(Debug, Clone)]
pub struct Cat {
    module: String,
    operator: String,
    inputs: Vec<Operand>,
    sub_level: u32,
}

impl Cat {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Cat", &[TORCH], &["cat"])?;
        let inputs = record
            .args
            .iter()
            .filter(|a| a.is_positional() || a.name == "tensors")
            .filter(|a| matches!(a.value, ArgValue::Tensor { .. } | ArgValue::Ndarray { .. }))
            .map(|a| Operand::resolve(record, a))
            .collect::<Result<Vec<_>>>()?;
        if inputs.is_empty() {
            return Err(invalid(record, "no tensors to concatenate"));
        }
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            inputs,
            sub_level: record.sub_level(),
        })
    }
}

impl Operator for Cat {
    fn module(&self) -> &str {
        &self.module
    }

    fn operator(&self) -> &str {
        &self.operator
    }

    fn params(&self) -> Params {
        Params::new()
            .with(
                "T",
                ParamValue::Shapes(self.inputs.iter().map(|i| i.shape.clone()).collect()),
            )
            .with("type", ParamValue::Str(self.inputs[0].dtype.clone()))
    }

    fn elements(&self) -> u64 {
        self.inputs
            .iter()
            .map(Operand::elements)
            .fold(0, u64::saturating_add)
    }

    fn bytes(&self) -> u64 {
        primary_only(self.sub_level, total_bytes(&self.inputs).saturating_mul(2))
    }

    fn flops(&self) -> u64 {
        0
    }
}

/// Metadata-only reshapes; no data moves
#[derive(Debug, Clone)]
pub struct View {
    module: String,
    operator: String,
    input: Operand,
}

impl View {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "View", &[TORCH, TENSOR], VIEW_OPS)?;
        let positional = record.positional();
        let arg = positional
            .first()
            .ok_or_else(|| invalid(record, "missing input operand"))?;
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            input: Operand::resolve(record, arg)?,
        })
    }
}

impl Operator for View {
    fn module(&self) -> &str {
        &self.module
    }

    fn operator(&self) -> &str {
        &self.operator
    }

    fn params(&self) -> Params {
        self.input.params()
    }

    fn elements(&self) -> u64 {
        self.input.elements()
    }

    fn bytes(&self) -> u64 {
        0
    }

    fn flops(&self) -> u64 {
        0
    }
}
