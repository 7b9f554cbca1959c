//! Mean squared error loss

use super::{ensure_owner, invalid, primary_only, Operand, FUNCTIONAL};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::{CallRecord, Direction, ParamValue, Params};

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register(FUNCTIONAL, "mse_loss", "MseLoss", |r| {
        Ok(Box::new(MseLoss::new(r)?))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    None,
    Mean,
    Sum,
}

impl Reduction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::None => "none",
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MseLoss {
    module: String,
    operator: String,
    input: Operand,
    reduction: Reduction,
    direction: Direction,
    sub_level: u32,
}

impl MseLoss {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "MseLoss", &[FUNCTIONAL], &["mse_loss"])?;
        let input = Operand::required(record, record.slot(0, "input"), "input")?;
        let target = Operand::required(record, record.slot(1, "target"), "target")?;
        if input.shape != target.shape {
            return Err(invalid(
                record,
                format!(
                    "input {:?} and target {:?} differ in shape",
                    input.shape, target.shape
                ),
            ));
        }

        // mse_loss(input, target, size_average, reduce, reduction)
        let reduction = match record
            .slot(4, "reduction")
            .and_then(|a| a.scalar_value())
            .and_then(|v| v.as_str())
        {
            None | Some("mean") => Reduction::Mean,
            Some("none") => Reduction::None,
            Some("sum") => Reduction::Sum,
            Some(other) => {
                return Err(invalid(record, format!("unknown reduction {:?}", other)))
            }
        };

        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            input,
            reduction,
            direction: record.direction(),
            sub_level: record.sub_level(),
        })
    }
}

impl Operator for MseLoss {
    fn module(&self) -> &str {
        &self.module
    }

    fn operator(&self) -> &str {
        &self.operator
    }

    fn params(&self) -> Params {
        self.input
            .params()
            .with("red", ParamValue::Str(self.reduction.as_str().to_string()))
    }

    fn elements(&self) -> u64 {
        self.input.elements()
    }

    /// Input and target are always read; an unreduced loss also writes a
    /// full-size output. Backward additionally writes the input gradient.
    fn bytes(&self) -> u64 {
        let mut passes = match self.reduction {
            Reduction::None => 3,
            Reduction::Mean | Reduction::Sum => 2,
        };
        if self.direction == Direction::Backward {
            passes += 1;
        }
        primary_only(self.sub_level, self.input.bytes().saturating_mul(passes))
    }

    fn flops(&self) -> u64 {
        let per_element = match self.reduction {
            Reduction::None => 2,
            Reduction::Mean | Reduction::Sum => 3,
        };
        primary_only(self.sub_level, self.elements().saturating_mul(per_element))
    }
}
