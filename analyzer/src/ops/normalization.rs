//! Batch, layer, group and instance normalization

use super::{ensure_owner, primary_only, Operand, FUNCTIONAL};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::{CallRecord, Direction, Params};

const OPERATORS: &[&str] = &["batch_norm", "layer_norm", "group_norm", "instance_norm"];

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_all(&[FUNCTIONAL], OPERATORS, "Normalization", |r| {
        Ok(Box::new(Normalization::new(r)?))
    })
}

/// Statistics and affine parameters are small next to the activation and
/// are not charged.
#[derive(Debug, Clone)]
pub struct Normalization {
    module: String,
    operator: String,
    input: Operand,
    direction: Direction,
    sub_level: u32,
}

impl Normalization {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Normalization", &[FUNCTIONAL], OPERATORS)?;
        let input = Operand::required(record, record.slot(0, "input"), "input")?;
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            input,
            direction: record.direction(),
            sub_level: record.sub_level(),
        })
    }
}

impl Operator for Normalization {
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
        let passes = match self.direction {
            Direction::Forward => 4,
            Direction::Backward => 5,
        };
        primary_only(self.sub_level, self.input.bytes().saturating_mul(passes))
    }

    fn flops(&self) -> u64 {
        primary_only(self.sub_level, self.elements().saturating_mul(8))
    }
}
