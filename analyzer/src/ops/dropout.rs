//! Dropout

use super::{ensure_owner, invalid, primary_only, Operand, FUNCTIONAL};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::{CallRecord, Params};

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register(FUNCTIONAL, "dropout", "Dropout", |r| {
        Ok(Box::new(Dropout::new(r)?))
    })
}

#[derive(Debug, Clone)]
pub struct Dropout {
    module: String,
    operator: String,
    input: Operand,
    training: bool,
    sub_level: u32,
}

impl Dropout {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Dropout", &[FUNCTIONAL], &["dropout"])?;
        let input = Operand::required(record, record.slot(0, "input"), "input")?;

        let p = match record.slot(1, "p").and_then(|a| a.scalar_value()) {
            None => 0.5,
            Some(v) => v
                .as_f64()
                .filter(|p| (0.0..=1.0).contains(p))
                .ok_or_else(|| invalid(record, "p must be a probability in [0, 1]"))?,
        };
        let training = match record.slot(2, "training").and_then(|a| a.scalar_value()) {
            None => true,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| invalid(record, "training must be a bool"))?,
        };

        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            input,
            training: training && p > 0.0,
            sub_level: record.sub_level(),
        })
    }

    /// Whether the call does any work; evaluation mode is the identity
    pub fn is_active(&self) -> bool {
        self.training
    }
}

impl Operator for Dropout {
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

    // read input, write output, write a one-byte mask per element
    fn bytes(&self) -> u64 {
        if !self.training {
            return 0;
        }
        let moved = self.input.bytes().saturating_mul(2);
        primary_only(self.sub_level, moved.saturating_add(self.elements()))
    }

    fn flops(&self) -> u64 {
        if !self.training {
            return 0;
        }
        primary_only(self.sub_level, self.elements())
    }
}
