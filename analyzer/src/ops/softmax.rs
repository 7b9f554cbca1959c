//! Softmax and log-softmax

use super::{ensure_owner, invalid, primary_only, Operand, FUNCTIONAL, TENSOR, TORCH};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::{CallRecord, Direction, Params};

const MODULES: &[&str] = &[FUNCTIONAL, TENSOR, TORCH];
const OPERATORS: &[&str] = &["softmax", "log_softmax"];

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_all(MODULES, OPERATORS, "Softmax", |r| {
        Ok(Box::new(Softmax::new(r)?))
    })
}

#[derive(Debug, Clone)]
pub struct Softmax {
    module: String,
    operator: String,
    input: Operand,
    direction: Direction,
    sub_level: u32,
}

impl Softmax {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Softmax", MODULES, OPERATORS)?;
        let input = match record.slot(0, "input") {
            Some(arg) => Operand::array(record, arg, "input")?,
            None => return Err(invalid(record, "missing input operand")),
        };
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            input,
            direction: record.direction(),
            sub_level: record.sub_level(),
        })
    }

    fn is_log(&self) -> bool {
        self.operator == "log_softmax"
    }
}

impl Operator for Softmax {
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
            Direction::Forward => 2,
            Direction::Backward => 3,
        };
        primary_only(self.sub_level, self.input.bytes().saturating_mul(passes))
    }

    // exp, sum, divide; log adds one more pass
    fn flops(&self) -> u64 {
        let per_element = if self.is_log() { 4 } else { 3 };
        primary_only(self.sub_level, self.elements().saturating_mul(per_element))
    }
}
