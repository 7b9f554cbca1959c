//! Activation functions

use super::{contract_violation, invalid, primary_only, Operand, FUNCTIONAL, TENSOR, TORCH};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::{CallRecord, Direction, Params};

const FUNCTIONAL_OPS: &[&str] = &[
    "relu", "relu_", "relu6", "gelu", "elu", "elu_", "leaky_relu", "leaky_relu_", "hardtanh",
    "hardtanh_", "selu", "celu", "silu", "mish", "softplus", "softsign", "hardswish",
    "hardsigmoid", "logsigmoid", "prelu", "glu", "threshold", "threshold_", "tanh", "sigmoid",
];

const TENSOR_OPS: &[&str] = &["relu", "relu_"];

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_all(&[FUNCTIONAL], FUNCTIONAL_OPS, "Activation", |r| {
        Ok(Box::new(Activation::new(r)?))
    })?;
    registry.register_all(&[TORCH, TENSOR], TENSOR_OPS, "Activation", |r| {
        Ok(Box::new(Activation::new(r)?))
    })?;
    Ok(())
}

fn owns(module: &str, operator: &str) -> bool {
    match module {
        FUNCTIONAL => FUNCTIONAL_OPS.contains(&operator),
        TORCH | TENSOR => TENSOR_OPS.contains(&operator),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct Activation {
    module: String,
    operator: String,
    input: Operand,
    direction: Direction,
    sub_level: u32,
}

impl Activation {
    pub fn new(record: &CallRecord) -> Result<Self> {
        if !owns(&record.module, &record.operator) {
            return Err(contract_violation(record, "Activation"));
        }
        let positional = record.positional();
        let arg = positional
            .first()
            .ok_or_else(|| invalid(record, "missing input operand"))?;
        let input = Operand::resolve(record, arg)?;
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            input,
            direction: record.direction(),
            sub_level: record.sub_level(),
        })
    }
}

impl Operator for Activation {
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

    /// Forward reads the input and writes the output; backward also reads
    /// the incoming gradient.
    fn bytes(&self) -> u64 {
        let passes = match self.direction {
            Direction::Forward => 2,
            Direction::Backward => 3,
        };
        primary_only(self.sub_level, self.input.bytes().saturating_mul(passes))
    }

    fn flops(&self) -> u64 {
        primary_only(self.sub_level, self.elements())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::AnalysisError;

    #[test]
    fn test_relu_forward_and_backward() {
        let fwd = record(FUNCTIONAL, "relu", vec![tensor(&[32, 64], "float16")]);
        let a = Activation::new(&fwd).unwrap();
        assert_eq!(a.elements(), 2048);
        assert_eq!(a.bytes(), 2 * 2048 * 2);
        assert_eq!(a.flops(), 2048);

        let bwd = backward(fwd);
        let a = Activation::new(&bwd).unwrap();
        assert_eq!(a.bytes(), 3 * 2048 * 2);
        assert_eq!(a.flops(), 2048);
    }

    #[test]
    fn test_tensor_relu_registered_separately() {
        let r = record(TENSOR, "relu_", vec![tensor(&[10], "float32")]);
        assert_eq!(Activation::new(&r).unwrap().bytes(), 80);
    }

    #[test]
    fn test_gelu_only_under_functional() {
        let r = record(TENSOR, "gelu", vec![tensor(&[10], "float32")]);
        assert!(matches!(
            Activation::new(&r).unwrap_err(),
            AnalysisError::ContractViolation { .. }
        ));
    }

    #[test]
    fn test_nested_suppressed() {
        let r = nested(record(FUNCTIONAL, "silu", vec![tensor(&[10], "float32")]), 1);
        let a = Activation::new(&r).unwrap();
        assert_eq!(a.elements(), 10);
        assert_eq!(a.bytes(), 0);
        assert_eq!(a.flops(), 0);
    }
}
