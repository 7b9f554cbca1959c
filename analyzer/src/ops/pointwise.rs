//! Elementwise arithmetic, comparison and transcendental operators

use super::{contract_violation, invalid, primary_only, total_bytes, Operand, TENSOR, TORCH};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::utils::{broadcast_shapes, num_elems};
use opmeter_shared::{ArgValue, CallRecord, ParamValue, Params};

const MODULES: &[&str] = &[TORCH, TENSOR];

const ARITHMETIC: &[&str] = &[
    "add", "add_", "sub", "sub_", "rsub", "mul", "mul_", "div", "div_", "true_divide",
    "floor_divide", "remainder", "fmod", "neg", "neg_", "abs", "abs_", "clamp", "clamp_",
    "clamp_min", "clamp_max", "maximum", "minimum", "floor", "ceil", "round", "trunc",
    "sign", "reciprocal", "lerp", "addcmul", "addcmul_", "addcdiv", "addcdiv_", "where",
    "__add__", "__radd__", "__iadd__", "__sub__", "__rsub__", "__isub__", "__mul__",
    "__rmul__", "__imul__", "__truediv__", "__rtruediv__", "__itruediv__", "__floordiv__",
    "__mod__", "__neg__", "__and__", "__or__", "__xor__", "__invert__",
];

const COMPARISON: &[&str] = &[
    "eq", "ne", "lt", "le", "gt", "ge", "__eq__", "__ne__", "__lt__", "__le__", "__gt__",
    "__ge__",
];

const TRANSCENDENTAL: &[&str] = &[
    "exp", "exp_", "expm1", "log", "log_", "log2", "log10", "log1p", "sqrt", "sqrt_",
    "rsqrt", "rsqrt_", "pow", "pow_", "__pow__", "__rpow__", "tanh", "tanh_", "sigmoid",
    "sigmoid_", "erf", "sin", "cos", "tan", "sinh", "cosh",
];

const INVERSE_TRIG: &[&str] = &["asin", "acos", "atan", "atan2"];

/// Most operands any registered operator takes (`where`, `addcmul`)
const MAX_OPERANDS: usize = 3;

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    for operators in [ARITHMETIC, COMPARISON, TRANSCENDENTAL, INVERSE_TRIG] {
        registry.register_all(MODULES, operators, "Pointwise", |r| {
            Ok(Box::new(Pointwise::new(r)?))
        })?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Arithmetic,
    Comparison,
    Transcendental,
    InverseTrig,
}

impl Class {
    fn of(operator: &str) -> Option<Self> {
        if ARITHMETIC.contains(&operator) {
            Some(Class::Arithmetic)
        } else if COMPARISON.contains(&operator) {
            Some(Class::Comparison)
        } else if TRANSCENDENTAL.contains(&operator) {
            Some(Class::Transcendental)
        } else if INVERSE_TRIG.contains(&operator) {
            Some(Class::InverseTrig)
        } else {
            None
        }
    }

    /// Flops charged per output element
    fn factor(self) -> u64 {
        match self {
            Class::Arithmetic | Class::Comparison => 1,
            Class::Transcendental => 2,
            Class::InverseTrig => 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pointwise {
    module: String,
    operator: String,
    class: Class,
    inputs: Vec<Operand>,
    output_shape: Vec<u64>,
    output_width: u64,
    sub_level: u32,
}

impl Pointwise {
    pub fn new(record: &CallRecord) -> Result<Self> {
        let class = match Class::of(&record.operator) {
            Some(class) if MODULES.contains(&record.module.as_str()) => class,
            _ => return Err(contract_violation(record, "Pointwise")),
        };

        let inputs = record
            .positional()
            .into_iter()
            .filter(|a| matches!(a.value, ArgValue::Tensor { .. } | ArgValue::Ndarray { .. }))
            .map(|a| Operand::resolve(record, a))
            .collect::<Result<Vec<_>>>()?;
        if inputs.is_empty() {
            return Err(invalid(record, "no tensor operand"));
        }
        if inputs.len() > MAX_OPERANDS {
            return Err(invalid(
                record,
                format!(
                    "expected at most {} tensor operands, found {}",
                    MAX_OPERANDS,
                    inputs.len()
                ),
            ));
        }

        let mut output_shape = inputs[0].shape.clone();
        for input in &inputs[1..] {
            output_shape = broadcast_shapes(&output_shape, &input.shape).ok_or_else(|| {
                invalid(
                    record,
                    format!("shapes {:?} and {:?} do not broadcast", output_shape, input.shape),
                )
            })?;
        }

        let output_width = match class {
            Class::Comparison => 1,
            _ => inputs.iter().map(|i| i.width).max().unwrap_or(1),
        };

        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            class,
            inputs,
            output_shape,
            output_width,
            sub_level: record.sub_level(),
        })
    }
}

impl Operator for Pointwise {
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
        num_elems(&self.output_shape)
    }

    fn bytes(&self) -> u64 {
        let written = self.elements().saturating_mul(self.output_width);
        primary_only(
            self.sub_level,
            total_bytes(&self.inputs).saturating_add(written),
        )
    }

    fn flops(&self) -> u64 {
        primary_only(self.sub_level, self.elements().saturating_mul(self.class.factor()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::AnalysisError;

    #[test]
    fn test_add_same_shape() {
        let r = record(
            TORCH,
            "add",
            vec![tensor(&[2, 3], "float32"), tensor(&[2, 3], "float32")],
        );
        let p = Pointwise::new(&r).unwrap();
        assert_eq!(p.elements(), 6);
        assert_eq!(p.bytes(), 72);
        assert_eq!(p.flops(), 6);
        assert_eq!(
            p.params().get("T"),
            Some(&ParamValue::Shapes(vec![vec![2, 3], vec![2, 3]]))
        );
    }

    #[test]
    fn test_broadcast_with_scalar_ignored() {
        let r = record(
            TENSOR,
            "__mul__",
            vec![tensor(&[4, 1], "float16"), tensor(&[5], "float16"), float("", 2.0)],
        );
        let p = Pointwise::new(&r).unwrap();
        assert_eq!(p.elements(), 20);
        assert_eq!(p.bytes(), (4 + 5 + 20) * 2);
    }

    #[test]
    fn test_mixed_width_output_uses_widest() {
        let r = record(
            TORCH,
            "add",
            vec![tensor(&[8], "float16"), tensor(&[8], "float32")],
        );
        let p = Pointwise::new(&r).unwrap();
        assert_eq!(p.bytes(), 8 * 2 + 8 * 4 + 8 * 4);
    }

    #[test]
    fn test_comparison_writes_bool() {
        let r = record(
            TENSOR,
            "gt",
            vec![tensor(&[10], "float32"), tensor(&[], "float32")],
        );
        let p = Pointwise::new(&r).unwrap();
        assert_eq!(p.elements(), 10);
        assert_eq!(p.bytes(), 40 + 4 + 10);
        assert_eq!(p.flops(), 10);
    }

    #[test]
    fn test_cost_factors() {
        let exp = record(TORCH, "exp", vec![tensor(&[100], "float32")]);
        assert_eq!(Pointwise::new(&exp).unwrap().flops(), 200);
        let asin = record(TORCH, "asin", vec![tensor(&[100], "float32")]);
        assert_eq!(Pointwise::new(&asin).unwrap().flops(), 1000);
    }

    #[test]
    fn test_nested_suppressed() {
        let r = nested(record(TORCH, "sqrt", vec![tensor(&[16], "float32")]), 1);
        let p = Pointwise::new(&r).unwrap();
        assert_eq!(p.bytes(), 0);
        assert_eq!(p.flops(), 0);
    }

    #[test]
    fn test_not_broadcastable() {
        let r = record(
            TORCH,
            "add",
            vec![tensor(&[3], "float32"), tensor(&[4], "float32")],
        );
        assert!(matches!(
            Pointwise::new(&r).unwrap_err(),
            AnalysisError::InvalidArguments { .. }
        ));
    }

    #[test]
    fn test_scalars_only_rejected() {
        let r = record(TORCH, "add", vec![int("", 1), int("", 2)]);
        assert!(matches!(
            Pointwise::new(&r).unwrap_err(),
            AnalysisError::InvalidArguments { .. }
        ));
    }

    #[test]
    fn test_foreign_operator_is_contract_violation() {
        let r = record(TORCH, "mean", vec![tensor(&[3], "float32")]);
        assert!(matches!(
            Pointwise::new(&r).unwrap_err(),
            AnalysisError::ContractViolation { .. }
        ));
    }
}
