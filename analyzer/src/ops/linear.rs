//! Fully connected layer

use super::blas::Gemm;
use super::{ensure_owner, invalid, total_bytes, Operand, FUNCTIONAL};
use crate::error::Result;
use crate::registry::OperatorRegistry;
use opmeter_shared::utils::num_elems;
use opmeter_shared::CallRecord;

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register(FUNCTIONAL, "linear", "Linear", |r| Ok(Box::new(Gemm::linear(r)?)))
}

impl Gemm {
    /// `linear(input, weight, bias=None)`: input `(..., K)`, weight `(N, K)`.
    /// Leading input dimensions fold into `M`.
    pub fn linear(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Linear", &[FUNCTIONAL], &["linear"])?;
        let input = Operand::required(record, record.slot(0, "input"), "input")?;
        let weight = Operand::required(record, record.slot(1, "weight"), "weight")?;
        if weight.rank() != 2 {
            return Err(invalid(
                record,
                format!("weight must be 2-D, found shape {:?}", weight.shape),
            ));
        }
        let (n, k) = (weight.shape[0], weight.shape[1]);
        let (leading, inner) = input.shape.split_at(input.rank() - 1);
        if inner[0] != k {
            return Err(invalid(
                record,
                format!("input features {} do not match weight features {}", inner[0], k),
            ));
        }
        let m = num_elems(leading);

        // an explicit None bias is recorded as a scalar
        let bias = match record.slot(2, "bias") {
            Some(arg) if arg.shape().is_some() => Some(Operand::resolve(record, arg)?),
            _ => None,
        };
        let read = total_bytes([&input, &weight].into_iter().chain(bias.as_ref()));
        Ok(Gemm::from_parts(
            record,
            None,
            (m, n, k),
            read,
            bias.is_some(),
            &input,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::AnalysisError;
    use crate::operator::Operator;
    use opmeter_shared::{ArgDescriptor, ScalarValue, TensorCoreTag};

    #[test]
    fn test_linear_with_bias() {
        let r = record(
            FUNCTIONAL,
            "linear",
            vec![
                tensor(&[32, 128], "float16"),
                tensor(&[64, 128], "float16"),
                tensor(&[64], "float16"),
            ],
        );
        let g = Gemm::linear(&r).unwrap();
        assert_eq!(g.elements(), 32 * 64);
        assert_eq!(g.bytes(), (32 * 128 + 64 * 128 + 64 + 32 * 64) * 2);
        assert_eq!(g.flops(), 2 * 32 * 64 * 128 + 32 * 64);
        assert_eq!(g.params().to_string(), "M=32,N=64,K=128,type=float16");
    }

    #[test]
    fn test_linear_batched_input_without_bias() {
        let r = record(
            FUNCTIONAL,
            "linear",
            vec![
                tensor(&[4, 10, 16], "float32"),
                named_tensor("weight", &[8, 16], "float32"),
                ArgDescriptor::scalar("bias", ScalarValue::None),
            ],
        );
        let g = Gemm::linear(&r).unwrap();
        assert_eq!(g.m, 40);
        assert_eq!(g.flops(), 2 * 40 * 8 * 16);
        assert_eq!(g.bytes(), (40 * 16 + 8 * 16 + 40 * 8) * 4);
    }

    #[test]
    fn test_linear_tensor_core_tag() {
        let r = on_kernel(
            record(
                FUNCTIONAL,
                "linear",
                vec![tensor(&[8, 8], "float16"), tensor(&[8, 8], "float16")],
            ),
            "ampere_fp16_s16816gemm_fp16_128x64_ldg8_f2f_tn",
        );
        assert_eq!(Gemm::linear(&r).unwrap().tensor_core(), TensorCoreTag::Used);
    }

    #[test]
    fn test_linear_feature_mismatch() {
        let r = record(
            FUNCTIONAL,
            "linear",
            vec![tensor(&[2, 5], "float32"), tensor(&[3, 4], "float32")],
        );
        assert!(matches!(
            Gemm::linear(&r).unwrap_err(),
            AnalysisError::InvalidArguments { .. }
        ));
    }
}
