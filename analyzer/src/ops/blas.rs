//! Matrix products: mm, bmm, addmm, matmul

use super::{
    ensure_owner, invalid, primary_only, tensor_core_tag, total_bytes, Operand, TENSOR, TORCH,
};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::utils::{broadcast_shapes, num_elems};
use opmeter_shared::{CallRecord, ParamValue, Params, TensorCoreTag};

const MODULES: &[&str] = &[TORCH, TENSOR];
const MATMUL_OPS: &[&str] = &["matmul", "__matmul__"];

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_all(MODULES, &["mm"], "Mm", |r| Ok(Box::new(Gemm::mm(r)?)))?;
    registry.register_all(MODULES, &["bmm"], "Bmm", |r| Ok(Box::new(Gemm::bmm(r)?)))?;
    registry.register_all(MODULES, &["addmm"], "Addmm", |r| Ok(Box::new(Gemm::addmm(r)?)))?;
    registry.register_all(MODULES, MATMUL_OPS, "Matmul", |r| {
        Ok(Box::new(Gemm::matmul(r)?))
    })?;
    Ok(())
}

/// A (possibly batched) `M x K` by `K x N` product
#[derive(Debug, Clone)]
pub struct Gemm {
    pub(crate) module: String,
    pub(crate) operator: String,
    /// Broadcast batch size; `None` for plain 2-D products
    pub(crate) batch: Option<u64>,
    pub(crate) m: u64,
    pub(crate) n: u64,
    pub(crate) k: u64,
    /// Bytes of every operand read (A, B and any addend)
    pub(crate) read_bytes: u64,
    /// Add the accumulated addend (`addmm` input, linear bias) to each output
    pub(crate) epilogue: bool,
    pub(crate) dtype: String,
    pub(crate) width: u64,
    pub(crate) sub_level: u32,
    pub(crate) tensor_core: TensorCoreTag,
}

impl Gemm {
    pub(crate) fn from_parts(
        record: &CallRecord,
        batch: Option<u64>,
        (m, n, k): (u64, u64, u64),
        read_bytes: u64,
        epilogue: bool,
        output: &Operand,
    ) -> Self {
        Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            batch,
            m,
            n,
            k,
            read_bytes,
            epilogue,
            dtype: output.dtype.clone(),
            width: output.width,
            sub_level: record.sub_level(),
            tensor_core: tensor_core_tag(record.context.kernel.as_deref()),
        }
    }

    fn matrix(record: &CallRecord, index: usize, name: &str, rank: usize) -> Result<Operand> {
        let operand = Operand::required(record, record.slot(index, name), name)?;
        if operand.rank() != rank {
            return Err(invalid(
                record,
                format!("{} must be {}-D, found shape {:?}", name, rank, operand.shape),
            ));
        }
        Ok(operand)
    }

    fn check_inner(record: &CallRecord, left: u64, right: u64) -> Result<()> {
        if left != right {
            return Err(invalid(
                record,
                format!("inner dimensions differ: {} vs {}", left, right),
            ));
        }
        Ok(())
    }

    pub fn mm(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Mm", MODULES, &["mm"])?;
        let a = Self::matrix(record, 0, "input", 2)?;
        let b = Self::matrix(record, 1, "mat2", 2)?;
        Self::check_inner(record, a.shape[1], b.shape[0])?;
        let dims = (a.shape[0], b.shape[1], a.shape[1]);
        Ok(Self::from_parts(record, None, dims, total_bytes([&a, &b]), false, &a))
    }

    pub fn bmm(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Bmm", MODULES, &["bmm"])?;
        let a = Self::matrix(record, 0, "input", 3)?;
        let b = Self::matrix(record, 1, "mat2", 3)?;
        if a.shape[0] != b.shape[0] {
            return Err(invalid(
                record,
                format!("batch sizes differ: {} vs {}", a.shape[0], b.shape[0]),
            ));
        }
        Self::check_inner(record, a.shape[2], b.shape[1])?;
        let dims = (a.shape[1], b.shape[2], a.shape[2]);
        Ok(Self::from_parts(
            record,
            Some(a.shape[0]),
            dims,
            total_bytes([&a, &b]),
            false,
            &a,
        ))
    }

    pub fn addmm(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Addmm", MODULES, &["addmm"])?;
        let c = Operand::required(record, record.slot(0, "input"), "input")?;
        let a = Self::matrix(record, 1, "mat1", 2)?;
        let b = Self::matrix(record, 2, "mat2", 2)?;
        Self::check_inner(record, a.shape[1], b.shape[0])?;
        let (m, n) = (a.shape[0], b.shape[1]);
        if broadcast_shapes(&c.shape, &[m, n]).as_deref() != Some(&[m, n][..]) {
            return Err(invalid(
                record,
                format!("input of shape {:?} does not broadcast to ({}, {})", c.shape, m, n),
            ));
        }
        let read = total_bytes([&c, &a, &b]);
        Ok(Self::from_parts(record, None, (m, n, a.shape[1]), read, true, &a))
    }

    /// `matmul` with 1-D promotion and batch broadcasting
    pub fn matmul(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Matmul", MODULES, MATMUL_OPS)?;
        let a = Operand::required(record, record.slot(0, "input"), "input")?;
        let b = Operand::required(record, record.slot(1, "other"), "other")?;

        // a 1-D left operand is a row vector, a 1-D right operand a column
        let (a_batch, m, k) = match a.shape.as_slice() {
            [k] => (&[][..], 1, *k),
            [batch @ .., m, k] => (batch, *m, *k),
            [] => return Err(invalid(record, "input must be a non-scalar tensor")),
        };
        let (b_batch, k2, n) = match b.shape.as_slice() {
            [k] => (&[][..], *k, 1),
            [batch @ .., k, n] => (batch, *k, *n),
            [] => return Err(invalid(record, "other must be a non-scalar tensor")),
        };
        Self::check_inner(record, k, k2)?;

        let batch = broadcast_shapes(a_batch, b_batch).ok_or_else(|| {
            invalid(
                record,
                format!("batch dimensions {:?} and {:?} do not broadcast", a_batch, b_batch),
            )
        })?;
        let batch = if batch.is_empty() {
            None
        } else {
            Some(num_elems(&batch))
        };
        Ok(Self::from_parts(
            record,
            batch,
            (m, n, k),
            total_bytes([&a, &b]),
            false,
            &a,
        ))
    }

    fn batches(&self) -> u64 {
        self.batch.unwrap_or(1)
    }
}

impl Operator for Gemm {
    fn module(&self) -> &str {
        &self.module
    }

    fn operator(&self) -> &str {
        &self.operator
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        if let Some(b) = self.batch {
            params = params.with("B", ParamValue::Int(b));
        }
        params
            .with("M", ParamValue::Int(self.m))
            .with("N", ParamValue::Int(self.n))
            .with("K", ParamValue::Int(self.k))
            .with("type", ParamValue::Str(self.dtype.clone()))
    }

    fn tensor_core(&self) -> TensorCoreTag {
        self.tensor_core
    }

    fn elements(&self) -> u64 {
        self.batches().saturating_mul(self.m).saturating_mul(self.n)
    }

    fn bytes(&self) -> u64 {
        let written = self.elements().saturating_mul(self.width);
        primary_only(self.sub_level, self.read_bytes.saturating_add(written))
    }

    fn flops(&self) -> u64 {
        let mut flops = self.elements().saturating_mul(self.k).saturating_mul(2);
        if self.epilogue {
            flops = flops.saturating_add(self.elements());
        }
        primary_only(self.sub_level, flops)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::AnalysisError;

    #[test]
    fn test_mm() {
        let r = record(
            TORCH,
            "mm",
            vec![tensor(&[64, 32], "float16"), tensor(&[32, 16], "float16")],
        );
        let g = Gemm::mm(&r).unwrap();
        assert_eq!(g.elements(), 64 * 16);
        assert_eq!(g.bytes(), (64 * 32 + 32 * 16 + 64 * 16) * 2);
        assert_eq!(g.flops(), 2 * 64 * 16 * 32);
        assert_eq!(g.tensor_core(), TensorCoreTag::NotApplicable);
        assert_eq!(g.params().to_string(), "M=64,N=16,K=32,type=float16");
    }

    #[test]
    fn test_mm_flops_saturate() {
        let r = record(
            TORCH,
            "mm",
            vec![
                tensor(&[1 << 20, 1 << 30], "float32"),
                tensor(&[1 << 30, 1 << 20], "float32"),
            ],
        );
        let g = Gemm::mm(&r).unwrap();
        assert_eq!(g.elements(), 1 << 40);
        assert_eq!(g.flops(), u64::MAX);
        assert!(g.metrics().is_saturated());
    }

    #[test]
    fn test_mm_tensor_core_from_kernel() {
        let base = record(
            TENSOR,
            "mm",
            vec![tensor(&[8, 8], "float16"), tensor(&[8, 8], "float16")],
        );
        let used = on_kernel(base.clone(), "volta_fp16_s884gemm_fp16_128x128_ldg8_f2f_nn");
        assert_eq!(Gemm::mm(&used).unwrap().tensor_core(), TensorCoreTag::Used);
        let unused = on_kernel(base, "volta_sgemm_32x32_sliced1x4_nn");
        assert_eq!(Gemm::mm(&unused).unwrap().tensor_core(), TensorCoreTag::NotUsed);
    }

    #[test]
    fn test_mm_inner_mismatch() {
        let r = record(
            TORCH,
            "mm",
            vec![tensor(&[4, 3], "float32"), tensor(&[4, 3], "float32")],
        );
        assert!(matches!(
            Gemm::mm(&r).unwrap_err(),
            AnalysisError::InvalidArguments { .. }
        ));
    }

    #[test]
    fn test_bmm() {
        let r = record(
            TORCH,
            "bmm",
            vec![tensor(&[4, 8, 16], "float32"), tensor(&[4, 16, 2], "float32")],
        );
        let g = Gemm::bmm(&r).unwrap();
        assert_eq!(g.elements(), 4 * 8 * 2);
        assert_eq!(g.bytes(), (4 * 8 * 16 + 4 * 16 * 2 + 4 * 8 * 2) * 4);
        assert_eq!(g.flops(), 2 * 4 * 8 * 2 * 16);
        assert_eq!(g.params().get("B"), Some(&ParamValue::Int(4)));
    }

    #[test]
    fn test_addmm() {
        let r = record(
            TORCH,
            "addmm",
            vec![
                tensor(&[16], "float32"),
                tensor(&[8, 4], "float32"),
                tensor(&[4, 16], "float32"),
            ],
        );
        let g = Gemm::addmm(&r).unwrap();
        assert_eq!(g.elements(), 128);
        assert_eq!(g.bytes(), (16 + 32 + 64 + 128) * 4);
        assert_eq!(g.flops(), 2 * 128 * 4 + 128);
    }

    #[test]
    fn test_matmul_vector_promotion() {
        let r = record(
            TORCH,
            "matmul",
            vec![tensor(&[5], "float32"), tensor(&[5, 3], "float32")],
        );
        let g = Gemm::matmul(&r).unwrap();
        assert_eq!(g.elements(), 3);
        assert_eq!(g.flops(), 2 * 3 * 5);
        assert_eq!(g.bytes(), (5 + 15 + 3) * 4);
    }

    #[test]
    fn test_matmul_batch_broadcast() {
        let r = record(
            TENSOR,
            "__matmul__",
            vec![tensor(&[2, 1, 4, 8], "float16"), tensor(&[3, 8, 6], "float16")],
        );
        let g = Gemm::matmul(&r).unwrap();
        assert_eq!(g.batch, Some(6));
        assert_eq!(g.elements(), 6 * 4 * 6);
        assert_eq!(g.flops(), 2 * 6 * 4 * 6 * 8);
    }

    #[test]
    fn test_matmul_nested_suppressed() {
        let r = nested(
            record(
                TORCH,
                "matmul",
                vec![tensor(&[4, 4], "float32"), tensor(&[4, 4], "float32")],
            ),
            1,
        );
        let g = Gemm::matmul(&r).unwrap();
        assert_eq!(g.bytes(), 0);
        assert_eq!(g.flops(), 0);
    }

    #[test]
    fn test_mm_requires_two_dims() {
        let r = record(
            TORCH,
            "mm",
            vec![tensor(&[4], "float32"), tensor(&[4, 4], "float32")],
        );
        assert!(Gemm::mm(&r).is_err());
    }
}
