//! Utility numerics: element counts, dtype widths, broadcasting

use thiserror::Error;

/// A dtype name missing from the byte-width table
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown dtype: {dtype}")]
pub struct UnknownDtypeError {
    pub dtype: String,
}

/// Number of elements in a tensor of the given shape.
///
/// An empty shape is a scalar and holds one element.
pub fn num_elems(shape: &[u64]) -> u64 {
    shape.iter().fold(1u64, |acc, &d| acc.saturating_mul(d))
}

/// Byte width of one element of `dtype`.
///
/// Accepts both framework dtype names (`float32`, `int64`, ...) and the
/// scalar type names the producer records for plain scalars (`float`,
/// `int`, `bool`).
pub fn type_to_bytes(dtype: &str) -> Result<u64, UnknownDtypeError> {
    match dtype {
        "uint8" | "int8" | "byte" | "char" | "bool" => Ok(1),
        "float16" | "half" | "bfloat16" | "int16" | "short" => Ok(2),
        "float32" | "float" | "int32" | "int" => Ok(4),
        "float64" | "double" | "int64" | "long" | "complex64" => Ok(8),
        "complex128" => Ok(16),
        _ => Err(UnknownDtypeError {
            dtype: dtype.to_string(),
        }),
    }
}

/// True for integral dtypes usable as indices
pub fn is_integral(dtype: &str) -> bool {
    matches!(
        dtype,
        "uint8" | "int8" | "byte" | "int16" | "short" | "int32" | "int" | "int64" | "long"
    )
}

/// Broadcast two shapes with numpy rules; `None` when incompatible.
pub fn broadcast_shapes(a: &[u64], b: &[u64]) -> Option<Vec<u64>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}
