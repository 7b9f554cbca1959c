//! Embedding lookup

use super::{ensure_owner, invalid, primary_only, Operand, FUNCTIONAL};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::utils::is_integral;
use opmeter_shared::{CallRecord, Direction, ParamValue, Params};

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register(FUNCTIONAL, "embedding", "Embedding", |r| {
        Ok(Box::new(Embedding::new(r)?))
    })
}

/// Gather of `indices` rows from a `(V, D)` table
#[derive(Debug, Clone)]
pub struct Embedding {
    module: String,
    operator: String,
    indices: Operand,
    weight: Operand,
    direction: Direction,
    sub_level: u32,
}

impl Embedding {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Embedding", &[FUNCTIONAL], &["embedding"])?;
        // a single index may be captured as a zero-dim tensor or an int scalar
        let indices = match record.slot(0, "input") {
            Some(arg) => Operand::resolve(record, arg)?,
            None => return Err(invalid(record, "missing input")),
        };
        if !is_integral(&indices.dtype) {
            return Err(invalid(
                record,
                format!("indices must be integral, found {}", indices.dtype),
            ));
        }
        let weight = Operand::required(record, record.slot(1, "weight"), "weight")?;
        if weight.rank() != 2 {
            return Err(invalid(
                record,
                format!("weight must be 2-D, found shape {:?}", weight.shape),
            ));
        }
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            indices,
            weight,
            direction: record.direction(),
            sub_level: record.sub_level(),
        })
    }

    fn dim(&self) -> u64 {
        self.weight.shape[1]
    }
}

impl Operator for Embedding {
    fn module(&self) -> &str {
        &self.module
    }

    fn operator(&self) -> &str {
        &self.operator
    }

    fn params(&self) -> Params {
        Params::new()
            .with("I", ParamValue::Shape(self.indices.shape.clone()))
            .with("E", ParamValue::Shape(self.weight.shape.clone()))
            .with("itype", ParamValue::Str(self.indices.dtype.clone()))
            .with("type", ParamValue::Str(self.weight.dtype.clone()))
    }

    fn elements(&self) -> u64 {
        self.indices.elements().saturating_mul(self.dim())
    }

    /// Forward reads the indices, gathers rows and writes them out. Backward
    /// reads the output gradient and scatter-adds into the table gradient.
    fn bytes(&self) -> u64 {
        let passes = match self.direction {
            Direction::Forward => 2,
            Direction::Backward => 3,
        };
        let rows = self.elements().saturating_mul(self.weight.width);
        primary_only(
            self.sub_level,
            self.indices.bytes().saturating_add(rows.saturating_mul(passes)),
        )
    }

    fn flops(&self) -> u64 {
        match self.direction {
            Direction::Forward => 0,
            Direction::Backward => primary_only(self.sub_level, self.elements()),
        }
    }
}
