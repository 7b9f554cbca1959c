//! Reductions: mean, sum, norm

use super::{ensure_owner, invalid, primary_only, Operand, TENSOR, TORCH};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::{CallRecord, Params};

const MODULES: &[&str] = &[TORCH, TENSOR];

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_all(MODULES, &["mean"], "Mean", |r| Ok(Box::new(Mean::new(r)?)))?;
    registry.register_all(MODULES, &["sum"], "Sum", |r| Ok(Box::new(Sum::new(r)?)))?;
    registry.register_all(MODULES, &["norm"], "Norm", |r| Ok(Box::new(Norm::new(r)?)))?;
    Ok(())
}

/// Reduced operand plus the record identity shared by all reductions
#[derive(Debug, Clone)]
struct Reduced {
    module: String,
    operator: String,
    input: Operand,
    sub_level: u32,
}

impl Reduced {
    fn new(record: &CallRecord, input: Operand) -> Self {
        Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            input,
            sub_level: record.sub_level(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mean(Reduced);

impl Mean {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Mean", MODULES, &["mean"])?;
        let positional = record.positional();
        let arg = positional
            .first()
            .ok_or_else(|| invalid(record, "missing input operand"))?;
        let input = Operand::resolve(record, arg)?;
        Ok(Self(Reduced::new(record, input)))
    }
}

impl Operator for Mean {
    fn module(&self) -> &str {
        &self.0.module
    }

    fn operator(&self) -> &str {
        &self.0.operator
    }

    fn params(&self) -> Params {
        self.0.input.params()
    }

    fn elements(&self) -> u64 {
        self.0.input.elements()
    }

    fn bytes(&self) -> u64 {
        primary_only(self.0.sub_level, self.0.input.bytes())
    }

    fn flops(&self) -> u64 {
        primary_only(self.0.sub_level, self.elements().saturating_add(1))
    }
}

#[derive(Debug, Clone)]
pub struct Sum(Reduced);

impl Sum {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Sum", MODULES, &["sum"])?;
        let arg = match record.args.first() {
            Some(first) if first.is_positional() => Some(first),
            _ => record.named("input"),
        }
        .ok_or_else(|| invalid(record, "missing input operand"))?;
        let input = Operand::resolve(record, arg)?;
        Ok(Self(Reduced::new(record, input)))
    }
}

impl Operator for Sum {
    fn module(&self) -> &str {
        &self.0.module
    }

    fn operator(&self) -> &str {
        &self.0.operator
    }

    fn params(&self) -> Params {
        self.0.input.params()
    }

    fn elements(&self) -> u64 {
        self.0.input.elements()
    }

    fn bytes(&self) -> u64 {
        primary_only(self.0.sub_level, self.0.input.bytes())
    }

    /// One add per element; reduction-tree depth is not modelled.
    /// Charged at every nesting level.
    fn flops(&self) -> u64 {
        self.elements()
    }
}

#[derive(Debug, Clone)]
pub struct Norm(Reduced);

impl Norm {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Norm", MODULES, &["norm"])?;
        let arg = record
            .args
            .first()
            .ok_or_else(|| invalid(record, "missing input operand"))?;
        let input = Operand::resolve(record, arg)?;
        Ok(Self(Reduced::new(record, input)))
    }
}

impl Operator for Norm {
    fn module(&self) -> &str {
        &self.0.module
    }

    fn operator(&self) -> &str {
        &self.0.operator
    }

    fn params(&self) -> Params {
        self.0.input.params()
    }

    fn elements(&self) -> u64 {
        self.0.input.elements()
    }

    fn bytes(&self) -> u64 {
        primary_only(self.0.sub_level, self.0.input.bytes())
    }

    // square, accumulate, final root
    fn flops(&self) -> u64 {
        primary_only(self.0.sub_level, self.elements().saturating_mul(2).saturating_add(1))
    }
}
