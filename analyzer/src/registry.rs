//! Dispatch table from (module, operator) to calculator constructors

use crate::error::{AnalysisError, Result};
use crate::operator::Operator;
use crate::ops;
use opmeter_shared::CallRecord;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Builds the calculator for one record
pub type Constructor = fn(&CallRecord) -> Result<Box<dyn Operator>>;

#[derive(Clone, Copy)]
struct Registration {
    family: &'static str,
    build: Constructor,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

/// Exact-match registry. Each pair maps to exactly one family.
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    // module -> operator -> registration
    entries: HashMap<String, HashMap<String, Registration>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering every built-in family
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        ops::register_defaults(&mut registry)?;
        debug!(pairs = registry.len(), "Registered default calculators");
        Ok(registry)
    }

    /// Register one pair. A pair that is already taken is a wiring error.
    pub fn register(
        &mut self,
        module: &str,
        operator: &str,
        family: &'static str,
        build: Constructor,
    ) -> Result<()> {
        let operators = self.entries.entry(module.to_string()).or_default();
        match operators.entry(operator.to_string()) {
            Entry::Occupied(existing) => Err(AnalysisError::DuplicateRegistration {
                module: module.to_string(),
                operator: operator.to_string(),
                family: existing.get().family,
            }),
            Entry::Vacant(slot) => {
                slot.insert(Registration { family, build });
                Ok(())
            }
        }
    }

    /// Register the cross product of `modules` and `operators`
    pub fn register_all(
        &mut self,
        modules: &[&str],
        operators: &[&str],
        family: &'static str,
        build: Constructor,
    ) -> Result<()> {
        for module in modules {
            for operator in operators {
                self.register(module, operator, family, build)?;
            }
        }
        Ok(())
    }

    fn lookup(&self, module: &str, operator: &str) -> Option<&Registration> {
        self.entries.get(module)?.get(operator)
    }

    pub fn contains(&self, module: &str, operator: &str) -> bool {
        self.lookup(module, operator).is_some()
    }

    /// Whether any calculator is registered under `module`
    pub fn has_module(&self, module: &str) -> bool {
        self.entries.contains_key(module)
    }

    /// Family name owning a pair
    pub fn family(&self, module: &str, operator: &str) -> Option<&'static str> {
        self.lookup(module, operator).map(|r| r.family)
    }

    /// Build the calculator for `record`, or fail with `UnknownOperator`
    pub fn build(&self, record: &CallRecord) -> Result<Box<dyn Operator>> {
        let registration = self
            .lookup(&record.module, &record.operator)
            .ok_or_else(|| AnalysisError::UnknownOperator {
                module: record.module.clone(),
                operator: record.operator.clone(),
            })?;
        (registration.build)(record)
    }

    /// Every registered `(module, operator, family)`, sorted
    pub fn coverage(&self) -> Vec<(&str, &str, &'static str)> {
        let mut pairs: Vec<_> = self
            .entries
            .iter()
            .flat_map(|(module, operators)| {
                operators
                    .iter()
                    .map(move |(operator, r)| (module.as_str(), operator.as_str(), r.family))
            })
            .collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::reduction::{Mean, Sum};
    use opmeter_shared::{ArgDescriptor, TraceContext};
    use std::collections::BTreeSet;

    fn mean_record(module: &str, operator: &str) -> CallRecord {
        CallRecord::new(
            module,
            operator,
            vec![ArgDescriptor::tensor("", vec![4, 8], "float32")],
            TraceContext::default(),
        )
    }

    #[test]
    fn test_dispatch_default() {
        let registry = OperatorRegistry::with_defaults().unwrap();
        let op = registry.build(&mean_record("torch", "mean")).unwrap();
        assert_eq!(op.operator(), "mean");
        assert_eq!(op.flops(), 33);
        assert_eq!(registry.family("Tensor", "sum"), Some("Sum"));
    }

    #[test]
    fn test_unknown_operator() {
        let registry = OperatorRegistry::with_defaults().unwrap();
        let err = registry.build(&mean_record("torch", "frobnicate")).unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownOperator { .. }));
        assert!(!registry.contains("torch", "frobnicate"));
    }

    #[test]
    fn test_has_module() {
        let registry = OperatorRegistry::with_defaults().unwrap();
        assert!(registry.has_module("torch"));
        assert!(registry.has_module("torch.nn.functional"));
        assert!(!registry.has_module("apex.amp"));
    }

    #[test]
    fn test_module_is_part_of_the_key() {
        let registry = OperatorRegistry::with_defaults().unwrap();
        assert!(registry.contains("torch", "mean"));
        assert!(!registry.contains("torch.nn.functional", "mean"));
        assert!(registry.build(&mean_record("numpy", "mean")).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = OperatorRegistry::new();
        registry
            .register("torch", "mean", "Mean", |r| Ok(Box::new(Mean::new(r)?)))
            .unwrap();
        let err = registry
            .register("torch", "mean", "Sum", |r| Ok(Box::new(Sum::new(r)?)))
            .unwrap_err();
        match err {
            AnalysisError::DuplicateRegistration { family, .. } => assert_eq!(family, "Mean"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_miswired_constructor_is_contract_violation() {
        let mut registry = OperatorRegistry::new();
        registry
            .register("torch", "sum", "Mean", |r| Ok(Box::new(Mean::new(r)?)))
            .unwrap();
        let err = registry.build(&mean_record("torch", "sum")).unwrap_err();
        assert!(matches!(err, AnalysisError::ContractViolation { .. }));
    }

    #[test]
    fn test_coverage_lists_every_family() {
        let registry = OperatorRegistry::with_defaults().unwrap();
        let coverage = registry.coverage();
        assert_eq!(coverage.len(), registry.len());
        let families: BTreeSet<_> = coverage.iter().map(|(_, _, f)| *f).collect();
        for family in [
            "Mean",
            "Sum",
            "Norm",
            "Pointwise",
            "Activation",
            "Softmax",
            "Mm",
            "Bmm",
            "Addmm",
            "Matmul",
            "Linear",
            "Conv",
            "Normalization",
            "MseLoss",
            "Dropout",
            "Embedding",
            "Copy",
            "Cat",
            "View",
        ] {
            assert!(families.contains(family), "missing {family}");
        }
        let mut sorted = coverage.clone();
        sorted.sort_unstable();
        assert_eq!(coverage, sorted);
    }
}
