//! Calculator capability trait

use opmeter_shared::{MetricRecord, Params, TensorCoreTag};
use std::fmt::Debug;

/// Cost model for one captured invocation.
///
/// One implementation exists per operator family. Instances are built from a
/// single [`CallRecord`](opmeter_shared::CallRecord), are immutable, and
/// carry no state across records.
pub trait Operator: Debug + Send + Sync {
    /// Module the invocation was captured under (e.g. `torch`, `Tensor`)
    fn module(&self) -> &str;

    /// Operator name as captured (e.g. `mean`, `add_`)
    fn operator(&self) -> &str;

    /// Ordered summary used to group invocations with identical shapes
    fn params(&self) -> Params;

    /// Tensor-core applicability; families that do not track it keep the default
    fn tensor_core(&self) -> TensorCoreTag {
        TensorCoreTag::NotApplicable
    }

    /// Number of elements attributed to the invocation
    fn elements(&self) -> u64;

    /// Memory traffic in bytes
    fn bytes(&self) -> u64;

    /// Floating-point operation count
    fn flops(&self) -> u64;

    /// Collect every metric into one tuple
    fn metrics(&self) -> MetricRecord {
        MetricRecord {
            module: self.module().to_string(),
            operator: self.operator().to_string(),
            params: self.params(),
            tensor_core: self.tensor_core(),
            elements: self.elements(),
            bytes: self.bytes(),
            flops: self.flops(),
        }
    }
}
