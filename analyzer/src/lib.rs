//! Analytical cost model library
//!
//! Scores captured operator invocations: each record is decoded, dispatched
//! through the [`OperatorRegistry`] to the calculator owning its
//! (module, operator) pair, and turned into a
//! [`MetricRecord`](opmeter_shared::MetricRecord) carrying element count,
//! memory traffic, flop count and tensor-core applicability.

pub mod config;
pub mod error;
pub mod metrics;
pub mod operator;
pub mod ops;
pub mod pass;
pub mod registry;
pub mod sink;

pub use config::{AnalyzerConfig, FailurePolicy};
pub use error::{AnalysisError, FailureKind};
pub use operator::Operator;
pub use pass::{Analyzer, PassReport, TraceRow};
pub use registry::OperatorRegistry;
pub use sink::{MetricRow, MetricSink};
