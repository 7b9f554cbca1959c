//! Consumer interface for scored records

use opmeter_shared::{Direction, MetricRecord, TraceContext};
use serde::Serialize;

/// Receives one normalized metric tuple per scored record.
///
/// Aggregation across records happens behind this trait, outside this crate.
pub trait MetricSink {
    fn accept(&mut self, context: &TraceContext, metrics: MetricRecord);
}

/// A scored record together with its pass context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub direction: Direction,
    pub sub_level: u32,
    #[serde(flatten)]
    pub metrics: MetricRecord,
}

impl MetricSink for Vec<MetricRow> {
    fn accept(&mut self, context: &TraceContext, metrics: MetricRecord) {
        self.push(MetricRow {
            direction: context.direction,
            sub_level: context.sub_level,
            metrics,
        });
    }
}
