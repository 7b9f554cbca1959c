//! Analysis pass: decode, dispatch and score a sequence of trace rows

use crate::config::{AnalyzerConfig, FailurePolicy};
use crate::error::{AnalysisError, FailureKind, Result};
use crate::metrics::{
    OTHER_MODULE, RECORDS_TOTAL, UNKNOWN_DTYPE_TOTAL, UNKNOWN_OPERATOR_TOTAL,
};
use crate::registry::OperatorRegistry;
use crate::sink::MetricSink;
use anyhow::Context;
use opmeter_shared::protocol;
use opmeter_shared::{CallRecord, Direction, MetricRecord, TraceContext};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// One captured row: the marker text plus where it sat in the trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRow {
    pub marker: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub sub_level: u32,
    #[serde(default)]
    pub kernel: Option<String>,
}

impl TraceRow {
    pub fn new(marker: impl Into<String>, direction: Direction, sub_level: u32) -> Self {
        Self {
            marker: marker.into(),
            direction,
            sub_level,
            kernel: None,
        }
    }

    pub fn with_kernel(mut self, kernel: impl Into<String>) -> Self {
        self.kernel = Some(kernel.into());
        self
    }

    pub fn context(&self) -> TraceContext {
        TraceContext {
            direction: self.direction,
            sub_level: self.sub_level,
            kernel: self.kernel.clone(),
        }
    }
}

/// Diagnostic for one skipped row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Position of the row in the input sequence
    pub index: usize,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub processed: u64,
    pub emitted: u64,
    pub skipped: u64,
    /// Sightings per unregistered (module, operator) pair
    #[serde(serialize_with = "serialize_pairs")]
    pub unknown_operators: BTreeMap<(String, String), u64>,
    pub failures_by_kind: BTreeMap<FailureKind, u64>,
    /// First failures, bounded by `max_reported_failures`
    pub failures: Vec<FailureRecord>,
}

fn serialize_pairs<S: Serializer>(
    pairs: &BTreeMap<(String, String), u64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Pair<'a> {
        module: &'a str,
        operator: &'a str,
        count: u64,
    }

    let mut seq = serializer.serialize_seq(Some(pairs.len()))?;
    for ((module, operator), count) in pairs {
        seq.serialize_element(&Pair {
            module,
            operator,
            count: *count,
        })?;
    }
    seq.end()
}

impl PassReport {
    pub fn failures_of(&self, kind: FailureKind) -> u64 {
        self.failures_by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// True when every row was scored
    pub fn is_clean(&self) -> bool {
        self.skipped == 0
    }
}

/// Drives rows through decode, dispatch and scoring
#[derive(Debug)]
pub struct Analyzer {
    registry: OperatorRegistry,
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(registry: OperatorRegistry, config: AnalyzerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self { registry, config })
    }

    /// Default registry and environment-derived config
    pub fn with_defaults() -> anyhow::Result<Self> {
        let registry =
            OperatorRegistry::with_defaults().context("Failed to build default registry")?;
        Self::new(registry, AnalyzerConfig::default())
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Score an already decoded record
    pub fn score(&self, record: &CallRecord) -> Result<MetricRecord> {
        let metrics = self.registry.build(record)?.metrics();
        if metrics.is_saturated() {
            return Err(AnalysisError::InvalidArguments {
                module: record.module.clone(),
                operator: record.operator.clone(),
                reason: "cost does not fit in u64".to_string(),
            });
        }
        Ok(metrics)
    }

    /// Decode and score one row
    pub fn analyze_record(&self, row: &TraceRow) -> Result<MetricRecord> {
        let record = protocol::decode(&row.marker, row.context())?;
        self.score(&record)
    }

    /// Score every row into `sink`.
    ///
    /// Under [`FailurePolicy::Skip`] a failing row is counted and reported
    /// and the pass continues; under [`FailurePolicy::FailFast`] the first
    /// failure ends the pass with an error naming the row.
    pub fn run<I, S>(&self, rows: I, sink: &mut S) -> anyhow::Result<PassReport>
    where
        I: IntoIterator,
        I::Item: Borrow<TraceRow>,
        S: MetricSink + ?Sized,
    {
        let mut report = PassReport::default();

        for (index, row) in rows.into_iter().enumerate() {
            let row = row.borrow();
            report.processed += 1;

            match self.analyze_record(row) {
                Ok(metrics) => {
                    RECORDS_TOTAL.with_label_values(&["scored"]).inc();
                    sink.accept(&row.context(), metrics);
                    report.emitted += 1;
                }
                Err(err) => {
                    let kind = err.kind();
                    RECORDS_TOTAL.with_label_values(&[kind.as_str()]).inc();
                    self.observe_failure(index, row, &err, &mut report);

                    if self.config.failure_policy == FailurePolicy::FailFast {
                        return Err(anyhow::Error::new(err))
                            .with_context(|| format!("Analysis aborted at record {}", index));
                    }
                }
            }
        }

        info!(
            processed = report.processed,
            emitted = report.emitted,
            skipped = report.skipped,
            unknown_pairs = report.unknown_operators.len(),
            "Analysis pass complete"
        );
        Ok(report)
    }

    fn observe_failure(
        &self,
        index: usize,
        row: &TraceRow,
        err: &AnalysisError,
        report: &mut PassReport,
    ) {
        let kind = err.kind();
        report.skipped += 1;
        *report.failures_by_kind.entry(kind).or_default() += 1;
        if report.failures.len() < self.config.max_reported_failures {
            report.failures.push(FailureRecord {
                index,
                kind,
                message: err.to_string(),
            });
        }

        match err {
            AnalysisError::UnknownOperator { module, operator } => {
                let label = if self.registry.has_module(module) {
                    module.as_str()
                } else {
                    OTHER_MODULE
                };
                UNKNOWN_OPERATOR_TOTAL.with_label_values(&[label]).inc();
                let seen = report
                    .unknown_operators
                    .entry((module.clone(), operator.clone()))
                    .or_default();
                *seen += 1;
                if *seen == 1 {
                    warn!(record = index, %module, %operator, "No calculator registered");
                } else {
                    debug!(record = index, %module, %operator, "No calculator registered");
                }
            }
            AnalysisError::UnknownDtype(e) => {
                UNKNOWN_DTYPE_TOTAL.with_label_values(&[e.dtype.as_str()]).inc();
                warn!(record = index, dtype = %e.dtype, "Skipping record with unknown dtype");
            }
            AnalysisError::Decode(e) => {
                warn!(
                    record = index,
                    sub_level = row.sub_level,
                    "Skipping undecodable record: {}",
                    e
                );
            }
            AnalysisError::InvalidArguments { .. } => {
                warn!(record = index, "Skipping record: {}", err);
            }
            AnalysisError::ContractViolation { .. }
            | AnalysisError::DuplicateRegistration { .. } => {
                error!(record = index, "Calculator wiring defect: {}", err);
            }
        }
    }
}
