use anyhow::Result;
use opmeter_analyzer::{
    AnalysisError, Analyzer, AnalyzerConfig, FailureKind, FailurePolicy, MetricRow,
    OperatorRegistry, TraceRow,
};
use opmeter_shared::protocol::{decode, encode};
use opmeter_shared::{Direction, TensorCoreTag, TraceContext};

fn mean_marker(dtype: &str) -> String {
    format!(
        "{{'mod': 'torch', 'op': 'mean', 'args': [{{'name': '', 'type': 'tensor', 'shape': (4, 8), 'dtype': '{}'}}]}}",
        dtype
    )
}

const SUM_MARKER: &str = "{'mod': 'Tensor', 'op': 'sum', 'args': [{'name': '', 'type': 'tensor', 'shape': (4, 8), 'dtype': 'float32'}, {'name': 'dim', 'type': 'int', 'value': 1}]}";

const NORM_MARKER: &str = "{'mod': 'torch', 'op': 'norm', 'args': [{'name': '', 'type': 'tensor', 'shape': (10,), 'dtype': 'float16'}, {'name': 'p', 'type': 'float', 'value': inf}]}";

const LINEAR_MARKER: &str = r#"{"module": "torch.nn.functional", "operator": "linear", "args": [
    {"name": "", "kind": "tensor", "shape": [32, 128], "dtype": "float16"},
    {"name": "", "kind": "tensor", "shape": [64, 128], "dtype": "float16"},
    {"name": "bias", "kind": "NoneType", "value": null}
]}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("opmeter_analyzer=debug")
        .try_init();
}

fn analyzer(policy: FailurePolicy) -> Result<Analyzer> {
    let config = AnalyzerConfig {
        failure_policy: policy,
        max_reported_failures: 100,
    };
    Analyzer::new(OperatorRegistry::with_defaults()?, config)
}

#[test]
fn test_reduction_pipeline() -> Result<()> {
    init_tracing();
    let analyzer = analyzer(FailurePolicy::Skip)?;
    let rows = vec![
        TraceRow::new(mean_marker("float32"), Direction::Forward, 0),
        TraceRow::new(SUM_MARKER, Direction::Forward, 1),
        TraceRow::new(NORM_MARKER, Direction::Backward, 0),
    ];
    let mut sink: Vec<MetricRow> = Vec::new();
    let report = analyzer.run(&rows, &mut sink)?;

    assert!(report.is_clean());
    assert_eq!(sink.len(), 3);

    let mean = &sink[0].metrics;
    assert_eq!((mean.elements, mean.bytes, mean.flops), (32, 128, 33));
    assert_eq!(mean.params.to_string(), "T=(4,8),type=float32");

    let sum = &sink[1];
    assert_eq!(sum.sub_level, 1);
    assert_eq!((sum.metrics.bytes, sum.metrics.flops), (0, 32));

    let norm = &sink[2];
    assert_eq!(norm.direction, Direction::Backward);
    assert_eq!(
        (norm.metrics.elements, norm.metrics.bytes, norm.metrics.flops),
        (10, 20, 21)
    );
    Ok(())
}

#[test]
fn test_unknown_dtype_is_never_defaulted() -> Result<()> {
    let analyzer = analyzer(FailurePolicy::Skip)?;
    let row = TraceRow::new(mean_marker("qint8"), Direction::Forward, 0);

    let err = analyzer.analyze_record(&row).unwrap_err();
    assert!(matches!(err, AnalysisError::UnknownDtype(_)));

    let mut sink: Vec<MetricRow> = Vec::new();
    let report = analyzer.run([row], &mut sink)?;
    assert!(sink.is_empty());
    assert_eq!(report.failures_of(FailureKind::UnknownDtype), 1);
    Ok(())
}

#[test]
fn test_unknown_operator_is_reported_not_zero() -> Result<()> {
    init_tracing();
    let analyzer = analyzer(FailurePolicy::Skip)?;
    let marker = "{'mod': 'torch', 'op': 'cholesky', 'args': [{'name': '', 'type': 'tensor', 'shape': (3, 3), 'dtype': 'float64'}]}";
    let rows = vec![
        TraceRow::new(marker, Direction::Forward, 0),
        TraceRow::new(marker, Direction::Backward, 0),
    ];
    let mut sink: Vec<MetricRow> = Vec::new();
    let report = analyzer.run(&rows, &mut sink)?;

    assert!(sink.is_empty());
    assert_eq!(report.skipped, 2);
    assert_eq!(
        report
            .unknown_operators
            .get(&("torch".to_string(), "cholesky".to_string())),
        Some(&2)
    );
    Ok(())
}

#[test]
fn test_malformed_rows_do_not_abort_the_pass() -> Result<()> {
    let analyzer = analyzer(FailurePolicy::Skip)?;
    let rows = vec![
        TraceRow::new("{'mod': 'torch', 'args': []}", Direction::Forward, 0),
        TraceRow::new("__import__('os')", Direction::Forward, 0),
        TraceRow::new(
            "{'mod': 'torch', 'op': 'mean', 'args': [{'name': '', 'type': 'tensor', 'shape': (4,)}]}",
            Direction::Forward,
            0,
        ),
        TraceRow::new(mean_marker("float32"), Direction::Forward, 0),
    ];
    let mut sink: Vec<MetricRow> = Vec::new();
    let report = analyzer.run(&rows, &mut sink)?;

    assert_eq!(report.failures_of(FailureKind::Decode), 3);
    assert_eq!(report.emitted, 1);
    let indices: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn test_fail_fast_stops_at_first_failure() -> Result<()> {
    let analyzer = analyzer(FailurePolicy::FailFast)?;
    let rows = vec![
        TraceRow::new(mean_marker("float32"), Direction::Forward, 0),
        TraceRow::new("{'mod': 'torch'}", Direction::Forward, 0),
        TraceRow::new(mean_marker("float32"), Direction::Forward, 0),
    ];
    let mut sink: Vec<MetricRow> = Vec::new();
    let err = analyzer.run(&rows, &mut sink).unwrap_err();

    assert_eq!(sink.len(), 1);
    assert!(format!("{:#}", err).contains("record 1"));
    assert!(matches!(
        err.downcast_ref::<AnalysisError>(),
        Some(AnalysisError::Decode(_))
    ));
    Ok(())
}

#[test]
fn test_matrix_tensor_core_tag_follows_kernel() -> Result<()> {
    let analyzer = analyzer(FailurePolicy::Skip)?;
    let plain = TraceRow::new(LINEAR_MARKER, Direction::Forward, 0);
    let on_tc = plain
        .clone()
        .with_kernel("volta_fp16_s884gemm_fp16_128x128_ldg8_f2f_tn");
    let off_tc = plain.clone().with_kernel("volta_sgemm_128x64_tn");

    assert_eq!(
        analyzer.analyze_record(&plain)?.tensor_core,
        TensorCoreTag::NotApplicable
    );
    assert_eq!(analyzer.analyze_record(&on_tc)?.tensor_core, TensorCoreTag::Used);
    assert_eq!(
        analyzer.analyze_record(&off_tc)?.tensor_core,
        TensorCoreTag::NotUsed
    );

    let metrics = analyzer.analyze_record(&plain)?;
    assert_eq!(metrics.flops, 2 * 32 * 64 * 128);
    assert_eq!(metrics.params.to_string(), "M=32,N=64,K=128,type=float16");
    Ok(())
}

#[test]
fn test_decode_encode_preserves_arguments() -> Result<()> {
    let record = decode(SUM_MARKER, TraceContext::new(Direction::Forward, 0))?;
    let text = encode(&record)?;
    let again = decode(&text, TraceContext::new(Direction::Forward, 0))?;

    assert_eq!(again.module, "Tensor");
    assert_eq!(again.operator, "sum");
    let names: Vec<&str> = again.args.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["", "dim"]);
    assert_eq!(again, record);
    Ok(())
}

#[test]
fn test_metric_rows_serialize_to_json_lines() -> Result<()> {
    let analyzer = analyzer(FailurePolicy::Skip)?;
    let mut sink: Vec<MetricRow> = Vec::new();
    analyzer.run(
        [TraceRow::new(mean_marker("float32"), Direction::Forward, 0)],
        &mut sink,
    )?;
    let line = serde_json::to_string(&sink[0])?;
    assert_eq!(
        line,
        r#"{"direction":"forward","sub_level":0,"module":"torch","operator":"mean","params":{"T":[4,8],"type":"float32"},"tensor_core":"-","elements":32,"bytes":128,"flops":33}"#
    );
    Ok(())
}

#[test]
fn test_unrepresentable_cost_is_skipped_not_fatal() -> Result<()> {
    let analyzer = analyzer(FailurePolicy::Skip)?;
    let mean = "{'mod': 'torch', 'op': 'mean', 'args': [{'name': '', 'type': 'tensor', 'shape': (4294967296, 4294967296), 'dtype': 'float32'}]}";
    let mm = "{'mod': 'torch', 'op': 'mm', 'args': [{'name': '', 'type': 'tensor', 'shape': (1048576, 1073741824), 'dtype': 'float32'}, {'name': '', 'type': 'tensor', 'shape': (1073741824, 1048576), 'dtype': 'float32'}]}";
    let rows = vec![
        TraceRow::new(mean, Direction::Forward, 0),
        TraceRow::new(mm, Direction::Forward, 0),
        TraceRow::new(mean_marker("float32"), Direction::Forward, 0),
    ];
    let mut sink: Vec<MetricRow> = Vec::new();
    let report = analyzer.run(&rows, &mut sink)?;

    assert_eq!(report.emitted, 1);
    assert_eq!(report.failures_of(FailureKind::InvalidArguments), 2);
    assert!(report.failures[1].message.contains("u64"));
    assert_eq!(sink[0].metrics.elements, 32);
    Ok(())
}
