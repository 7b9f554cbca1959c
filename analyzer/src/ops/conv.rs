//! N-d convolutions

use super::{
    ensure_owner, invalid, primary_only, tensor_core_tag, total_bytes, Operand, FUNCTIONAL,
};
use crate::error::Result;
use crate::operator::Operator;
use crate::registry::OperatorRegistry;
use opmeter_shared::utils::num_elems;
use opmeter_shared::{
    ArgDescriptor, ArgValue, CallRecord, ParamValue, Params, ScalarValue, TensorCoreTag,
};

const OPERATORS: &[&str] = &["conv1d", "conv2d", "conv3d"];

pub fn register(registry: &mut OperatorRegistry) -> Result<()> {
    registry.register_all(&[FUNCTIONAL], OPERATORS, "Conv", |r| {
        Ok(Box::new(Conv::new(r)?))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Padding {
    Explicit(Vec<u64>),
    Same,
}

#[derive(Debug, Clone)]
pub struct Conv {
    module: String,
    operator: String,
    batch: u64,
    in_channels: u64,
    out_channels: u64,
    input_spatial: Vec<u64>,
    kernel: Vec<u64>,
    stride: Vec<u64>,
    padding: Vec<u64>,
    dilation: Vec<u64>,
    groups: u64,
    output_spatial: Vec<u64>,
    read_bytes: u64,
    has_bias: bool,
    dtype: String,
    width: u64,
    sub_level: u32,
    tensor_core: TensorCoreTag,
}

/// Read a per-dimension integer argument: a single int applies to every
/// spatial dimension, a sequence must have one entry per dimension.
fn spatial_ints(
    record: &CallRecord,
    arg: Option<&ArgDescriptor>,
    name: &str,
    dims: usize,
    default: u64,
) -> Result<Vec<u64>> {
    let to_u64 = |v: &ScalarValue| -> Result<u64> {
        v.as_i64()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| invalid(record, format!("{} must hold non-negative integers", name)))
    };
    let Some(arg) = arg else {
        return Ok(vec![default; dims]);
    };
    match &arg.value {
        ArgValue::Scalar(ScalarValue::None) => Ok(vec![default; dims]),
        ArgValue::Scalar(v) => Ok(vec![to_u64(v)?; dims]),
        ArgValue::List(values) | ArgValue::Tuple(values) => {
            let values = values.iter().map(to_u64).collect::<Result<Vec<_>>>()?;
            match values.len() {
                1 => Ok(vec![values[0]; dims]),
                n if n == dims => Ok(values),
                n => Err(invalid(
                    record,
                    format!("{} has {} entries for {} spatial dimensions", name, n, dims),
                )),
            }
        }
        _ => Err(invalid(record, format!("{} must be an int or a sequence of ints", name))),
    }
}

fn padding(record: &CallRecord, arg: Option<&ArgDescriptor>, dims: usize) -> Result<Padding> {
    match arg.and_then(|a| a.scalar_value()).and_then(ScalarValue::as_str) {
        Some("valid") => Ok(Padding::Explicit(vec![0; dims])),
        Some("same") => Ok(Padding::Same),
        Some(other) => Err(invalid(record, format!("unknown padding mode {:?}", other))),
        None => Ok(Padding::Explicit(spatial_ints(record, arg, "padding", dims, 0)?)),
    }
}

/// Input extent one output position sees: `dilation * (kernel - 1) + 1`
fn receptive_span(record: &CallRecord, dilation: u64, kernel: u64) -> Result<u64> {
    dilation
        .checked_mul(kernel.saturating_sub(1))
        .and_then(|s| s.checked_add(1))
        .ok_or_else(|| invalid(record, "dilated kernel overflows u64"))
}

impl Conv {
    pub fn new(record: &CallRecord) -> Result<Self> {
        ensure_owner(record, "Conv", &[FUNCTIONAL], OPERATORS)?;
        let dims = match record.operator.as_str() {
            "conv1d" => 1,
            "conv2d" => 2,
            _ => 3,
        };

        let input = Operand::required(record, record.slot(0, "input"), "input")?;
        let weight = Operand::required(record, record.slot(1, "weight"), "weight")?;
        let (batch, in_channels, input_spatial) = match input.rank() {
            r if r == dims + 2 => (input.shape[0], input.shape[1], input.shape[2..].to_vec()),
            // unbatched
            r if r == dims + 1 => (1, input.shape[0], input.shape[1..].to_vec()),
            _ => {
                return Err(invalid(
                    record,
                    format!("input shape {:?} does not fit {}", input.shape, record.operator),
                ))
            }
        };
        if weight.rank() != dims + 2 {
            return Err(invalid(
                record,
                format!("weight shape {:?} does not fit {}", weight.shape, record.operator),
            ));
        }
        let out_channels = weight.shape[0];
        let kernel = weight.shape[2..].to_vec();

        let bias = match record.slot(2, "bias") {
            Some(arg) if arg.shape().is_some() => Some(Operand::resolve(record, arg)?),
            _ => None,
        };
        let stride = spatial_ints(record, record.slot(3, "stride"), "stride", dims, 1)?;
        let padding = padding(record, record.slot(4, "padding"), dims)?;
        let dilation = spatial_ints(record, record.slot(5, "dilation"), "dilation", dims, 1)?;
        let groups = match record.slot(6, "groups").and_then(|a| a.scalar_value()) {
            None | Some(ScalarValue::None) => 1,
            Some(v) => v
                .as_i64()
                .and_then(|g| u64::try_from(g).ok())
                .filter(|g| *g > 0)
                .ok_or_else(|| invalid(record, "groups must be a positive integer"))?,
        };

        if stride.contains(&0) || dilation.contains(&0) {
            return Err(invalid(record, "stride and dilation must be positive"));
        }
        if weight.shape[1].checked_mul(groups) != Some(in_channels) || out_channels % groups != 0 {
            return Err(invalid(
                record,
                format!(
                    "channels do not split into {} groups: input {}, weight {:?}",
                    groups, in_channels, weight.shape
                ),
            ));
        }

        let (padding, output_spatial) = match padding {
            Padding::Same => {
                if stride.iter().any(|s| *s != 1) {
                    return Err(invalid(record, "padding 'same' requires unit stride"));
                }
                let total = (0..dims)
                    .map(|i| receptive_span(record, dilation[i], kernel[i]).map(|s| s - 1))
                    .collect::<Result<Vec<u64>>>()?;
                (total.iter().map(|t| t / 2).collect(), input_spatial.clone())
            }
            Padding::Explicit(padding) => {
                let mut output = Vec::with_capacity(dims);
                for i in 0..dims {
                    let padded = padding[i]
                        .checked_mul(2)
                        .and_then(|p| p.checked_add(input_spatial[i]))
                        .ok_or_else(|| invalid(record, "padded input overflows u64"))?;
                    let span = receptive_span(record, dilation[i], kernel[i])?;
                    if padded < span {
                        return Err(invalid(
                            record,
                            format!(
                                "kernel {:?} larger than padded input {:?}",
                                kernel, input_spatial
                            ),
                        ));
                    }
                    output.push((padded - span) / stride[i] + 1);
                }
                (padding, output)
            }
        };

        let read_bytes = total_bytes([&input, &weight].into_iter().chain(bias.as_ref()));
        Ok(Self {
            module: record.module.clone(),
            operator: record.operator.clone(),
            batch,
            in_channels,
            out_channels,
            input_spatial,
            kernel,
            stride,
            padding,
            dilation,
            groups,
            output_spatial,
            read_bytes,
            has_bias: bias.is_some(),
            dtype: input.dtype.clone(),
            width: input.width,
            sub_level: record.sub_level(),
            tensor_core: tensor_core_tag(record.context.kernel.as_deref()),
        })
    }
}

impl Operator for Conv {
    fn module(&self) -> &str {
        &self.module
    }

    fn operator(&self) -> &str {
        &self.operator
    }

    fn params(&self) -> Params {
        Params::new()
            .with("N", ParamValue::Int(self.batch))
            .with("C", ParamValue::Int(self.in_channels))
            .with("K", ParamValue::Int(self.out_channels))
            .with("in", ParamValue::Shape(self.input_spatial.clone()))
            .with("kernel", ParamValue::Shape(self.kernel.clone()))
            .with("stride", ParamValue::Shape(self.stride.clone()))
            .with("padding", ParamValue::Shape(self.padding.clone()))
            .with("dilation", ParamValue::Shape(self.dilation.clone()))
            .with("groups", ParamValue::Int(self.groups))
            .with("type", ParamValue::Str(self.dtype.clone()))
    }

    fn tensor_core(&self) -> TensorCoreTag {
        self.tensor_core
    }

    fn elements(&self) -> u64 {
        self.batch
            .saturating_mul(self.out_channels)
            .saturating_mul(num_elems(&self.output_spatial))
    }

    fn bytes(&self) -> u64 {
        let written = self.elements().saturating_mul(self.width);
        primary_only(self.sub_level, self.read_bytes.saturating_add(written))
    }

    fn flops(&self) -> u64 {
        let per_output = (self.in_channels / self.groups)
            .saturating_mul(num_elems(&self.kernel))
            .saturating_mul(2);
        let mut flops = self.elements().saturating_mul(per_output);
        if self.has_bias {
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

    fn ints(name: &str, values: &[i64]) -> ArgDescriptor {
        ArgDescriptor::tuple(name, values.iter().map(|v| ScalarValue::Int(*v)).collect())
    }

    #[test]
    fn test_conv2d_basic() {
        let r = record(
            FUNCTIONAL,
            "conv2d",
            vec![
                tensor(&[8, 3, 32, 32], "float32"),
                tensor(&[16, 3, 3, 3], "float32"),
            ],
        );
        let c = Conv::new(&r).unwrap();
        assert_eq!(c.output_spatial, vec![30, 30]);
        assert_eq!(c.elements(), 8 * 16 * 30 * 30);
        assert_eq!(c.flops(), 8 * 16 * 30 * 30 * 2 * 3 * 9);
        assert_eq!(
            c.bytes(),
            (8 * 3 * 32 * 32 + 16 * 3 * 9 + 8 * 16 * 30 * 30) * 4
        );
        assert_eq!(c.tensor_core(), TensorCoreTag::NotApplicable);
    }

    #[test]
    fn test_conv2d_stride_padding_bias() {
        let r = record(
            FUNCTIONAL,
            "conv2d",
            vec![
                tensor(&[1, 4, 15, 15], "float16"),
                tensor(&[8, 4, 3, 3], "float16"),
                tensor(&[8], "float16"),
                ints("", &[2, 2]),
                int("", 1),
            ],
        );
        let c = Conv::new(&r).unwrap();
        assert_eq!(c.output_spatial, vec![8, 8]);
        let out = 8 * 8 * 8;
        assert_eq!(c.flops(), out * 2 * 4 * 9 + out);
        assert_eq!(c.bytes(), (4 * 15 * 15 + 8 * 4 * 9 + 8 + out) * 2);
    }

    #[test]
    fn test_conv1d_named_groups_and_dilation() {
        let r = record(
            FUNCTIONAL,
            "conv1d",
            vec![
                tensor(&[2, 8, 100], "float32"),
                tensor(&[8, 2, 5], "float32"),
                int("dilation", 2),
                int("groups", 4),
            ],
        );
        let c = Conv::new(&r).unwrap();
        assert_eq!(c.output_spatial, vec![92]);
        assert_eq!(c.flops(), 2 * 8 * 92 * 2 * 2 * 5);
    }

    #[test]
    fn test_conv2d_same_padding() {
        let r = record(
            FUNCTIONAL,
            "conv2d",
            vec![
                tensor(&[1, 3, 20, 20], "float32"),
                tensor(&[6, 3, 5, 5], "float32"),
                ArgDescriptor::scalar("padding", ScalarValue::Str("same".to_string())),
            ],
        );
        let c = Conv::new(&r).unwrap();
        assert_eq!(c.output_spatial, vec![20, 20]);
        assert_eq!(c.padding, vec![2, 2]);
    }

    #[test]
    fn test_conv_unbatched_input() {
        let r = record(
            FUNCTIONAL,
            "conv1d",
            vec![tensor(&[4, 10], "float32"), tensor(&[2, 4, 3], "float32")],
        );
        let c = Conv::new(&r).unwrap();
        assert_eq!(c.batch, 1);
        assert_eq!(c.elements(), 2 * 8);
    }

    #[test]
    fn test_conv_channel_mismatch() {
        let r = record(
            FUNCTIONAL,
            "conv2d",
            vec![
                tensor(&[1, 3, 8, 8], "float32"),
                tensor(&[4, 2, 3, 3], "float32"),
            ],
        );
        assert!(matches!(
            Conv::new(&r).unwrap_err(),
            AnalysisError::InvalidArguments { .. }
        ));
    }

    #[test]
    fn test_conv_dilation_overflow_rejected() {
        let r = record(
            FUNCTIONAL,
            "conv1d",
            vec![
                tensor(&[1, 2, 16], "float32"),
                tensor(&[2, 2, 5], "float32"),
                int("dilation", i64::MAX),
            ],
        );
        assert!(matches!(
            Conv::new(&r).unwrap_err(),
            AnalysisError::InvalidArguments { .. }
        ));
    }

    #[test]
    fn test_conv_tensor_core_tag() {
        let r = on_kernel(
            record(
                FUNCTIONAL,
                "conv2d",
                vec![
                    tensor(&[1, 8, 8, 8], "float16"),
                    tensor(&[8, 8, 1, 1], "float16"),
                ],
            ),
            "volta_fp16_s884cudnn_fp16_256x128_ldg8_relu_f2f_exp_small_nhwc2nchw_tn_v1",
        );
        assert_eq!(Conv::new(&r).unwrap().tensor_core(), TensorCoreTag::Used);
    }
}
