//! Quantized linear offload
//!
//! `output[n, k] = linear(input[n, m], weight, bias)` where the input rows are
//! 8-bit quantized with one (min, max) range per row, and the weight and bias
//! are resident tensors referenced by name. A batch that does not fit one
//! command is split into contiguous sub-batches.
//!
//! Command layout per sub-batch (i32/f32 little-endian):
//!
//! ```text
//! word 0..6   rows, m, k, group (always 1), weight name len, bias name len
//! word 6..10  reserved, zero
//! byte 40..   (min, max)[rows], weight name, bias name, input[rows * m]
//! ```
//!
//! The accelerator answers with `rows * k` f32 values at the start of the
//! result area.

use crate::channel::Channel;
use crate::registry::TensorRegistry;
use crate::tensor::{TensorRole, TensorSource};
use std::ops::Range;
use tfacc_common::{LatencyTimer, Result, TfaccError, METRICS};
use tfacc_proto::{DataType, OpCode, QuantRange, SliceWriter, WireWrite};
use tracing::{debug, trace};

/// Size of the fixed command header
pub const LINEAR_HEADER_BYTES: usize = 10 * std::mem::size_of::<i32>();

/// Group field of the command header; the firmware only supports 1
const LINEAR_GROUP: i32 = 1;

/// Bytes per input row beyond its `m` data bytes: one range pair
const RANGE_BYTES: usize = 2 * std::mem::size_of::<f32>();

const OUTPUT_VALUE_BYTES: usize = std::mem::size_of::<f32>();

/// Batch dimensions of one linear call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearShape {
    /// Input rows
    pub n: usize,
    /// Input columns
    pub m: usize,
    /// Output columns
    pub k: usize,
}

impl LinearShape {
    pub fn new(n: usize, m: usize, k: usize) -> Self {
        Self { n, m, k }
    }
}

/// Op code for a weight of type `data_type`
pub fn op_for_weight(data_type: DataType) -> OpCode {
    match data_type {
        DataType::Int8 => OpCode::LinearInt8,
        _ => OpCode::LinearInt4NoZero,
    }
}

/// Split of `[0, n)` into sub-batches of at most `max_rows`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBatchPlan {
    n: usize,
    max_rows: usize,
}

impl SubBatchPlan {
    /// Largest sub-batch that fits both the command and the result area
    ///
    /// `name_bytes` is the combined length of the weight and bias names.
    pub fn new(
        shape: LinearShape,
        name_bytes: usize,
        transfer_limit: usize,
        result_capacity: usize,
    ) -> Result<Self> {
        if shape.n == 0 {
            return Ok(Self { n: 0, max_rows: 0 });
        }
        if shape.m == 0 || shape.k == 0 {
            return Err(TfaccError::invalid_input(format!(
                "linear with m={} k={} has no data",
                shape.m, shape.k
            )));
        }

        let fixed = LINEAR_HEADER_BYTES.saturating_add(name_bytes);
        let row_in = shape.m.checked_add(RANGE_BYTES).ok_or_else(|| shape_overflow(shape))?;
        let row_out = shape
            .k
            .checked_mul(OUTPUT_VALUE_BYTES)
            .ok_or_else(|| shape_overflow(shape))?;
        let by_input = transfer_limit.saturating_sub(fixed) / row_in;
        let by_output = transfer_limit.min(result_capacity) / row_out;
        let max_rows = shape.n.min(by_input).min(by_output);
        if max_rows == 0 {
            return Err(TfaccError::invalid_input(format!(
                "a single row of m={} k={} does not fit a {} byte transfer",
                shape.m, shape.k, transfer_limit
            )));
        }

        Ok(Self {
            n: shape.n,
            max_rows,
        })
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Number of sub-batches
    pub fn len(&self) -> usize {
        if self.n == 0 {
            0
        } else {
            (self.n + self.max_rows - 1) / self.max_rows
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Row ranges in order; they partition `[0, n)`
    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> {
        let (n, step) = (self.n, self.max_rows.max(1));
        (0..n).step_by(step).map(move |start| start..(start + step).min(n))
    }
}

/// One linear call over resident weight and bias tensors
#[derive(Debug)]
pub struct QuantizedLinear<'a, W: ?Sized, B: ?Sized> {
    shape: LinearShape,
    weight: &'a W,
    bias: &'a B,
    input_ranges: &'a [QuantRange],
    input: &'a [u8],
}

impl<'a, W, B> QuantizedLinear<'a, W, B>
where
    W: TensorSource + ?Sized,
    B: TensorSource + ?Sized,
{
    /// `input` holds `n * m` quantized bytes, `input_ranges` one range per row
    pub fn new(
        shape: LinearShape,
        weight: &'a W,
        bias: &'a B,
        input_ranges: &'a [QuantRange],
        input: &'a [u8],
    ) -> Self {
        Self {
            shape,
            weight,
            bias,
            input_ranges,
            input,
        }
    }

    pub fn shape(&self) -> LinearShape {
        self.shape
    }

    pub fn op(&self) -> OpCode {
        op_for_weight(self.weight.data_type())
    }

    /// Bias name as sent in the command; empty for the placeholder
    pub fn bias_name(&self) -> &str {
        if self.bias.is_placeholder() {
            ""
        } else {
            self.bias.name()
        }
    }

    /// Sub-batch split for a channel's limits
    pub fn plan(&self, transfer_limit: usize, result_capacity: usize) -> Result<SubBatchPlan> {
        let name_bytes = self.weight.name().len() + self.bias_name().len();
        SubBatchPlan::new(self.shape, name_bytes, transfer_limit, result_capacity)
    }

    fn check_buffers(&self, output_len: usize) -> Result<()> {
        let LinearShape { n, m, k } = self.shape;
        if m == 0 || k == 0 {
            return Err(TfaccError::invalid_input(format!(
                "linear with m={} k={} has no data",
                m, k
            )));
        }
        if self.input_ranges.len() < n {
            return Err(TfaccError::invalid_input(format!(
                "{} input ranges for {} rows",
                self.input_ranges.len(),
                n
            )));
        }
        let input_len = n.checked_mul(m).ok_or_else(|| shape_overflow(self.shape))?;
        let output_values = n.checked_mul(k).ok_or_else(|| shape_overflow(self.shape))?;
        if self.input.len() < input_len {
            return Err(TfaccError::invalid_input(format!(
                "input of {} bytes is shorter than {} x {}",
                self.input.len(),
                n,
                m
            )));
        }
        if output_len < output_values {
            return Err(TfaccError::invalid_input(format!(
                "output of {} values is shorter than {} x {}",
                output_len, n, k
            )));
        }
        Ok(())
    }

    /// Run the call, registering weight and bias first if needed
    ///
    /// Writes `n * k` values to the front of `output`.
    pub fn run<C>(&self, channel: &mut C, registry: &mut TensorRegistry, output: &mut [f32]) -> Result<()>
    where
        C: Channel + ?Sized,
    {
        if self.shape.n == 0 {
            return Ok(());
        }
        self.check_buffers(output.len())?;
        let plan = self.plan(channel.transfer_limit(), channel.result_area().len())?;

        registry.register(channel, self.weight, TensorRole::Linear)?;
        registry.register(channel, self.bias, TensorRole::Bias)?;

        METRICS.linear.calls_total.inc();
        METRICS
            .linear
            .call_duration
            .time(|| self.run_plan(channel, &plan, output))
    }

    fn run_plan<C>(&self, channel: &mut C, plan: &SubBatchPlan, output: &mut [f32]) -> Result<()>
    where
        C: Channel + ?Sized,
    {
        let op = self.op();
        debug!(
            "Linear {} {:?} on {} in {} sub-batches of up to {} rows",
            op,
            self.shape,
            self.weight.name(),
            plan.len(),
            plan.max_rows()
        );

        for rows in plan.ranges() {
            self.write_command(channel.command_area(), rows.clone())?;
            channel.execute(op)?;

            let k = self.shape.k;
            let values = &mut output[rows.start * k..rows.end * k];
            copy_results(channel.result_area(), values)?;

            trace!("Sub-batch rows {:?} done", rows);
            METRICS.linear.sub_batches_total.inc();
            METRICS.linear.rows_total.inc_by(rows.len() as u64);
        }
        Ok(())
    }

    fn write_command(&self, command: &mut [u8], rows: Range<usize>) -> Result<()> {
        let LinearShape { m, k, .. } = self.shape;
        let weight_name = self.weight.name().as_bytes();
        let bias_name = self.bias_name().as_bytes();

        let mut writer = SliceWriter::new(command);
        writer.put_len(rows.len())?;
        writer.put_len(m)?;
        writer.put_len(k)?;
        writer.put_i32(LINEAR_GROUP)?;
        writer.put_len(weight_name.len())?;
        writer.put_len(bias_name.len())?;
        writer.pad_to(LINEAR_HEADER_BYTES)?;

        for range in &self.input_ranges[rows.clone()] {
            writer.put_f32(range.min)?;
            writer.put_f32(range.max)?;
        }
        writer.put_bytes(weight_name)?;
        writer.put_bytes(bias_name)?;
        writer.put_bytes(&self.input[rows.start * m..rows.end * m])
    }
}

fn shape_overflow(shape: LinearShape) -> TfaccError {
    TfaccError::invalid_input(format!("linear shape {:?} overflows", shape))
}

fn copy_results(result: &[u8], values: &mut [f32]) -> Result<()> {
    let bytes = result
        .get(..values.len() * OUTPUT_VALUE_BYTES)
        .ok_or_else(|| TfaccError::internal("result area smaller than the planned sub-batch"))?;
    for (value, raw) in values.iter_mut().zip(bytes.chunks_exact(OUTPUT_VALUE_BYTES)) {
        *value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::HostTensor;
    use crate::testing::{reference_linear, MockChannel};

    fn row_ranges(n: usize) -> Vec<QuantRange> {
        (0..n)
            .map(|r| QuantRange::new(r as f32 * 10.0, r as f32 * 10.0 + 1.0))
            .collect()
    }

    fn input(n: usize, m: usize) -> Vec<u8> {
        (0..n * m).map(|i| (i % 13) as u8).collect()
    }

    #[test]
    fn test_single_round_for_small_batch() {
        let mut channel = MockChannel::new(1024);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::from_f32("w", vec![4, 4], &[0.25; 16]);
        let bias = HostTensor::placeholder("b");
        registry.register(&mut channel, &weight, TensorRole::Linear).unwrap();
        registry.register(&mut channel, &bias, TensorRole::Bias).unwrap();
        channel.launches.clear();

        let ranges = row_ranges(2);
        let data = input(2, 4);
        let mut output = vec![0.0f32; 8];
        QuantizedLinear::new(LinearShape::new(2, 4, 4), &weight, &bias, &ranges, &data)
            .run(&mut channel, &mut registry, &mut output)
            .unwrap();

        assert_eq!(channel.launches, vec![OpCode::LinearInt4NoZero]);
        assert_eq!(output, reference_linear(&ranges, &data, 4, 4));

        let call = &channel.linear_calls[0];
        assert_eq!((call.rows, call.m, call.k, call.group), (2, 4, 4, 1));
        assert_eq!(call.weight, "w");
        assert_eq!(call.bias, "");
        assert!(call.weight_resident);
    }

    #[test]
    fn test_registers_before_first_use() {
        let mut channel = MockChannel::new(1024);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::from_f32("w", vec![2, 2], &[1.0; 4]);
        let bias = HostTensor::from_f32("b", vec![2], &[0.5; 2]);
        let ranges = row_ranges(1);
        let data = input(1, 2);
        let linear = QuantizedLinear::new(LinearShape::new(1, 2, 2), &weight, &bias, &ranges, &data);

        let mut output = vec![0.0f32; 2];
        linear.run(&mut channel, &mut registry, &mut output).unwrap();
        linear.run(&mut channel, &mut registry, &mut output).unwrap();

        assert_eq!(channel.message_ops(), vec!["registerData", "registerData"]);
        assert!(registry.contains("w") && registry.contains("b"));
        assert_eq!(channel.linear_calls.len(), 2);
        assert_eq!(channel.linear_calls[0].bias, "b");
    }

    #[test]
    fn test_zero_rows_is_noop() {
        let mut channel = MockChannel::new(1024);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::from_f32("w", vec![4, 4], &[0.25; 16]);
        let bias = HostTensor::placeholder("b");

        let mut output: Vec<f32> = Vec::new();
        QuantizedLinear::new(LinearShape::new(0, 4, 4), &weight, &bias, &[], &[])
            .run(&mut channel, &mut registry, &mut output)
            .unwrap();

        assert!(channel.launches.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sub_batches_cover_batch() {
        // 40 header + 1 name byte + 2 rows of (3 input + 8 range) bytes.
        let mut channel = MockChannel::new(63);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::from_f32("w", vec![3, 2], &[1.0; 6]);
        let bias = HostTensor::placeholder("");
        let (n, m, k) = (7, 3, 2);
        let ranges = row_ranges(n);
        let data = input(n, m);

        let linear = QuantizedLinear::new(LinearShape::new(n, m, k), &weight, &bias, &ranges, &data);
        let plan = linear.plan(63, 63).unwrap();
        assert_eq!(plan.max_rows(), 2);
        assert_eq!(plan.ranges().collect::<Vec<_>>(), vec![0..2, 2..4, 4..6, 6..7]);

        let mut output = vec![f32::NAN; n * k];
        linear.run(&mut channel, &mut registry, &mut output).unwrap();

        assert_eq!(channel.linear_calls.len(), 4);
        let rows: Vec<usize> = channel.linear_calls.iter().map(|c| c.rows).collect();
        assert_eq!(rows, vec![2, 2, 2, 1]);
        let sent: Vec<u8> = channel
            .linear_calls
            .iter()
            .flat_map(|c| c.input.clone())
            .collect();
        assert_eq!(sent, data);
        assert_eq!(output, reference_linear(&ranges, &data, m, k));
    }

    #[test]
    fn test_plan_partitions_any_batch() {
        for n in [1usize, 2, 5, 16, 17, 100] {
            for max_rows in [1usize, 3, 16] {
                let plan = SubBatchPlan { n, max_rows };
                let ranges: Vec<_> = plan.ranges().collect();
                assert_eq!(ranges.len(), plan.len());
                assert_eq!(ranges[0].start, 0);
                assert_eq!(ranges.last().unwrap().end, n);
                for pair in ranges.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
                assert!(ranges.iter().all(|r| !r.is_empty() && r.len() <= max_rows));
            }
        }
    }

    #[test]
    fn test_plan_bounded_by_result_area() {
        let shape = LinearShape::new(10, 4, 2);
        let plan = SubBatchPlan::new(shape, 2, 4096, 16).unwrap();
        assert_eq!(plan.max_rows(), 2);
        assert_eq!(plan.len(), 5);

        let plan = SubBatchPlan::new(shape, 2, 4096, 4096).unwrap();
        assert_eq!(plan.max_rows(), 10);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_plan_rejects_limit_without_room() {
        let shape = LinearShape::new(1, 4, 4);
        assert!(SubBatchPlan::new(shape, 10, 50, 1024).is_err());
        assert!(SubBatchPlan::new(shape, 0, 1024, 15).is_err());
        assert!(SubBatchPlan::new(LinearShape::new(0, 4, 4), 0, 0, 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_int8_weight_selects_int8_op() {
        let mut channel = MockChannel::new(1024);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::new("q", vec![2, 2], DataType::Int8, vec![1; 4])
            .with_per_channel(Some(0), row_ranges(2));
        let bias = HostTensor::placeholder("");
        let ranges = row_ranges(1);
        let data = input(1, 2);

        let linear = QuantizedLinear::new(LinearShape::new(1, 2, 2), &weight, &bias, &ranges, &data);
        assert_eq!(linear.op(), OpCode::LinearInt8);

        let mut output = vec![0.0f32; 2];
        linear.run(&mut channel, &mut registry, &mut output).unwrap();
        assert_eq!(channel.linear_calls[0].op, OpCode::LinearInt8);
    }

    #[test]
    fn test_op_selection() {
        assert_eq!(op_for_weight(DataType::Int8), OpCode::LinearInt8);
        assert_eq!(op_for_weight(DataType::Int4NoZero), OpCode::LinearInt4NoZero);
        assert_eq!(op_for_weight(DataType::Float32), OpCode::LinearInt4NoZero);
    }

    #[test]
    fn test_rejects_bad_buffers_without_launching() {
        let mut channel = MockChannel::new(1024);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::from_f32("w", vec![2, 2], &[1.0; 4]);
        let bias = HostTensor::placeholder("");
        let ranges = row_ranges(2);
        let data = input(2, 2);
        let mut output = vec![0.0f32; 4];

        let cases = [
            (LinearShape::new(2, 0, 2), &ranges[..], &data[..], 4),
            (LinearShape::new(2, 2, 2), &ranges[..1], &data[..], 4),
            (LinearShape::new(2, 2, 2), &ranges[..], &data[..3], 4),
            (LinearShape::new(2, 2, 2), &ranges[..], &data[..], 3),
        ];
        for (shape, ranges, data, out_len) in cases {
            let err = QuantizedLinear::new(shape, &weight, &bias, ranges, data)
                .run(&mut channel, &mut registry, &mut output[..out_len])
                .unwrap_err();
            assert!(matches!(err, TfaccError::InvalidInput(_)));
        }
        assert!(channel.launches.is_empty());
    }

    #[test]
    fn test_header_reserved_words_zeroed() {
        let weight = HostTensor::from_f32("w", vec![1, 1], &[1.0]);
        let bias = HostTensor::from_f32("bias", vec![1], &[1.0]);
        let ranges = row_ranges(1);
        let data = [9u8];
        let linear = QuantizedLinear::new(LinearShape::new(1, 1, 1), &weight, &bias, &ranges, &data);

        let mut command = vec![0xaa; 64];
        linear.write_command(&mut command, 0..1).unwrap();

        assert!(command[24..40].iter().all(|&b| b == 0));
        assert_eq!(&command[48..49], b"w");
        assert_eq!(&command[49..53], b"bias");
        assert_eq!(command[53], 9);
    }

    #[test]
    fn test_oversized_shape_is_invalid_input() {
        let mut channel = MockChannel::new(1024);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::from_f32("w", vec![1], &[1.0]);
        let bias = HostTensor::placeholder("");
        let ranges = row_ranges(2);
        let mut output = vec![0.0f32; 2];

        let shape = LinearShape::new(2, usize::MAX / 2 + 1, 1);
        let err = QuantizedLinear::new(shape, &weight, &bias, &ranges, &[])
            .run(&mut channel, &mut registry, &mut output)
            .unwrap_err();
        assert!(matches!(err, TfaccError::InvalidInput(_)));
        assert!(channel.launches.is_empty());

        assert!(SubBatchPlan::new(LinearShape::new(1, usize::MAX, 1), 0, 1024, 1024).is_err());
        assert!(SubBatchPlan::new(LinearShape::new(1, 1, usize::MAX), 0, 1024, 1024).is_err());
    }

    #[test]
    fn test_small_result_area_limits_sub_batches() {
        // Two rows of k=2 outputs fill the 16 byte result area.
        let mut channel = MockChannel::with_result_size(1024, 16);
        let mut registry = TensorRegistry::new();
        let weight = HostTensor::from_f32("w", vec![4, 2], &[1.0; 8]);
        let bias = HostTensor::placeholder("");
        let (n, m, k) = (5, 4, 2);
        let ranges = row_ranges(n);
        let data = input(n, m);

        let mut output = vec![f32::NAN; n * k];
        QuantizedLinear::new(LinearShape::new(n, m, k), &weight, &bias, &ranges, &data)
            .run(&mut channel, &mut registry, &mut output)
            .unwrap();

        let rows: Vec<usize> = channel.linear_calls.iter().map(|c| c.rows).collect();
        assert_eq!(rows, vec![2, 2, 1]);
        assert_eq!(output, reference_linear(&ranges, &data, m, k));
    }
}
