//! Tensor descriptors consumed by the registry
//!
//! The client never owns model tensors. It reads them through
//! [`TensorSource`], which any tensor type can implement. [`HostTensor`] is
//! a plain owned implementation for callers without their own tensor type.

use half::{bf16, f16};
use std::fmt;
use tfacc_proto::{DataType, QuantRange};

/// Label telling the firmware how a resident tensor is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    /// Weight of a linear layer
    Linear,
    /// Bias added to a linear layer's output
    Bias,
}

impl TensorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TensorRole::Linear => "linear",
            TensorRole::Bias => "bias",
        }
    }
}

impl fmt::Display for TensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a tensor that can be made resident
pub trait TensorSource {
    /// Resident key; an empty name is never registered
    fn name(&self) -> &str;

    /// Dimension sizes, outermost first
    fn dims(&self) -> &[usize];

    /// Element type
    fn data_type(&self) -> DataType;

    /// Raw element bytes
    fn bytes(&self) -> &[u8];

    /// Axis the per-channel ranges run along, `None` for a single range
    fn per_channel_axis(&self) -> Option<usize> {
        None
    }

    /// Groups per channel for grouped types
    fn group(&self) -> usize {
        1
    }

    /// Elements per group for grouped types
    fn group_cnt(&self) -> usize {
        0
    }

    /// Per-channel (or per channel and group) ranges
    fn ranges(&self) -> &[QuantRange] {
        &[]
    }

    /// Number of elements, zero for a placeholder
    fn element_count(&self) -> usize {
        if self.dims().is_empty() {
            return 0;
        }
        self.dims().iter().product()
    }

    /// Whether this is the dimensionless "absent" placeholder
    fn is_placeholder(&self) -> bool {
        self.dims().is_empty()
    }
}

/// Owned tensor with heap-allocated bytes
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    name: String,
    dims: Vec<usize>,
    data_type: DataType,
    data: Vec<u8>,
    axis: Option<usize>,
    group: usize,
    group_cnt: usize,
    ranges: Vec<QuantRange>,
}

impl HostTensor {
    /// Tensor from raw bytes
    pub fn new(name: impl Into<String>, dims: Vec<usize>, data_type: DataType, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            dims,
            data_type,
            data,
            axis: None,
            group: 1,
            group_cnt: 0,
            ranges: Vec::new(),
        }
    }

    /// Dimensionless tensor standing in for "no tensor", e.g. a missing bias
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), DataType::Float32, Vec::new())
    }

    /// Float32 tensor
    pub fn from_f32(name: impl Into<String>, dims: Vec<usize>, values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(name, dims, DataType::Float32, data)
    }

    /// Float16 tensor
    pub fn from_f16(name: impl Into<String>, dims: Vec<usize>, values: &[f16]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(name, dims, DataType::Float16, data)
    }

    /// BFloat16 tensor
    pub fn from_bf16(name: impl Into<String>, dims: Vec<usize>, values: &[bf16]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(name, dims, DataType::BFloat16, data)
    }

    /// Attach per-channel ranges along `axis`
    pub fn with_per_channel(mut self, axis: Option<usize>, ranges: Vec<QuantRange>) -> Self {
        self.axis = axis;
        self.ranges = ranges;
        self
    }

    /// Attach grouped ranges: `group` groups of `group_cnt` elements per channel
    pub fn with_groups(
        mut self,
        axis: Option<usize>,
        group: usize,
        group_cnt: usize,
        ranges: Vec<QuantRange>,
    ) -> Self {
        self.axis = axis;
        self.group = group;
        self.group_cnt = group_cnt;
        self.ranges = ranges;
        self
    }
}

impl TensorSource for HostTensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn per_channel_axis(&self) -> Option<usize> {
        self.axis
    }

    fn group(&self) -> usize {
        self.group
    }

    fn group_cnt(&self) -> usize {
        self.group_cnt
    }

    fn ranges(&self) -> &[QuantRange] {
        &self.ranges
    }
}

impl<T: TensorSource + ?Sized> TensorSource for &T {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dims(&self) -> &[usize] {
        (**self).dims()
    }

    fn data_type(&self) -> DataType {
        (**self).data_type()
    }

    fn bytes(&self) -> &[u8] {
        (**self).bytes()
    }

    fn per_channel_axis(&self) -> Option<usize> {
        (**self).per_channel_axis()
    }

    fn group(&self) -> usize {
        (**self).group()
    }

    fn group_cnt(&self) -> usize {
        (**self).group_cnt()
    }

    fn ranges(&self) -> &[QuantRange] {
        (**self).ranges()
    }
}
