//! Element types and quantization ranges
//!
//! The numeric tags are what the registration message carries, so they must
//! stay in sync with the firmware's element type table.

/// Element data type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DataType {
    /// Float32
    Float32 = 0,
    /// BFloat16
    BFloat16 = 1,
    /// Int16
    Int16 = 2,
    /// Int8 with per-channel min/max
    Int8 = 3,
    /// Int4 with per-channel min/max
    Int4 = 4,
    /// Int2
    Int2 = 5,
    /// Packed bits
    Bit = 6,
    /// Float16
    Float16 = 7,
    /// Int4 decoded as `min + q * scale`, per-channel
    Int4NoZero = 8,
    /// Int4 decoded as `min + q * scale`, per-group
    Int4Group = 9,
}

/// How a data type is laid out in a registration message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantScheme {
    /// Tag and raw bytes
    Plain,
    /// Tag, axis, one range per channel, raw bytes
    PerChannel,
    /// Tag, axis, group, group count, one range per channel and group, raw bytes
    Grouped,
    /// Not accepted by the firmware's registration decoder
    Unsupported,
}

impl DataType {
    /// Tag written on the wire
    pub const fn tag(self) -> i32 {
        self as i32
    }

    /// Registration layout for this type
    pub fn scheme(self) -> QuantScheme {
        match self {
            DataType::Float32 | DataType::BFloat16 | DataType::Float16 => QuantScheme::Plain,
            DataType::Int8 | DataType::Int4 | DataType::Int4NoZero => QuantScheme::PerChannel,
            DataType::Int4Group => QuantScheme::Grouped,
            DataType::Int16 | DataType::Int2 | DataType::Bit => QuantScheme::Unsupported,
        }
    }

    /// Storage bits per element
    pub fn bits(self) -> usize {
        match self {
            DataType::Float32 => 32,
            DataType::BFloat16 | DataType::Float16 | DataType::Int16 => 16,
            DataType::Int8 => 8,
            DataType::Int4 | DataType::Int4NoZero | DataType::Int4Group => 4,
            DataType::Int2 => 2,
            DataType::Bit => 1,
        }
    }

    /// Bytes needed to store `elements` values
    pub fn bytes_for(self, elements: usize) -> usize {
        (elements * self.bits() + 7) / 8
    }
}

/// Min/max pair for one channel, group or input row
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuantRange {
    pub min: f32,
    pub max: f32,
}

impl QuantRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
}
