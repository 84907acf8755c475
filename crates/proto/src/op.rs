//! Operation codes understood by the accelerator firmware

use std::fmt;

/// Operation posted into every partition's flag slot
///
/// A flag value of zero means "idle", so no operation uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    /// Quantized linear with 4-bit weights without zero point
    LinearInt4NoZero = 1,

    /// Quantized linear with 8-bit weights
    LinearInt8 = 2,

    /// Write the server-info document into the result area
    GetComputeServerInfo = 10000,

    /// Append the chunk in the command area to the pending long message
    StartLongData = 10001,

    /// Interpret the accumulated chunks as one message
    FinishLongData = 10002,
}

impl OpCode {
    /// Value written into the flag slot
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Decode a flag value, `None` for idle or unknown values
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(OpCode::LinearInt4NoZero),
            2 => Some(OpCode::LinearInt8),
            10000 => Some(OpCode::GetComputeServerInfo),
            10001 => Some(OpCode::StartLongData),
            10002 => Some(OpCode::FinishLongData),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_raw())
    }
}
