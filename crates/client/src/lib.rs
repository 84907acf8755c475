//! TFACC host client
//!
//! Offloads quantized linear layers to a fixed-function accelerator that is
//! reachable only through a memory-mapped region and per-partition flags.
//! The host writes a command, posts an op code into every partition's flag,
//! and spins until all partitions have cleared it.

pub mod channel;
pub mod client;
pub mod linear;
pub mod region;
pub mod registry;
pub mod shared;
pub mod signal;
pub mod tensor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{Channel, DeviceChannel};
pub use client::TfaccClient;
pub use linear::{LinearShape, QuantizedLinear, SubBatchPlan};
pub use region::SharedRegion;
pub use registry::TensorRegistry;
pub use shared::SharedClient;
pub use signal::{DeadlineWait, FlagArray, SpinWait, WaitStrategy};
pub use tensor::{HostTensor, TensorRole, TensorSource};
pub use transport::send_long_message;

pub use tfacc_common::{Result, TfaccConfig, TfaccError};
pub use tfacc_proto::{DataType, OpCode, QuantRange, RegionLayout, ServerInfo};
