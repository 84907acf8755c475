//! TFACC wire protocol definitions
//!
//! Everything in this crate is an ABI contract with the accelerator firmware:
//! the shared region layout, operation codes, element type tags and the
//! byte-level encoding of messages written into the command area.

pub mod descriptor;
pub mod dtype;
pub mod layout;
pub mod op;
pub mod server_info;
pub mod wire;

pub use descriptor::MessageDescriptor;
pub use dtype::{DataType, QuantRange, QuantScheme};
pub use layout::RegionLayout;
pub use op::OpCode;
pub use server_info::ServerInfo;
pub use wire::{SliceWriter, WireBuffer, WireWrite};
