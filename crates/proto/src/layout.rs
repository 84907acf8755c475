//! Shared region layout
//!
//! ```text
//! +-------------+---------+--------------------------------------------+
//! | Offset      | Size    | Description                                |
//! +-------------+---------+--------------------------------------------+
//! | 0x0000_0000 | 32 MiB  | Command area (host writes)                 |
//! | 0x0200_0000 | 31 MiB  | Result area (accelerator writes)           |
//! | 0x03F0_0000 | 1 MiB   | Flag array, one i32 per partition, 64 KiB  |
//! |             |         | apart                                      |
//! +-------------+---------+--------------------------------------------+
//! ```

const MIB: usize = 1024 * 1024;

/// Fixed byte layout of the shared region
///
/// The offsets are firmware constants. They are never derived from runtime
/// values.
#[derive(Debug, Clone, Copy)]
pub struct RegionLayout;

impl RegionLayout {
    /// Total mapping size
    pub const REGION_SIZE: usize = 64 * MIB;

    /// Command area base
    pub const COMMAND_OFFSET: usize = 0;

    /// Command area size
    pub const COMMAND_SIZE: usize = 32 * MIB;

    /// Result area base
    pub const RESULT_OFFSET: usize = 32 * MIB;

    /// Result area size
    pub const RESULT_SIZE: usize = 31 * MIB;

    /// Flag array base
    pub const FLAG_OFFSET: usize = 63 * MIB;

    /// Distance in bytes between two partition flags (16 Ki i32 slots)
    pub const FLAG_STRIDE: usize = 16 * 1024 * std::mem::size_of::<i32>();

    /// Number of flag slots that fit in the flag array
    pub const MAX_PARTITIONS: usize = (Self::REGION_SIZE - Self::FLAG_OFFSET) / Self::FLAG_STRIDE;

    /// Byte offset of the flag slot for `partition`
    pub const fn flag_offset(partition: usize) -> usize {
        Self::FLAG_OFFSET + partition * Self::FLAG_STRIDE
    }
}

const _: () = assert!(RegionLayout::COMMAND_OFFSET + RegionLayout::COMMAND_SIZE <= RegionLayout::RESULT_OFFSET);
const _: () = assert!(RegionLayout::RESULT_OFFSET + RegionLayout::RESULT_SIZE <= RegionLayout::FLAG_OFFSET);
const _: () = assert!(RegionLayout::FLAG_OFFSET % std::mem::align_of::<i32>() == 0);
const _: () = assert!(RegionLayout::FLAG_STRIDE % std::mem::align_of::<i32>() == 0);
const _: () = assert!(RegionLayout::MAX_PARTITIONS == 16);
