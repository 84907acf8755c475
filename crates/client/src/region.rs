//! Shared region backed by a device mapping
//!
//! The accelerator exposes its mailbox as a 64 MiB window of a device node.
//! The region is mapped once and carved into command, result and flag areas
//! at the offsets fixed by [`RegionLayout`].

use crate::signal::FlagArray;
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::Path;
use std::ptr::NonNull;
use std::slice;
use tfacc_common::{Result, TfaccError};
use tfacc_proto::RegionLayout;
use tracing::{debug, info};

/// Mapped shared region
///
/// All three areas live inside one mapping; dropping the region unmaps it.
/// Every access goes through `base`, a pointer taken once from the mutable
/// mapping, so no Rust reference ever spans the flag array the accelerator
/// writes to.
#[derive(Debug)]
pub struct SharedRegion {
    mmap: MmapMut,
    base: NonNull<u8>,
}

// SAFETY: `base` points into `mmap`, which is owned by the region and is
// itself Send and Sync. Flag slots are only touched through atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Open the device node and map the region at `map_offset`
    ///
    /// Failing to open or map is fatal; there is no fallback mode.
    pub fn open<P: AsRef<Path>>(path: P, map_offset: u64) -> Result<Self> {
        let path = path.as_ref();
        info!(
            "Mapping {} MiB shared region from {} at offset {:#x}",
            RegionLayout::REGION_SIZE / (1024 * 1024),
            path.display(),
            map_offset
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TfaccError::device(format!("Failed to open {}: {}", path.display(), e)))?;

        // The length is given explicitly: device nodes report a size of zero.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(map_offset)
                .len(RegionLayout::REGION_SIZE)
                .map_mut(&file)
                .map_err(|e| {
                    TfaccError::memory_map(format!("Failed to mmap {}: {}", path.display(), e))
                })?
        };

        Self::from_mmap(mmap)
    }

    /// Wrap an existing writable mapping
    pub fn from_mmap(mut mmap: MmapMut) -> Result<Self> {
        if mmap.len() < RegionLayout::REGION_SIZE {
            return Err(TfaccError::memory_map(format!(
                "mapping of {} bytes is smaller than the {} byte region",
                mmap.len(),
                RegionLayout::REGION_SIZE
            )));
        }
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| TfaccError::memory_map("mapping has a null base"))?;
        if base.as_ptr() as usize % std::mem::align_of::<i32>() != 0 {
            return Err(TfaccError::memory_map("mapping is not aligned for flag access"));
        }

        debug!("Shared region mapped at {:p}", base);
        Ok(Self { mmap, base })
    }

    /// Anonymous region with no accelerator behind it
    pub fn anonymous() -> Result<Self> {
        let mmap = MmapMut::map_anon(RegionLayout::REGION_SIZE)
            .map_err(|e| TfaccError::memory_map(format!("Failed to map anonymous region: {}", e)))?;
        Self::from_mmap(mmap)
    }

    /// Command area, written by the host before a launch
    pub fn command_area(&self) -> &[u8] {
        // SAFETY: in bounds of the mapping; the accelerator only reads the
        // command area.
        unsafe {
            slice::from_raw_parts(
                self.base.as_ptr().add(RegionLayout::COMMAND_OFFSET),
                RegionLayout::COMMAND_SIZE,
            )
        }
    }

    /// Mutable command area
    pub fn command_area_mut(&mut self) -> &mut [u8] {
        // SAFETY: in bounds, and `&mut self` rules out any other host view.
        unsafe {
            slice::from_raw_parts_mut(
                self.base.as_ptr().add(RegionLayout::COMMAND_OFFSET),
                RegionLayout::COMMAND_SIZE,
            )
        }
    }

    /// Result area
    ///
    /// Only meaningful once a wait has returned: the accelerator writes it
    /// while its partitions are busy.
    pub fn result_area(&self) -> &[u8] {
        // SAFETY: in bounds of the mapping and disjoint from the flag array.
        unsafe {
            slice::from_raw_parts(
                self.base.as_ptr().add(RegionLayout::RESULT_OFFSET),
                RegionLayout::RESULT_SIZE,
            )
        }
    }

    /// Partition flag slots
    pub fn flags(&self) -> FlagArray<'_> {
        // SAFETY: `base` came from the mutable mapping, which is at least
        // REGION_SIZE bytes, i32 aligned (checked in from_mmap) and lives as
        // long as the borrow.
        unsafe { FlagArray::from_raw(self.base.as_ptr().add(RegionLayout::FLAG_OFFSET)) }
    }

    /// Length of the underlying mapping
    pub fn mapped_len(&self) -> usize {
        self.mmap.len()
    }
}
