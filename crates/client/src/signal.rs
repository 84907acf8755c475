//! Flag-based task signaling
//!
//! Each compute partition owns one i32 slot in the flag array. Zero means
//! idle; any other value is the op code the partition has been asked to run.
//! The host posts an op to every partition and then polls until all of them
//! have written zero back. There is no interrupt or OS primitive on the
//! accelerator side, so polling plus explicit barriers is the whole protocol.

use crossbeam::utils::Backoff;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicI32, Ordering};
use std::time::{Duration, Instant};
use tfacc_common::config::{WaitConfig, WaitStrategyKind};
use tfacc_common::{Result, TfaccError, METRICS};
use tfacc_proto::{OpCode, RegionLayout};
use tracing::{trace, warn};

/// View of the flag slots inside a mapped region
pub struct FlagArray<'a> {
    base: *mut u8,
    _region: PhantomData<&'a [u8]>,
}

impl<'a> FlagArray<'a> {
    /// # Safety
    /// `base` must point at the flag area of a writable mapping that holds
    /// `RegionLayout::MAX_PARTITIONS` i32-aligned slots and outlives `'a`.
    pub unsafe fn from_raw(base: *mut u8) -> Self {
        Self {
            base,
            _region: PhantomData,
        }
    }

    /// Slot for `partition`
    ///
    /// Panics if `partition` is outside the flag array.
    pub fn slot(&self, partition: usize) -> &'a AtomicI32 {
        assert!(
            partition < RegionLayout::MAX_PARTITIONS,
            "partition {} outside the flag array",
            partition
        );
        // SAFETY: in bounds and aligned per the from_raw contract; every
        // host access to the slot goes through this atomic.
        unsafe {
            AtomicI32::from_ptr(
                self.base
                    .add(partition * RegionLayout::FLAG_STRIDE)
                    .cast::<i32>(),
            )
        }
    }

    /// Post `op` to partitions `0..partitions`
    ///
    /// A full barrier precedes the first store so the command area is
    /// visible before any partition sees its flag change, and another follows
    /// each store.
    pub fn post(&self, op: OpCode, partitions: usize) {
        fence(Ordering::SeqCst);
        for partition in 0..partitions {
            self.slot(partition).store(op.as_raw(), Ordering::Release);
            fence(Ordering::SeqCst);
        }
    }

    /// Current raw value of a slot
    pub fn read(&self, partition: usize) -> i32 {
        self.slot(partition).load(Ordering::Acquire)
    }

    /// Whether partitions `0..partitions` have all cleared their flag
    pub fn all_idle(&self, partitions: usize) -> bool {
        let mut pending = 0;
        for partition in 0..partitions {
            pending |= self.read(partition);
        }
        pending == 0
    }

    /// Partitions among `0..partitions` that still hold an op
    pub fn busy(&self, partitions: usize) -> Vec<usize> {
        (0..partitions).filter(|&p| self.read(p) != 0).collect()
    }
}

impl fmt::Debug for FlagArray<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagArray").field("base", &self.base).finish()
    }
}

/// Polling policy used by `wait`
///
/// Implementations must only return `Ok` once every polled partition reads
/// zero, since the caller reads the result area right after.
pub trait WaitStrategy: fmt::Debug + Send + Sync {
    /// Block until partitions `0..partitions` are idle
    fn wait_idle(&self, flags: &FlagArray<'_>, partitions: usize) -> Result<()>;
}

/// Unbounded spin
///
/// A partition that never clears its flag blocks the caller forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinWait;

impl WaitStrategy for SpinWait {
    fn wait_idle(&self, flags: &FlagArray<'_>, partitions: usize) -> Result<()> {
        let backoff = Backoff::new();
        while !flags.all_idle(partitions) {
            backoff.spin();
        }
        Ok(())
    }
}

/// Spin with a deadline
///
/// On timeout the op may still be running on the accelerator, so the channel
/// must not be reused for another launch.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineWait {
    timeout: Duration,
}

impl DeadlineWait {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WaitStrategy for DeadlineWait {
    fn wait_idle(&self, flags: &FlagArray<'_>, partitions: usize) -> Result<()> {
        let start = Instant::now();
        let backoff = Backoff::new();
        loop {
            if flags.all_idle(partitions) {
                return Ok(());
            }
            if start.elapsed() >= self.timeout {
                let busy = flags.busy(partitions);
                // Partitions may have finished between the two reads.
                if busy.is_empty() {
                    return Ok(());
                }
                METRICS.channel.wait_timeouts_total.inc();
                warn!("Partitions {:?} still busy after {:?}", busy, self.timeout);
                return Err(TfaccError::timeout(format!(
                    "partitions {:?} did not clear their flag within {:?}",
                    busy, self.timeout
                )));
            }
            backoff.spin();
        }
    }
}

/// Build the strategy selected in configuration
pub fn from_config(config: &WaitConfig) -> Result<Box<dyn WaitStrategy>> {
    match config.strategy {
        WaitStrategyKind::Spin => Ok(Box::new(SpinWait)),
        WaitStrategyKind::Deadline => {
            let timeout_ms = config
                .timeout_ms
                .filter(|&ms| ms > 0)
                .ok_or_else(|| TfaccError::config("Deadline wait strategy requires timeout_ms"))?;
            trace!("Using deadline wait of {} ms", timeout_ms);
            Ok(Box::new(DeadlineWait::new(Duration::from_millis(timeout_ms))))
        }
    }
}
