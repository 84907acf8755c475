//! Request/response channel to the accelerator
//!
//! A channel carries exactly one operation at a time: the caller fills the
//! command area, launches an op, waits, and reads the result area. Everything
//! above this layer (transport, registry, linear) is written against the
//! [`Channel`] trait so it can run over a simulated accelerator in tests.

use crate::region::SharedRegion;
use crate::signal::{self, WaitStrategy};
use std::fmt;
use tfacc_common::{LatencyTimer, Result, TfaccConfig, TfaccError, METRICS};
use tfacc_proto::{OpCode, RegionLayout, ServerInfo};
use tracing::{debug, info, trace};

/// One in-flight request at a time over a command area and result area
pub trait Channel {
    /// Scratch space for the next request
    fn command_area(&mut self) -> &mut [u8];

    /// Response written by the accelerator for the last completed request
    fn result_area(&self) -> &[u8];

    /// Maximum payload bytes per signaling round
    fn transfer_limit(&self) -> usize;

    /// Post `op` to every partition
    fn launch(&mut self, op: OpCode);

    /// Block until every partition has finished the posted op
    fn wait(&mut self) -> Result<()>;

    /// Launch then wait
    fn execute(&mut self, op: OpCode) -> Result<()> {
        self.launch(op);
        self.wait()
    }
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn command_area(&mut self) -> &mut [u8] {
        (**self).command_area()
    }

    fn result_area(&self) -> &[u8] {
        (**self).result_area()
    }

    fn transfer_limit(&self) -> usize {
        (**self).transfer_limit()
    }

    fn launch(&mut self, op: OpCode) {
        (**self).launch(op)
    }

    fn wait(&mut self) -> Result<()> {
        (**self).wait()
    }
}

/// Channel over the mapped device region
pub struct DeviceChannel {
    region: SharedRegion,
    partitions: usize,
    transfer_limit: usize,
    wait: Box<dyn WaitStrategy>,
}

impl DeviceChannel {
    /// Wrap a mapped region
    ///
    /// `partitions` is only the count used until [`handshake`](Self::handshake)
    /// learns the real one.
    pub fn new(
        region: SharedRegion,
        partitions: usize,
        transfer_limit: usize,
        wait: Box<dyn WaitStrategy>,
    ) -> Result<Self> {
        if partitions == 0 || partitions > RegionLayout::MAX_PARTITIONS {
            return Err(TfaccError::config(format!(
                "partition count {} outside 1..={}",
                partitions,
                RegionLayout::MAX_PARTITIONS
            )));
        }
        // A chunk travels with its 4-byte length prefix.
        let max_limit = RegionLayout::COMMAND_SIZE - std::mem::size_of::<i32>();
        if transfer_limit == 0 || transfer_limit > max_limit {
            return Err(TfaccError::config(format!(
                "transfer limit {} outside 1..={}",
                transfer_limit, max_limit
            )));
        }

        Ok(Self {
            region,
            partitions,
            transfer_limit,
            wait,
        })
    }

    /// Map the configured device; does not talk to the accelerator yet
    pub fn open(config: &TfaccConfig) -> Result<Self> {
        let region = SharedRegion::open(&config.device.path, config.device.map_offset)?;
        Self::new(
            region,
            config.device.default_partitions,
            config.transfer.transfer_limit,
            signal::from_config(&config.wait)?,
        )
    }

    /// Ask the accelerator for its server info and adopt its partition count
    ///
    /// The query goes out over the provisional count. Partition 0 writes the
    /// document, so only its flag is awaited before reading it; the full wait
    /// then runs over the reported count.
    pub fn handshake(&mut self) -> Result<ServerInfo> {
        debug!(
            "Querying server info over {} provisional partitions",
            self.partitions
        );
        self.launch(OpCode::GetComputeServerInfo);
        self.wait.wait_idle(&self.region.flags(), 1)?;

        let info = ServerInfo::from_result_area(self.region.result_area())?;
        self.partitions = info.partitions;
        self.wait()?;

        info!("Accelerator reports {} compute partitions", info.partitions);
        Ok(info)
    }

    /// Partitions every launch is posted to
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }
}

impl Channel for DeviceChannel {
    fn command_area(&mut self) -> &mut [u8] {
        self.region.command_area_mut()
    }

    fn result_area(&self) -> &[u8] {
        self.region.result_area()
    }

    fn transfer_limit(&self) -> usize {
        self.transfer_limit
    }

    fn launch(&mut self, op: OpCode) {
        trace!("Launching {} on {} partitions", op, self.partitions);
        self.region.flags().post(op, self.partitions);
        METRICS.channel.launches_total.inc();
    }

    fn wait(&mut self) -> Result<()> {
        let flags = self.region.flags();
        METRICS
            .channel
            .wait_duration
            .time(|| self.wait.wait_idle(&flags, self.partitions))
    }
}

impl fmt::Debug for DeviceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceChannel")
            .field("partitions", &self.partitions)
            .field("transfer_limit", &self.transfer_limit)
            .field("wait", &self.wait)
            .finish()
    }
}
