//! Client facade
//!
//! [`TfaccClient`] owns one channel and the registry mirroring what is
//! resident behind it. Dropping the client releases every resident tensor
//! before the channel (and with it the mapping) goes away.

use crate::channel::{Channel, DeviceChannel};
use crate::linear::QuantizedLinear;
use crate::registry::TensorRegistry;
use crate::tensor::{TensorRole, TensorSource};
use crate::transport;
use tfacc_common::{Result, TfaccConfig};
use tfacc_proto::ServerInfo;
use tracing::{info, warn};

/// Accelerator client over a channel
#[derive(Debug)]
pub struct TfaccClient<C: Channel = DeviceChannel> {
    registry: TensorRegistry,
    channel: C,
    server_info: Option<ServerInfo>,
    closed: bool,
}

impl TfaccClient<DeviceChannel> {
    /// Map the device and learn the partition count
    ///
    /// Any failure here is fatal: no partially initialized client is
    /// returned.
    pub fn connect(config: &TfaccConfig) -> Result<Self> {
        config.validate()?;
        let mut channel = DeviceChannel::open(config)?;
        let server_info = channel.handshake()?;

        info!(
            "Connected to {} with {} partitions",
            config.device.path.display(),
            server_info.partitions
        );
        Ok(Self {
            registry: TensorRegistry::new(),
            channel,
            server_info: Some(server_info),
            closed: false,
        })
    }

    /// Partitions every operation is posted to
    pub fn partition_count(&self) -> usize {
        self.channel.partitions()
    }
}

impl<C: Channel> TfaccClient<C> {
    /// Client over an already prepared channel, without a handshake
    pub fn with_channel(channel: C) -> Self {
        Self {
            registry: TensorRegistry::new(),
            channel,
            server_info: None,
            closed: false,
        }
    }

    /// Server info from the handshake, if one was made
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn registry(&self) -> &TensorRegistry {
        &self.registry
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn registered_names(&self) -> impl Iterator<Item = &str> {
        self.registry.names()
    }

    /// Make `tensor` resident; returns whether a message was sent
    pub fn register<T: TensorSource + ?Sized>(&mut self, tensor: &T, role: TensorRole) -> Result<bool> {
        self.registry.register(&mut self.channel, tensor, role)
    }

    /// Release a resident tensor; returns whether a message was sent
    pub fn unregister(&mut self, name: &str) -> Result<bool> {
        self.registry.unregister(&mut self.channel, name)
    }

    /// Send an arbitrary message through the chunked transport
    pub fn send_long_message(&mut self, message: &[u8]) -> Result<()> {
        transport::send_long_message(&mut self.channel, message)
    }

    /// Run a linear call; see [`QuantizedLinear::run`]
    pub fn run_linear<W, B>(&mut self, linear: &QuantizedLinear<'_, W, B>, output: &mut [f32]) -> Result<()>
    where
        W: TensorSource + ?Sized,
        B: TensorSource + ?Sized,
    {
        linear.run(&mut self.channel, &mut self.registry, output)
    }

    /// Release every resident tensor and close the client
    ///
    /// Stops at the first failed unregistration and returns its error.
    pub fn shutdown(mut self) -> Result<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        // A failed wait leaves the channel unusable, so never retry.
        self.closed = true;
        let released = self.registry.unregister_all(&mut self.channel)?;
        if released > 0 {
            info!("Released {} resident tensors", released);
        }
        Ok(())
    }
}

impl<C: Channel> Drop for TfaccClient<C> {
    fn drop(&mut self) {
        if let Err(e) = self.release_all() {
            warn!(
                "Failed to release resident tensors, {} left on the accelerator: {}",
                self.registry.len(),
                e
            );
        }
    }
}
