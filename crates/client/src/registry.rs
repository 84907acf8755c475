//! Registry of tensors resident on the accelerator
//!
//! Registration ships a tensor's metadata and bytes once; later linear calls
//! refer to it by name. The registry mirrors the accelerator's resident set
//! so a name is never sent twice, and clears it again at teardown.
//!
//! Registration message layout (all integers i32 little-endian):
//!
//! ```text
//! len, JSON descriptor {"dataName", "op": "registerData", "weightType"}
//! ndims, dims[ndims]
//! plain float:   tag, bytes
//! per-channel:   tag, axis, (min, max)[channels], bytes
//! grouped:       tag, axis, group, group_cnt, (min, max)[channels * group], bytes
//! ```
//!
//! `channels` is the size along the quantization axis, or 1 when the axis is
//! absent (written as -1).

use crate::channel::Channel;
use crate::tensor::{TensorRole, TensorSource};
use crate::transport::send_long_message;
use std::collections::BTreeSet;
use tfacc_common::{Result, TfaccError, METRICS};
use tfacc_proto::{MessageDescriptor, QuantRange, QuantScheme, WireBuffer, WireWrite};
use tracing::{debug, trace};

/// Names of tensors currently resident on the accelerator
///
/// Only [`register`](Self::register) and [`unregister`](Self::unregister)
/// (and the bulk [`unregister_all`](Self::unregister_all)) change the set.
#[derive(Debug, Default)]
pub struct TensorRegistry {
    names: BTreeSet<String>,
}

impl TensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resident names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Make `tensor` resident
    ///
    /// Returns whether a message was sent: empty and already resident names
    /// are skipped. The name is recorded only after the transfer completes.
    pub fn register<C, T>(&mut self, channel: &mut C, tensor: &T, role: TensorRole) -> Result<bool>
    where
        C: Channel + ?Sized,
        T: TensorSource + ?Sized,
    {
        let name = tensor.name();
        if name.is_empty() || self.names.contains(name) {
            trace!("Skipping registration of {:?}", name);
            return Ok(false);
        }

        let message = encode_registration(tensor, role)?;
        debug!(
            "Registering {} tensor {} {:?} {:?} ({} bytes)",
            role,
            name,
            tensor.data_type(),
            tensor.dims(),
            message.len()
        );
        send_long_message(channel, message.as_bytes())?;

        self.names.insert(name.to_string());
        METRICS.registry_ops.registrations_total.inc();
        METRICS.registry_ops.resident_tensors.inc();
        Ok(true)
    }

    /// Release a resident tensor
    ///
    /// Returns whether a message was sent; absent names are a no-op.
    pub fn unregister<C>(&mut self, channel: &mut C, name: &str) -> Result<bool>
    where
        C: Channel + ?Sized,
    {
        if !self.names.contains(name) {
            return Ok(false);
        }

        let message = encode_unregistration(name)?;
        debug!("Unregistering tensor {}", name);
        send_long_message(channel, message.as_bytes())?;

        self.names.remove(name);
        METRICS.registry_ops.unregistrations_total.inc();
        METRICS.registry_ops.resident_tensors.dec();
        Ok(true)
    }

    /// Release every resident tensor, stopping at the first failed transfer
    pub fn unregister_all<C>(&mut self, channel: &mut C) -> Result<usize>
    where
        C: Channel + ?Sized,
    {
        let names: Vec<String> = self.names.iter().cloned().collect();
        for name in &names {
            self.unregister(channel, name)?;
        }
        Ok(names.len())
    }
}

/// Build the registration message for `tensor`
pub fn encode_registration<T>(tensor: &T, role: TensorRole) -> Result<WireBuffer>
where
    T: TensorSource + ?Sized,
{
    let dims = tensor.dims();
    let data_type = tensor.data_type();
    let bytes = tensor.bytes();

    let expected = data_type.bytes_for(tensor.element_count());
    if bytes.len() < expected {
        return Err(TfaccError::tensor(format!(
            "tensor {} {:?} {:?} has {} bytes, expected at least {}",
            tensor.name(),
            data_type,
            dims,
            bytes.len(),
            expected
        )));
    }

    let descriptor = MessageDescriptor::register(tensor.name(), role.as_str()).to_json_bytes()?;
    let mut buffer = WireBuffer::with_capacity(
        descriptor.len() + 4 * (dims.len() + 6) + 8 * tensor.ranges().len() + bytes.len(),
    );
    buffer.put_prefixed(&descriptor)?;

    buffer.put_len(dims.len())?;
    for &dim in dims {
        buffer.put_len(dim)?;
    }

    match data_type.scheme() {
        QuantScheme::Plain => {
            buffer.put_i32(data_type.tag())?;
        }
        QuantScheme::PerChannel => {
            let channels = channel_count(tensor)?;
            buffer.put_i32(data_type.tag())?;
            put_axis(&mut buffer, tensor.per_channel_axis())?;
            put_ranges(&mut buffer, required_ranges(tensor, channels)?)?;
        }
        QuantScheme::Grouped => {
            let channels = channel_count(tensor)?;
            let group = tensor.group();
            if group == 0 {
                return Err(TfaccError::invalid_input(format!(
                    "tensor {} has zero groups per channel",
                    tensor.name()
                )));
            }
            buffer.put_i32(data_type.tag())?;
            put_axis(&mut buffer, tensor.per_channel_axis())?;
            buffer.put_len(group)?;
            buffer.put_len(tensor.group_cnt())?;
            put_ranges(&mut buffer, required_ranges(tensor, channels * group)?)?;
        }
        QuantScheme::Unsupported => {
            return Err(TfaccError::invalid_input(format!(
                "tensor {} has type {:?}, which cannot be made resident",
                tensor.name(),
                data_type
            )));
        }
    }

    buffer.put_bytes(bytes)?;
    Ok(buffer)
}

/// Build the unregistration message for `name`
pub fn encode_unregistration(name: &str) -> Result<WireBuffer> {
    let descriptor = MessageDescriptor::unregister(name).to_json_bytes()?;
    let mut buffer = WireBuffer::with_capacity(4 + descriptor.len());
    buffer.put_prefixed(&descriptor)?;
    Ok(buffer)
}

fn channel_count<T: TensorSource + ?Sized>(tensor: &T) -> Result<usize> {
    match tensor.per_channel_axis() {
        None => Ok(1),
        Some(axis) => tensor.dims().get(axis).copied().ok_or_else(|| {
            TfaccError::invalid_input(format!(
                "quantization axis {} is outside the {}-d tensor {}",
                axis,
                tensor.dims().len(),
                tensor.name()
            ))
        }),
    }
}

fn required_ranges<T: TensorSource + ?Sized>(tensor: &T, count: usize) -> Result<&[QuantRange]> {
    let ranges = tensor.ranges();
    ranges.get(..count).ok_or_else(|| {
        TfaccError::invalid_input(format!(
            "tensor {} needs {} quantization ranges, has {}",
            tensor.name(),
            count,
            ranges.len()
        ))
    })
}

fn put_axis(buffer: &mut WireBuffer, axis: Option<usize>) -> Result<()> {
    match axis {
        None => buffer.put_i32(-1),
        Some(axis) => buffer.put_len(axis),
    }
}

fn put_ranges(buffer: &mut WireBuffer, ranges: &[QuantRange]) -> Result<()> {
    for range in ranges {
        buffer.put_f32(range.min)?;
        buffer.put_f32(range.max)?;
    }
    Ok(())
}
