//! Long message transport
//!
//! Messages larger than the command area travel as a sequence of
//! length-prefixed chunks, one `StartLongData` round each, closed by a single
//! `FinishLongData` round. The accelerator concatenates the chunks and
//! decodes the result as one message.

use crate::channel::Channel;
use tfacc_common::{Result, TfaccError, METRICS};
use tfacc_proto::{OpCode, SliceWriter, WireWrite};
use tracing::{debug, trace};

/// Send `message` through the command area
///
/// An empty message sends no chunk and only the closing round. A failure
/// part way through leaves the accelerator with a partial message; there is
/// no rollback.
pub fn send_long_message<C: Channel + ?Sized>(channel: &mut C, message: &[u8]) -> Result<()> {
    let limit = channel.transfer_limit();
    if limit == 0 {
        return Err(TfaccError::invalid_input("transfer limit is zero"));
    }

    let mut chunks = 0;
    for chunk in message.chunks(limit) {
        let mut writer = SliceWriter::new(channel.command_area());
        writer.put_prefixed(chunk)?;

        channel.execute(OpCode::StartLongData)?;
        chunks += 1;
        trace!("Sent chunk {} ({} bytes)", chunks, chunk.len());
        METRICS.channel.long_message_chunks_total.inc();
    }

    channel.execute(OpCode::FinishLongData)?;

    METRICS.channel.long_messages_total.inc();
    METRICS
        .channel
        .long_message_bytes_total
        .inc_by(message.len() as u64);
    debug!(
        "Long message of {} bytes sent in {} chunks",
        message.len(),
        chunks
    );
    Ok(())
}
