//! JSON descriptors that head every long message
//!
//! The firmware's JSON reader tolerates any whitespace, but the host emits the
//! exact text its reference client produces: keys in sorted order, `", "`
//! between members and `": "` after keys.

use serde::Serialize;
use serde_json::ser::Formatter;
use std::io;
use tfacc_common::Result;

/// Operation name for tensor registration
pub const OP_REGISTER: &str = "registerData";

/// Operation name for tensor unregistration
pub const OP_UNREGISTER: &str = "unregisterData";

/// Header of a registration or unregistration message
///
/// Field order is the serialized key order and must stay sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDescriptor<'a> {
    #[serde(rename = "dataName")]
    pub data_name: &'a str,

    pub op: &'static str,

    #[serde(rename = "weightType", skip_serializing_if = "Option::is_none")]
    pub weight_type: Option<&'a str>,
}

impl<'a> MessageDescriptor<'a> {
    /// Descriptor announcing a resident tensor
    pub fn register(data_name: &'a str, weight_type: &'a str) -> Self {
        Self {
            data_name,
            op: OP_REGISTER,
            weight_type: Some(weight_type),
        }
    }

    /// Descriptor releasing a resident tensor
    pub fn unregister(data_name: &'a str) -> Self {
        Self {
            data_name,
            op: OP_UNREGISTER,
            weight_type: None,
        }
    }

    /// Serialize to the descriptor text
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64 + self.data_name.len());
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
        self.serialize(&mut serializer)?;
        Ok(out)
    }
}

/// Compact JSON with a space after each separator
#[derive(Debug, Clone, Copy, Default)]
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
