//! Server-info document returned by `GetComputeServerInfo`
//!
//! The result area holds an i32 length followed by that many bytes of UTF-8
//! JSON. Only `numacnt` is interpreted; other members are kept verbatim.

use crate::layout::RegionLayout;
use crate::wire::read_i32;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tfacc_common::{Result, TfaccError};

/// Parsed server-info document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Number of compute partitions, one flag slot each
    #[serde(rename = "numacnt", deserialize_with = "integral_count")]
    pub partitions: usize,

    /// Members the client does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServerInfo {
    /// Decode the document from the start of the result area
    ///
    /// Any defect is reported as a server-info error, which is fatal to
    /// client construction.
    pub fn from_result_area(result: &[u8]) -> Result<Self> {
        let len = read_i32(result, 0)
            .ok_or_else(|| TfaccError::server_info("result area shorter than the length prefix"))?;
        let len = usize::try_from(len)
            .map_err(|_| TfaccError::server_info(format!("negative document length {}", len)))?;
        let body = result.get(4..4 + len).ok_or_else(|| {
            TfaccError::server_info(format!(
                "document length {} exceeds the {} byte result area",
                len,
                result.len()
            ))
        })?;
        let text = std::str::from_utf8(body)
            .map_err(|e| TfaccError::server_info(format!("document is not UTF-8: {}", e)))?;

        Self::parse(text)
    }

    /// Parse and validate the JSON document
    pub fn parse(text: &str) -> Result<Self> {
        let info: ServerInfo = serde_json::from_str(text)
            .map_err(|e| TfaccError::server_info(format!("invalid document {:?}: {}", text, e)))?;

        if info.partitions == 0 || info.partitions > RegionLayout::MAX_PARTITIONS {
            return Err(TfaccError::server_info(format!(
                "partition count {} outside 1..={}",
                info.partitions,
                RegionLayout::MAX_PARTITIONS
            )));
        }
        Ok(info)
    }
}

/// Non-negative integer that firmware may also write as an integral float
fn integral_count<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<usize, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    let count = match number.as_u64() {
        Some(count) => Some(count),
        None => number
            .as_f64()
            .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= u32::MAX as f64)
            .map(|v| v as u64),
    };
    count
        .and_then(|count| usize::try_from(count).ok())
        .ok_or_else(|| D::Error::custom(format!("{} is not a partition count", number)))
}
