//! Simulated accelerators for tests
//!
//! `Firmware` runs on a real shared mapping in a background thread and
//! answers flags the way partition firmware does. `MockChannel` implements
//! [`Channel`] in memory and decodes everything the host sends.

use crate::channel::Channel;
use crossbeam::utils::Backoff;
use memmap2::MmapMut;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::sync::atomic::{fence, AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tempfile::NamedTempFile;
use tfacc_common::{Result, TfaccError};
use tfacc_proto::wire::{read_f32, read_i32};
use tfacc_proto::{OpCode, QuantRange, RegionLayout};

/// Sparse file the size of the shared region
pub(crate) fn device_file() -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    file.as_file()
        .set_len(RegionLayout::REGION_SIZE as u64)
        .unwrap();
    file
}

/// # Safety
/// `base` must be the start of a live mapping of the whole region.
unsafe fn flag_at<'a>(base: *mut u8, partition: usize) -> &'a AtomicI32 {
    AtomicI32::from_ptr(base.add(RegionLayout::flag_offset(partition)).cast::<i32>())
}

/// Background thread playing the accelerator on a shared file mapping
///
/// Partition 0 does the work through `handler`; every scanned partition
/// clears its own flag.
pub(crate) struct Firmware {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Vec<OpCode>>>,
}

impl Firmware {
    pub(crate) fn spawn<F>(file: &File, scan: usize, mut handler: F) -> Self
    where
        F: FnMut(OpCode, &[u8], &mut [u8]) + Send + 'static,
    {
        let file = file.try_clone().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = std::thread::spawn(move || {
            let mut mmap = unsafe { MmapMut::map_mut(&file).unwrap() };
            let base = mmap.as_mut_ptr();
            let flag = |partition: usize| unsafe { flag_at(base, partition) };

            let mut ops = Vec::new();
            let backoff = Backoff::new();
            while !thread_stop.load(Ordering::Acquire) {
                let mut idle = true;
                for partition in 0..scan {
                    let raw = flag(partition).load(Ordering::Acquire);
                    if raw == 0 {
                        continue;
                    }
                    idle = false;
                    if partition == 0 {
                        let op = OpCode::from_raw(raw).expect("host posted a known op");
                        // The host is parked in its wait, so neither area is
                        // touched from its side until the flag clears.
                        let (command, result) = unsafe {
                            (
                                std::slice::from_raw_parts(
                                    base.add(RegionLayout::COMMAND_OFFSET),
                                    RegionLayout::COMMAND_SIZE,
                                ),
                                std::slice::from_raw_parts_mut(
                                    base.add(RegionLayout::RESULT_OFFSET),
                                    RegionLayout::RESULT_SIZE,
                                ),
                            )
                        };
                        handler(op, command, result);
                        ops.push(op);
                    }
                    fence(Ordering::SeqCst);
                    flag(partition).store(0, Ordering::Release);
                }
                if idle {
                    backoff.snooze();
                } else {
                    backoff.reset();
                }
            }
            ops
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Write a server-info document into a result area
    pub(crate) fn write_info(result: &mut [u8], doc: &str) {
        result[..4].copy_from_slice(&(doc.len() as i32).to_le_bytes());
        result[4..4 + doc.len()].copy_from_slice(doc.as_bytes());
    }

    /// Stop the thread and return the ops partition 0 handled, in order
    pub(crate) fn stop(mut self) -> Vec<OpCode> {
        self.stop.store(true, Ordering::Release);
        self.handle.take().unwrap().join().unwrap()
    }
}

impl Drop for Firmware {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Linear op as decoded from the command area
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LinearCall {
    pub op: OpCode,
    pub rows: usize,
    pub m: usize,
    pub k: usize,
    pub group: i32,
    pub weight: String,
    pub bias: String,
    pub ranges: Vec<QuantRange>,
    pub input: Vec<u8>,
    pub weight_resident: bool,
}

/// Reference linear used by the simulated firmware
///
/// `out[r][c] = min_r + sum(input[r]) + c`, so any misplaced row or column
/// shows up in the output.
pub(crate) fn reference_linear(ranges: &[QuantRange], input: &[u8], m: usize, k: usize) -> Vec<f32> {
    let rows = input.len() / m;
    let mut out = Vec::with_capacity(rows * k);
    for r in 0..rows {
        let sum: u32 = input[r * m..(r + 1) * m].iter().map(|&b| b as u32).sum();
        for c in 0..k {
            out.push(ranges[r].min + sum as f32 + c as f32);
        }
    }
    out
}

/// Decode the JSON descriptor that heads a long message
pub(crate) fn message_descriptor(message: &[u8]) -> Value {
    try_descriptor(message).expect("message starts with a JSON descriptor")
}

fn try_descriptor(message: &[u8]) -> Option<Value> {
    let len = usize::try_from(read_i32(message, 0)?).ok()?;
    serde_json::from_slice(message.get(4..4 + len)?).ok()
}

/// In-memory channel that decodes every request
#[derive(Debug)]
pub(crate) struct MockChannel {
    command: Vec<u8>,
    result: Vec<u8>,
    limit: usize,
    posted: Option<OpCode>,
    partial: Vec<u8>,
    pub launches: Vec<OpCode>,
    pub chunks: Vec<Vec<u8>>,
    pub messages: Vec<Vec<u8>>,
    pub linear_calls: Vec<LinearCall>,
    pub resident: BTreeSet<String>,
    pub fail_waits: bool,
}

impl MockChannel {
    /// Channel whose command area holds exactly one full chunk
    pub(crate) fn new(limit: usize) -> Self {
        Self::with_result_size(limit, limit)
    }

    pub(crate) fn with_result_size(limit: usize, result_size: usize) -> Self {
        Self {
            command: vec![0; limit + 4],
            result: vec![0; result_size],
            limit,
            posted: None,
            partial: Vec::new(),
            launches: Vec::new(),
            chunks: Vec::new(),
            messages: Vec::new(),
            linear_calls: Vec::new(),
            resident: BTreeSet::new(),
            fail_waits: false,
        }
    }

    /// `op` field of every completed long message
    pub(crate) fn message_ops(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|m| message_descriptor(m)["op"].as_str().unwrap().to_string())
            .collect()
    }

    fn finish_message(&mut self) {
        let message = std::mem::take(&mut self.partial);
        // Raw transport tests send payloads that are not registry messages.
        if let Some(descriptor) = try_descriptor(&message) {
            let name = descriptor["dataName"].as_str().unwrap_or_default().to_string();
            match descriptor["op"].as_str() {
                Some("registerData") => {
                    self.resident.insert(name);
                }
                Some("unregisterData") => {
                    self.resident.remove(&name);
                }
                _ => {}
            }
        }
        self.messages.push(message);
    }

    fn run_linear(&mut self, op: OpCode) {
        let word = |i: usize| read_i32(&self.command, i * 4).unwrap();
        let (rows, m, k) = (word(0) as usize, word(1) as usize, word(2) as usize);
        let group = word(3);
        let (wlen, blen) = (word(4) as usize, word(5) as usize);
        assert!(
            (6..10).all(|i| word(i) == 0),
            "reserved header words must be zero"
        );

        let mut pos = 40;
        let ranges: Vec<QuantRange> = (0..rows)
            .map(|r| {
                let at = pos + r * 8;
                QuantRange::new(
                    read_f32(&self.command, at).unwrap(),
                    read_f32(&self.command, at + 4).unwrap(),
                )
            })
            .collect();
        pos += rows * 8;
        let weight = String::from_utf8(self.command[pos..pos + wlen].to_vec()).unwrap();
        pos += wlen;
        let bias = String::from_utf8(self.command[pos..pos + blen].to_vec()).unwrap();
        pos += blen;
        let input = self.command[pos..pos + rows * m].to_vec();
        assert!(pos + rows * m <= self.limit + 4);

        let out = reference_linear(&ranges, &input, m, k);
        for (i, value) in out.iter().enumerate() {
            self.result[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }

        let weight_resident = self.resident.contains(&weight);
        self.linear_calls.push(LinearCall {
            op,
            rows,
            m,
            k,
            group,
            weight,
            bias,
            ranges,
            input,
            weight_resident,
        });
    }
}

impl Channel for MockChannel {
    fn command_area(&mut self) -> &mut [u8] {
        &mut self.command
    }

    fn result_area(&self) -> &[u8] {
        &self.result
    }

    fn transfer_limit(&self) -> usize {
        self.limit
    }

    fn launch(&mut self, op: OpCode) {
        assert!(self.posted.is_none(), "launch while {:?} is in flight", self.posted);
        self.launches.push(op);
        self.posted = Some(op);
    }

    fn wait(&mut self) -> Result<()> {
        let op = self
            .posted
            .take()
            .ok_or_else(|| TfaccError::internal("wait without a launch"))?;
        if self.fail_waits {
            return Err(TfaccError::timeout("simulated hung partition"));
        }

        match op {
            OpCode::StartLongData => {
                let len = read_i32(&self.command, 0).unwrap() as usize;
                assert!(len <= self.limit, "chunk of {len} exceeds limit {}", self.limit);
                let chunk = self.command[4..4 + len].to_vec();
                self.partial.extend_from_slice(&chunk);
                self.chunks.push(chunk);
            }
            OpCode::FinishLongData => self.finish_message(),
            OpCode::LinearInt4NoZero | OpCode::LinearInt8 => self.run_linear(op),
            OpCode::GetComputeServerInfo => {
                Firmware::write_info(&mut self.result, r#"{"numacnt": 4}"#);
            }
        }
        Ok(())
    }
}
