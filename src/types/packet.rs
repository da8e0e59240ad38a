//! Packets read back from a stream

use serde_json::Value;
use std::sync::Arc;

use super::SourceId;

/// One timestamped payload belonging to a source.
///
/// This is the unit handed from the reader to consumers and through the
/// playback channels. The payload is shared via `Arc` so broadcasting a packet
/// to several subscribers never copies it.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Source the packet belongs to
    pub source: SourceId,

    /// Position of the packet within its source, starting at 0
    pub sequence: usize,

    /// Capture time in microseconds
    pub time_us: i64,

    /// Metadata written with the packet, if any
    pub meta: Option<Value>,

    /// Raw payload bytes
    pub data: Arc<[u8]>,
}

impl Packet {
    pub fn new(
        source: SourceId,
        sequence: usize,
        time_us: i64,
        meta: Option<Value>,
        data: Vec<u8>,
    ) -> Self {
        Self { source, sequence, time_us, meta, data: data.into() }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
