//! JSON records carried by `LIN` and `STA` frames

use serde::{Deserialize, Serialize};

use super::Tag;
use crate::index::PacketIndex;

/// Stream header written after the magic (`LIN` frame).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHeader {
    /// Version of the library that produced the stream
    #[serde(default)]
    pub pangolin_version: String,

    /// Wall-clock time the stream was opened, microseconds since the Unix epoch
    #[serde(default)]
    pub time_us: i64,

    /// Human readable local creation time
    #[serde(default)]
    pub date_created: String,

    /// Byte order of fixed-width integers, always `little_endian`
    #[serde(default = "little_endian")]
    pub endian: String,
}

fn little_endian() -> String {
    "little_endian".to_string()
}

impl StreamHeader {
    /// Header stamped with the current time.
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            pangolin_version: env!("CARGO_PKG_VERSION").to_string(),
            time_us: now.timestamp_micros(),
            date_created: now.format("%Y-%m-%d %X").to_string(),
            endian: little_endian(),
        }
    }
}

/// Statistics block written at close (`STA` frame).
///
/// `src_packet_index[source][frame]` is the byte offset of that packet's frame
/// (its `JSN` frame when metadata precedes it) and `src_packet_times` holds the
/// matching capture times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub num_sources: usize,
    #[serde(default)]
    pub src_packet_index: Vec<Vec<u64>>,
    #[serde(default)]
    pub src_packet_times: Vec<Vec<i64>>,
}

impl SourceStats {
    /// Snapshot an index covering `num_sources` sources.
    pub fn from_index(index: &PacketIndex, num_sources: usize) -> Self {
        let (src_packet_index, src_packet_times) = index.to_serializable(num_sources);
        Self { num_sources, src_packet_index, src_packet_times }
    }

    /// Whether both arrays are present and agree in shape.
    pub fn is_consistent(&self) -> bool {
        self.src_packet_index.len() == self.src_packet_times.len()
            && self.src_packet_index.len() >= self.num_sources
            && self
                .src_packet_index
                .iter()
                .zip(&self.src_packet_times)
                .all(|(offsets, times)| offsets.len() == times.len())
    }

    /// Append the complete footer (`STA` block then `FTR` pointer) to `buf`.
    ///
    /// `sta_offset` is the absolute stream offset the `STA` tag will land at.
    pub fn encode_footer(&self, sta_offset: u64, buf: &mut Vec<u8>) -> serde_json::Result<()> {
        buf.extend_from_slice(Tag::Stats.as_bytes());
        serde_json::to_writer(&mut *buf, self)?;
        buf.extend_from_slice(Tag::Footer.as_bytes());
        buf.extend_from_slice(&sta_offset.to_le_bytes());
        Ok(())
    }
}
