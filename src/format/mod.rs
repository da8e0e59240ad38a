//! Packet stream wire format
//!
//! Defines the framing primitives shared by the writer and the reader.
//!
//! ## Stream Structure
//!
//! ```text
//! Stream := MAGIC("PANGO")
//!           Tag("LIN") JSON(header) '\n'
//!           { Tag("SRC") JSON(source) '\n' }*
//!           { PacketOrMeta }*
//!           [ Tag("STA") JSON(stats) Tag("FTR") u64(offset_of_STA) ]
//!
//! PacketOrMeta := Tag("JSN") varint(source_id) JSON(meta)
//!               | Tag("PKT") i64(timestamp_us) varint(source_id) [varint(len)] bytes(len)
//!               | Tag("SYN")
//! ```
//!
//! All fixed-width integers are little-endian. JSON payloads are parsed in
//! streaming mode, so they must be self-delimiting.

mod codec;
mod header;
mod tag;

pub use codec::{
    MAX_VARINT_LEN, encode_varint, read_timestamp, read_u64_le, read_varint, varint_len,
    write_timestamp,
};
pub use header::{SourceStats, StreamHeader};
pub use tag::{Tag, TagBytes, tag_name};

/// Stream start magic.
pub const MAGIC: &[u8; 5] = b"PANGO";

/// Every tag is exactly this many ASCII bytes.
pub const TAG_LENGTH: usize = 3;

/// Number of consecutive `SYN` tags in one sync beacon.
pub const SYNC_BEACON_LEN: usize = 10;

/// Size of the trailing `FTR` frame: tag plus absolute `STA` offset.
pub const FOOTER_LEN: u64 = (TAG_LENGTH + std::mem::size_of::<u64>()) as u64;
