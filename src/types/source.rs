//! Source descriptors (`SRC` frames)

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Index of a source within its stream.
pub type SourceId = usize;

/// Identity and contract of one logical channel in a packet stream.
///
/// `id` is assigned by the writer from the source's position in its source
/// table. `data_size_bytes == 0` declares variable length packets, each
/// prefixed by its length; any other value fixes the size of every packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SourceRecord", into = "SourceRecord")]
pub struct PacketStreamSource {
    pub driver: String,
    pub id: SourceId,
    pub uri: String,
    pub info: Value,
    pub version: i64,
    pub data_alignment_bytes: i64,
    pub data_definitions: String,
    pub data_size_bytes: usize,
}

impl Default for PacketStreamSource {
    fn default() -> Self {
        Self {
            driver: String::new(),
            id: 0,
            uri: String::new(),
            info: Value::Null,
            version: 1,
            data_alignment_bytes: 1,
            data_definitions: String::new(),
            data_size_bytes: 0,
        }
    }
}

impl PacketStreamSource {
    /// Source with variable length packets.
    pub fn variable(driver: impl Into<String>) -> Self {
        Self { driver: driver.into(), ..Self::default() }
    }

    /// Source whose packets are all exactly `size_bytes` long.
    pub fn fixed_size(driver: impl Into<String>, size_bytes: usize) -> Self {
        Self {
            driver: driver.into(),
            data_size_bytes: size_bytes,
            data_definitions: format!("struct Frame{{ uint8 stream_data[{}];}};", size_bytes),
            ..Self::default()
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_info(mut self, info: Value) -> Self {
        self.info = info;
        self
    }

    pub fn with_definitions(mut self, definitions: impl Into<String>) -> Self {
        self.data_definitions = definitions.into();
        self
    }

    /// Whether packets carry an explicit length prefix.
    pub fn is_variable_size(&self) -> bool {
        self.data_size_bytes == 0
    }
}

/// Wire layout of a source descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SourceRecord {
    driver: String,
    id: SourceId,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    info: Value,
    #[serde(default)]
    version: i64,
    packet: PacketLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PacketLayout {
    #[serde(default)]
    alignment_bytes: i64,
    #[serde(default)]
    definitions: String,
    size_bytes: usize,
}

impl From<SourceRecord> for PacketStreamSource {
    fn from(record: SourceRecord) -> Self {
        Self {
            driver: record.driver,
            id: record.id,
            uri: record.uri,
            info: record.info,
            version: record.version,
            data_alignment_bytes: record.packet.alignment_bytes,
            data_definitions: record.packet.definitions,
            data_size_bytes: record.packet.size_bytes,
        }
    }
}

impl From<PacketStreamSource> for SourceRecord {
    fn from(source: PacketStreamSource) -> Self {
        Self {
            driver: source.driver,
            id: source.id,
            uri: source.uri,
            info: source.info,
            version: source.version,
            packet: PacketLayout {
                alignment_bytes: source.data_alignment_bytes,
                definitions: source.data_definitions,
                size_bytes: source.data_size_bytes,
            },
        }
    }
}
