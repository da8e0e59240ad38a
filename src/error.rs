//! Error types for packet stream processing.
//!
//! All errors implement `std::error::Error` and carry enough context (offsets,
//! source ids, paths) to locate the failure inside a recording.
//!
//! ## Error Categories
//!
//! - **File Errors**: a recording could not be opened, created or flushed
//! - **Framing Errors**: bad magic, unknown or mismatched tags, corrupt frames
//! - **Truncation**: the stream ended inside a frame
//! - **Size Errors**: a fixed-size source received a payload of another length
//! - **Lookup Errors**: unknown source ids, index invariant violations
//!
//! Broken pipes and out-of-range seeks are handled internally and never
//! surface through this type.
//!
//! ## Recovery
//!
//! ```rust
//! use packetstream::PacketStreamError;
//!
//! let error = PacketStreamError::corrupt(1024, "metadata precedes packet of another source");
//! assert!(error.is_corruption());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::types::SourceId;

/// Result type alias for packet stream operations.
pub type Result<T, E = PacketStreamError> = std::result::Result<T, E>;

/// Main error type for packet stream operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PacketStreamError {
    #[error("Packet stream file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error during {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognised stream header: expected \"PANGO\", found {found:?}")]
    BadMagic { found: Vec<u8> },

    #[error("Tag mismatch at offset {offset}: expected '{expected}', found '{found}'")]
    TagMismatch { expected: String, found: String, offset: u64 },

    #[error("Unknown tag {found:?} at offset {offset}")]
    UnknownTag { found: String, offset: u64 },

    #[error("Stream truncated while reading {context}")]
    Truncated { context: String },

    #[error("Corrupt stream at offset {offset}: {details}")]
    Corrupt { offset: u64, details: String },

    #[error("Source {source_id} expects fixed {expected} byte packets, got {found} bytes")]
    SizeMismatch { source_id: SourceId, expected: usize, found: usize },

    #[error("Unknown source id {source_id} ({known} sources registered)")]
    UnknownSource { source_id: SourceId, known: usize },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Invalid packet metadata: {details}")]
    InvalidMetadata { details: String },

    #[error("{operation} requires a seekable stream")]
    NotSeekable { operation: String },

    #[error("Packet index error: {details}")]
    Index { details: String },

    #[error("Packet stream writer is closed")]
    Closed,
}

impl PacketStreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PacketStreamError::Io { .. } => true,
            PacketStreamError::Truncated { .. } => true,
            PacketStreamError::Closed => true,
            PacketStreamError::File { .. } => false,
            PacketStreamError::BadMagic { .. } => false,
            PacketStreamError::TagMismatch { .. } => false,
            PacketStreamError::UnknownTag { .. } => false,
            PacketStreamError::Corrupt { .. } => false,
            PacketStreamError::SizeMismatch { .. } => false,
            PacketStreamError::UnknownSource { .. } => false,
            PacketStreamError::Parse { .. } => false,
            PacketStreamError::InvalidMetadata { .. } => false,
            PacketStreamError::NotSeekable { .. } => false,
            PacketStreamError::Index { .. } => false,
        }
    }

    /// Returns whether the stream framing is broken from this point on.
    ///
    /// A reader that hits one of these may call
    /// [`PacketStreamReader::resync`](crate::PacketStreamReader::resync) to
    /// search for the next sync beacon.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PacketStreamError::TagMismatch { .. }
                | PacketStreamError::UnknownTag { .. }
                | PacketStreamError::Corrupt { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PacketStreamError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check directory permissions when creating recordings",
                "Ensure sufficient disk space",
            ],
            PacketStreamError::Io { .. } => vec![
                "Retry the operation",
                "Check the underlying device or pipe is still available",
            ],
            PacketStreamError::BadMagic { .. } => vec![
                "Verify the file is a packet stream recording",
                "Check the file was not truncated at the start",
            ],
            PacketStreamError::TagMismatch { .. }
            | PacketStreamError::UnknownTag { .. }
            | PacketStreamError::Corrupt { .. } => vec![
                "Call resync() to skip to the next sync beacon",
                "Reopen the recording and seek past the damaged region",
                "Run fix_file_index() to rebuild a damaged footer",
            ],
            PacketStreamError::Truncated { .. } => vec![
                "Wait for the producer to append more data",
                "Run fix_file_index() to drop the partial trailing frame",
            ],
            PacketStreamError::SizeMismatch { .. } => vec![
                "Register the source with size_bytes = 0 for variable length packets",
                "Check the producer emits the declared packet size",
            ],
            PacketStreamError::UnknownSource { .. } => vec![
                "Register the source with add_source() before writing",
                "Use sources() to list the ids present in the recording",
            ],
            PacketStreamError::Parse { .. } => vec![
                "Verify source data integrity",
                "Check the recording was produced by a compatible writer",
            ],
            PacketStreamError::InvalidMetadata { .. } => vec![
                "Wrap scalar metadata in a JSON object",
                "Pass None instead of JSON null",
            ],
            PacketStreamError::NotSeekable { .. } => vec![
                "Record to a regular file for random access",
                "Read named pipes strictly forward",
            ],
            PacketStreamError::Index { .. } => vec![
                "Append index entries in frame order",
                "Rebuild the index with fix_file_index()",
            ],
            PacketStreamError::Closed => vec![
                "Open the writer before writing packets",
                "Wait for the pipe reader to reconnect",
            ],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        PacketStreamError::File { path, source }
    }

    /// Helper constructor for I/O errors with an operation label.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        PacketStreamError::Io { operation: operation.into(), source }
    }

    /// Helper constructor for corrupt framing.
    pub fn corrupt(offset: u64, details: impl Into<String>) -> Self {
        PacketStreamError::Corrupt { offset, details: details.into() }
    }

    /// Helper constructor for truncated reads.
    pub fn truncated(context: impl Into<String>) -> Self {
        PacketStreamError::Truncated { context: context.into() }
    }

    /// Helper constructor for parse failures.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        PacketStreamError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for operations that need random access.
    pub fn not_seekable(operation: impl Into<String>) -> Self {
        PacketStreamError::NotSeekable { operation: operation.into() }
    }
}

impl From<std::io::Error> for PacketStreamError {
    fn from(err: std::io::Error) -> Self {
        PacketStreamError::Io { operation: "unknown".to_string(), source: err }
    }
}

impl From<serde_json::Error> for PacketStreamError {
    fn from(err: serde_json::Error) -> Self {
        PacketStreamError::Parse { context: "JSON".to_string(), details: err.to_string() }
    }
}
