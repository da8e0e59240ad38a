//! Recording and replay of multiplexed, time-stamped sensor packets.
//!
//! A packet stream ("pango" file) is an append-only log that interleaves
//! packets from any number of sources. The stream describes itself: a JSON
//! header, one JSON registration per source, and a footer index that maps
//! every packet to its byte offset so readers can seek in constant time.
//! Streams can also be written into a named pipe for live consumers.
//!
//! # Features
//!
//! - **Writer**: thread-safe appends, background flushing, sync beacons
//! - **Reader**: random access by frame or capture time, index rebuild for
//!   truncated recordings, resynchronisation after corruption
//! - **Playback**: real-time (or faster) replay to async subscribers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use packetstream::{PacketStream, PacketStreamSource};
//!
//! fn main() -> packetstream::Result<()> {
//!     let writer = PacketStream::create("capture.pango")?;
//!     let mut imu = PacketStreamSource::fixed_size("imu", 24);
//!     let imu_id = writer.add_source(&mut imu)?;
//!     writer.write_source_packet(imu_id, &[0u8; 24], 1_000, None)?;
//!     writer.close()?;
//!
//!     let reader = PacketStream::open("capture.pango")?;
//!     while let Some(packet) = reader.read_packet(imu_id)? {
//!         println!("{} bytes at {}us", packet.len(), packet.time_us);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Example (playback)
//!
//! ```rust,no_run
//! use packetstream::{PacketStream, UpdateRate};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = PacketStream::play("capture.pango").await?;
//!     let mut packets = connection.subscribe(None, UpdateRate::Max(30));
//!
//!     while let Some(packet) = packets.next().await {
//!         println!("source {} packet {}", packet.source, packet.sequence);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
pub mod format;
pub mod index;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Recording and random access
pub mod reader;
mod sink;
pub mod writer;

// Stream-based playback architecture
pub mod connection;
pub mod driver;
pub mod provider;
pub mod providers;
pub mod stream;
pub mod sync_time;

// Core exports
pub use error::*;
pub use types::*;

pub use index::{PacketIndex, PacketIndexEntry};
pub use reader::{PacketStreamReader, ReaderOptions, SourcePacket};
pub use writer::{PacketStreamWriter, WriterOptions};

// Main API exports
pub use connection::PlaybackConnection;
pub use providers::PlaybackOptions;

use std::path::Path;

/// Unified entry point for packet stream recordings.
///
/// # Examples
///
/// ```rust,no_run
/// use packetstream::PacketStream;
///
/// fn main() -> packetstream::Result<()> {
///     let writer = PacketStream::create("session.pango")?;
///     // Register sources and write packets...
///     writer.close()
/// }
/// ```
pub struct PacketStream;

impl PacketStream {
    /// Create (or truncate) a recording with default writer options.
    ///
    /// If `path` is a named pipe the writer streams into it instead; see
    /// [`PacketStreamWriter`] for the pipe behaviour.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or the header cannot be
    /// written.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<PacketStreamWriter> {
        PacketStreamWriter::create(path, WriterOptions::default())
    }

    /// Open a recording for random access.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File does not exist or is not readable
    /// - File does not start with a packet stream header
    /// - The header or a source registration is corrupted
    pub fn open<P: AsRef<Path>>(path: P) -> Result<PacketStreamReader> {
        PacketStreamReader::open(path, ReaderOptions::default())
    }

    /// Open a recording and start real-time playback.
    ///
    /// ```rust,no_run
    /// use packetstream::PacketStream;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> packetstream::Result<()> {
    /// let connection = PacketStream::play("race.pango").await?;
    /// connection.set_speed(2.0);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn play<P: AsRef<Path>>(path: P) -> Result<PlaybackConnection> {
        PlaybackConnection::open(path, PlaybackOptions::default()).await
    }
}
