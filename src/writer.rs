//! Packet stream writer
//!
//! Serialises the stream header, source registrations, per-packet metadata,
//! data packets, sync beacons and the closing footer into a file or named
//! pipe.
//!
//! Every public operation takes the writer's lock once, builds the complete
//! bytes of its frames and hands them to the background sink as a single
//! chunk, so frames from concurrent producers never interleave.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use packetstream::{PacketStreamSource, PacketStreamWriter, WriterOptions};
//!
//! fn record() -> packetstream::Result<()> {
//!     let writer = PacketStreamWriter::create("capture.pango", WriterOptions::default())?;
//!
//!     let mut camera = PacketStreamSource::fixed_size("raw_video", 640 * 480);
//!     let camera_id = writer.add_source(&mut camera)?;
//!
//!     let frame = vec![0u8; 640 * 480];
//!     writer.write_source_packet(camera_id, &frame, 1_000_000, None)?;
//!
//!     writer.close()
//! }
//! ```
//!
//! ## Named pipes
//!
//! When the target path is a FIFO the stream is not indexable and no footer is
//! written. Packets written while no reader is attached are dropped. Once a
//! reader attaches, the header and all registered sources are re-emitted so the
//! reader sees a complete stream from that point on. A reader leaving is
//! noticed when a write fails with a broken pipe, so the packets queued just
//! before that are lost.

use serde::Deserialize;
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, trace, warn};

use crate::format::{
    MAGIC, SYNC_BEACON_LEN, SourceStats, StreamHeader, Tag, encode_varint, write_timestamp,
};
use crate::index::{PacketIndex, PacketIndexEntry};
use crate::sink::{ThreadedSink, pipe};
use crate::types::{PacketStreamSource, SourceId};
use crate::{PacketStreamError, Result};

/// Writer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Bytes that may be queued for the flush thread before writes block
    pub buffer_size_bytes: usize,

    /// Emit a sync beacon automatically after this many data packets
    pub sync_interval_packets: Option<u32>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self { buffer_size_bytes: 100 * 1024 * 1024, sync_interval_packets: None }
    }
}

impl WriterOptions {
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size_bytes = bytes;
        self
    }

    pub fn with_sync_interval(mut self, packets: u32) -> Self {
        self.sync_interval_packets = Some(packets).filter(|&n| n > 0);
        self
    }
}

#[derive(Default)]
struct WriterState {
    /// Target of the current (or pending) stream
    path: Option<PathBuf>,
    options: WriterOptions,
    sink: Option<ThreadedSink>,
    is_pipe: bool,
    sources: Vec<PacketStreamSource>,
    index: PacketIndex,
    /// Stream offset of the next byte to be written
    offset: u64,
    /// Payload bytes written since the stream was opened
    bytes_written: u64,
    packets_since_sync: u32,
}

/// Thread-safe packet stream writer.
///
/// All methods take `&self`; share the writer between producer threads with
/// an `Arc`.
pub struct PacketStreamWriter {
    state: Mutex<WriterState>,
}

impl Default for PacketStreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketStreamWriter {
    /// Writer with no target. Sources added now are emitted on [`open`](Self::open).
    pub fn new() -> Self {
        Self { state: Mutex::new(WriterState::default()) }
    }

    /// Create a writer and open `path`.
    pub fn create<P: AsRef<Path>>(path: P, options: WriterOptions) -> Result<Self> {
        let writer = Self::new();
        writer.open(path, options)?;
        Ok(writer)
    }

    /// Bind the writer to `path`, closing any current stream first.
    ///
    /// Regular files are truncated. For a named pipe without a reader the
    /// stream stays closed and opens as soon as a reader attaches.
    pub fn open<P: AsRef<Path>>(&self, path: P, options: WriterOptions) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let mut state = self.lock();

        state.finish()?;
        state.options = options;
        state.is_pipe = pipe::is_fifo(&path);
        state.path = Some(path.clone());

        if state.is_pipe {
            match pipe::open_fifo_writer(&path)
                .map_err(|e| PacketStreamError::file_error(path.clone(), e))?
            {
                Some(file) => state.start_stream(file)?,
                None => info!("Waiting for a reader on pipe {}", path.display()),
            }
        } else {
            let file =
                File::create(&path).map_err(|e| PacketStreamError::file_error(path.clone(), e))?;
            state.start_stream(file)?;
        }

        Ok(())
    }

    /// Write the footer (for indexable streams) and flush everything to disk.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        let result = state.finish();
        state.path = None;
        result
    }

    /// Close immediately, discarding queued data and skipping the footer.
    pub fn force_close(&self) {
        let mut state = self.lock();
        if let Some(sink) = state.sink.take() {
            debug!("Force closing packet stream");
            sink.abandon();
        }
        state.path = None;
    }

    /// Register `source`, assigning and returning its id.
    ///
    /// The `SRC` frame is written immediately when the stream is open; otherwise
    /// it is emitted with the header on the next open.
    pub fn add_source(&self, source: &mut PacketStreamSource) -> Result<SourceId> {
        let mut state = self.lock();
        state.maintain_pipe();

        let id = state.sources.len();
        source.id = id;
        state.sources.push(source.clone());
        debug!("Registered source {} ({})", id, source.driver);

        if state.sink.is_some() {
            let mut buf = Vec::new();
            encode_source(source, &mut buf)?;
            state.commit(buf)?;
        }

        Ok(id)
    }

    /// Write one packet of `source`, optionally preceded by its metadata.
    ///
    /// `meta` of JSON `null` is treated as no metadata. Fixed-size sources must
    /// receive exactly `data_size_bytes` bytes; nothing is written otherwise.
    pub fn write_source_packet(
        &self,
        source: SourceId,
        data: &[u8],
        time_us: i64,
        meta: Option<&Value>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.maintain_pipe();

        let descriptor = state.sources.get(source).ok_or(PacketStreamError::UnknownSource {
            source_id: source,
            known: state.sources.len(),
        })?;

        if !descriptor.is_variable_size() && descriptor.data_size_bytes != data.len() {
            return Err(PacketStreamError::SizeMismatch {
                source_id: source,
                expected: descriptor.data_size_bytes,
                found: data.len(),
            });
        }

        let meta = match meta {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => {
                return Err(PacketStreamError::InvalidMetadata {
                    details: format!("bare number {} is not self-delimiting", n),
                });
            }
            Some(value) => Some(value),
        };

        if state.sink.is_none() {
            if state.is_pipe && state.path.is_some() {
                trace!("No pipe reader, dropping packet of source {}", source);
                return Ok(());
            }
            return Err(PacketStreamError::Closed);
        }

        let mut buf = Vec::with_capacity(data.len() + 32);
        if let Some(meta) = meta {
            buf.extend_from_slice(Tag::SourceJson.as_bytes());
            encode_varint(source as u64, &mut buf);
            serde_json::to_writer(&mut buf, meta)?;
        }
        buf.extend_from_slice(Tag::SourcePacket.as_bytes());
        write_timestamp(time_us, &mut buf);
        encode_varint(source as u64, &mut buf);
        if descriptor.is_variable_size() {
            encode_varint(data.len() as u64, &mut buf);
        }
        buf.extend_from_slice(data);

        let entry = PacketIndexEntry { offset: state.offset, time_us };
        if !state.commit(buf)? {
            return Ok(());
        }
        state.index.append(source, entry)?;
        state.bytes_written += data.len() as u64;

        if let Some(interval) = state.options.sync_interval_packets {
            state.packets_since_sync += 1;
            if state.packets_since_sync >= interval {
                state.packets_since_sync = 0;
                state.commit(sync_beacon())?;
            }
        }

        Ok(())
    }

    /// Emit a sync beacon readers can scan for to realign.
    pub fn write_sync(&self) -> Result<()> {
        let mut state = self.lock();
        state.maintain_pipe();
        if state.sink.is_none() {
            return Ok(());
        }
        state.commit(sync_beacon())?;
        Ok(())
    }

    /// Registered sources in id order.
    pub fn sources(&self) -> Vec<PacketStreamSource> {
        self.lock().sources.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Whether a footer will be written on close (the target is seekable).
    pub fn is_indexable(&self) -> bool {
        !self.lock().is_pipe
    }

    /// Payload bytes written since the stream was last opened.
    pub fn bytes_written(&self) -> u64 {
        self.lock().bytes_written
    }

    /// Snapshot of the index built for the current stream.
    pub fn index(&self) -> PacketIndex {
        self.lock().index.clone()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PacketStreamWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close packet stream: {}", e);
        }
    }
}

impl WriterState {
    /// Start a fresh stream on `file`: header first, then every known source.
    fn start_stream(&mut self, file: File) -> Result<()> {
        let sink = ThreadedSink::spawn(file, self.options.buffer_size_bytes)
            .map_err(|e| PacketStreamError::io("starting flush thread", e))?;

        self.sink = Some(sink);
        self.offset = 0;
        self.bytes_written = 0;
        self.packets_since_sync = 0;
        self.index.clear();

        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(Tag::Header.as_bytes());
        serde_json::to_writer(&mut buf, &StreamHeader::now())?;
        buf.push(b'\n');
        for source in &self.sources {
            encode_source(source, &mut buf)?;
        }

        self.commit(buf)?;
        Ok(())
    }

    /// Queue `buf` on the sink and advance the stream offset.
    ///
    /// Returns `Ok(false)` when the bytes were dropped because the pipe reader
    /// went away; the writer is then closed until the reader returns.
    fn commit(&mut self, buf: Vec<u8>) -> Result<bool> {
        let Some(sink) = self.sink.as_ref() else {
            return Ok(false);
        };

        let len = buf.len() as u64;
        match sink.commit(buf) {
            Ok(()) => {
                self.offset += len;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                self.disconnect();
                Ok(false)
            }
            Err(e) => Err(PacketStreamError::io("writing packet stream", e)),
        }
    }

    /// Footer (if indexable) and flush. Leaves the writer closed.
    fn finish(&mut self) -> Result<()> {
        if self.sink.is_none() {
            return Ok(());
        }

        if !self.is_pipe {
            let stats = SourceStats::from_index(&self.index, self.sources.len());
            let mut buf = Vec::new();
            stats.encode_footer(self.offset, &mut buf)?;
            self.commit(buf)?;
        }

        match self.sink.take() {
            Some(sink) => sink.close().map_err(|e| PacketStreamError::io("closing packet stream", e)),
            None => Ok(()),
        }
    }

    /// Reader gone: drop the sink but keep the path so the stream can resume.
    fn disconnect(&mut self) {
        if let Some(sink) = self.sink.take() {
            warn!(
                "Pipe reader disconnected after {} bytes, suspending stream",
                self.offset
            );
            sink.abandon();
        }
    }

    /// Detect pipe readers leaving and arriving.
    ///
    /// A departed reader is noticed through the flush thread's broken pipe;
    /// the FIFO is only probed for a new reader while disconnected.
    fn maintain_pipe(&mut self) {
        if !self.is_pipe {
            return;
        }
        let Some(path) = self.path.clone() else {
            return;
        };

        if let Some(sink) = self.sink.as_ref() {
            if !sink.is_pipe_closed() {
                return;
            }
            self.disconnect();
        }

        match pipe::open_fifo_writer(&path) {
            Ok(Some(file)) => {
                info!("Pipe reader attached to {}, restarting stream", path.display());
                if let Err(e) = self.start_stream(file) {
                    warn!("Failed to restart stream on {}: {}", path.display(), e);
                    self.disconnect();
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Pipe {} not writable: {}", path.display(), e),
        }
    }
}

fn encode_source(source: &PacketStreamSource, buf: &mut Vec<u8>) -> Result<()> {
    buf.extend_from_slice(Tag::AddSource.as_bytes());
    serde_json::to_writer(&mut *buf, source)?;
    buf.push(b'\n');
    Ok(())
}

fn sync_beacon() -> Vec<u8> {
    Tag::Sync.as_bytes().repeat(SYNC_BEACON_LEN)
}
