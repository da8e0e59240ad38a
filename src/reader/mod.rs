//! Packet stream reader
//!
//! Parses the stream header and source registrations, resolves the packet
//! index and provides per-source sequential reads and random-access seeks.
//!
//! ## Index resolution
//!
//! For regular files the reader first tries the footer: the last 11 bytes hold
//! an `FTR` tag and the offset of the `STA` block, which carries every packet
//! offset. When the footer is missing or damaged (a crashed writer, a file still
//! being written) the index is rebuilt by a forward scan. Named pipes are read
//! strictly forward and indexed as packets go by.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use packetstream::{PacketStreamReader, ReaderOptions};
//!
//! fn replay() -> packetstream::Result<()> {
//!     let reader = PacketStreamReader::open("capture.pango", ReaderOptions::default())?;
//!     println!("{} packets on source 0", reader.get_num_packets(0)?);
//!
//!     reader.seek(0, 10)?;
//!     if let Some(mut packet) = reader.read_to_source_packet_and_lock(0)? {
//!         let mut frame = vec![0u8; packet.size()];
//!         packet.read(&mut frame)?;
//!         println!("frame {} captured at {}us", packet.sequence(), packet.time_us());
//!     }
//!     Ok(())
//! }
//! ```

mod stream;

use serde::Deserialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

use crate::format::{
    FOOTER_LEN, MAGIC, SourceStats, StreamHeader, Tag, TagBytes, read_timestamp, read_u64_le,
    read_varint, tag_name,
};
use crate::index::{PacketIndex, PacketIndexEntry};
use crate::types::{Packet, PacketStreamSource, SourceId};
use crate::{PacketStreamError, Result};
use stream::TagStream;

/// Reader configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Load the index from the footer when one is present
    pub use_footer_index: bool,

    /// Scan the whole file at open when no usable footer exists
    pub rebuild_missing_index: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self { use_footer_index: true, rebuild_missing_index: true }
    }
}

/// Packet whose frame header has been parsed but whose payload is unread.
#[derive(Debug, Clone)]
struct PendingPacket {
    /// Offset of the packet's first frame
    offset: u64,
    source: SourceId,
    sequence: usize,
    time_us: i64,
    meta: Option<Value>,
    size: usize,
    remaining: usize,
}

struct ReaderState {
    stream: TagStream,
    path: PathBuf,
    header: StreamHeader,
    sources: Vec<PacketStreamSource>,
    index: PacketIndex,
    /// Sequence number the next packet of each source will get
    next_seq: Vec<usize>,
    /// Every packet starting before this offset is indexed
    frontier: u64,
    data_start: u64,
    footer_loaded: bool,
    /// Frontier at which the last scan stopped on corrupt framing
    scan_halted: Option<u64>,
    pending: Option<PendingPacket>,
}

/// Reader over a packet stream file or named pipe.
///
/// There is one read cursor shared by all sources. Reads hold the reader's
/// lock for as long as the returned [`SourcePacket`] lives, so a concurrent
/// [`seek`](Self::seek) cannot move the cursor under a payload copy.
pub struct PacketStreamReader {
    state: Mutex<ReaderState>,
}

impl PacketStreamReader {
    /// Open a recording or named pipe.
    ///
    /// Opening a pipe blocks until a writer attaches.
    pub fn open<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| PacketStreamError::file_error(path.clone(), e))?;
        let seekable = file
            .metadata()
            .map_err(|e| PacketStreamError::file_error(path.clone(), e))?
            .is_file();

        let mut stream = TagStream::new(file, seekable);
        let mut magic = [0u8; 5];
        stream.read_exact(&mut magic).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => PacketStreamError::BadMagic { found: Vec::new() },
            _ => PacketStreamError::io("reading stream magic", e),
        })?;
        if &magic != MAGIC {
            return Err(PacketStreamError::BadMagic { found: magic.to_vec() });
        }

        let mut state = ReaderState {
            stream,
            path,
            header: StreamHeader::now(),
            sources: Vec::new(),
            index: PacketIndex::new(),
            next_seq: Vec::new(),
            frontier: 0,
            data_start: 0,
            footer_loaded: false,
            scan_halted: None,
            pending: None,
        };

        state.expect_tag(Tag::Header)?;
        state.read_header()?;
        while let Some(tag) = state.stream.read_tag().map_err(|e| frame_error(e, "tag", 0))? {
            if Tag::from_bytes(tag) != Some(Tag::AddSource) {
                state.stream.unread_tag(tag);
                break;
            }
            state.read_source()?;
        }

        state.data_start = state.stream.position();
        state.frontier = state.data_start;
        debug!(
            "Opened {} with {} sources, data at offset {}",
            state.path.display(),
            state.sources.len(),
            state.data_start
        );

        if seekable {
            if options.use_footer_index {
                match state.load_footer() {
                    Ok(true) => {}
                    Ok(false) => debug!("No usable footer in {}", state.path.display()),
                    Err(e) => warn!("Ignoring damaged footer in {}: {}", state.path.display(), e),
                }
            }
            if !state.footer_loaded && options.rebuild_missing_index {
                info!("Rebuilding packet index of {} by scanning", state.path.display());
                state.extend_index()?;
            }
        }

        Ok(Self { state: Mutex::new(state) })
    }

    /// Advance to the next packet of `source` and lock the reader around it.
    ///
    /// Packets of other sources are skipped. Returns `None` at the end of the
    /// stream; a truncated trailing frame also ends the stream.
    pub fn read_to_source_packet_and_lock(
        &self,
        source: SourceId,
    ) -> Result<Option<SourcePacket<'_>>> {
        let mut state = self.lock();
        state.check_source(source)?;

        loop {
            match state.advance()? {
                None => return Ok(None),
                Some(packet) if packet.source == source => {
                    return Ok(Some(SourcePacket { state, packet }));
                }
                Some(_) => state.skip_pending()?,
            }
        }
    }

    /// Read the next packet of `source` into an owned [`Packet`].
    pub fn read_packet(&self, source: SourceId) -> Result<Option<Packet>> {
        match self.read_to_source_packet_and_lock(source)? {
            Some(mut locked) => {
                let data = locked.read_to_vec()?;
                let packet = locked.to_packet(data);
                locked.release()?;
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    /// Read the next packet of any source.
    pub fn next_packet(&self) -> Result<Option<Packet>> {
        let mut state = self.lock();
        let Some(pending) = state.advance()? else {
            return Ok(None);
        };

        let mut data = vec![0u8; pending.remaining];
        state.read_payload(&mut data)?;
        state.pending = None;

        Ok(Some(Packet::new(pending.source, pending.sequence, pending.time_us, pending.meta, data)))
    }

    /// Position the cursor so the next read of `source` returns `frame`.
    ///
    /// `frame` is clamped to the packets of `source`; the frame actually
    /// selected is returned. A source without packets returns 0 and leaves the
    /// cursor where it is. Corrupt bytes past the last good packet only limit
    /// the range.
    ///
    /// Pipes can only move forward. A target past the end of a pipe consumes
    /// the rest of the stream and returns the last frame seen, which can no
    /// longer be read.
    pub fn seek(&self, source: SourceId, frame: i64) -> Result<usize> {
        let mut state = self.lock();
        state.check_source(source)?;
        state.seek(source, frame)
    }

    /// Seek `source` to its first packet captured at or after `time_us`.
    ///
    /// When no such packet exists the cursor does not move and the current
    /// packet index is returned.
    pub fn seek_time(&self, source: SourceId, time_us: i64) -> Result<usize> {
        let mut state = self.lock();
        state.check_source(source)?;

        let mut found = state.index.frame_at_or_after(source, time_us);
        if found.is_none() && state.stream.is_seekable() {
            state.extend_index()?;
            found = state.index.frame_at_or_after(source, time_us);
        }

        match found {
            Some(frame) => state.seek(source, frame as i64),
            None => Ok(state.packet_index(source)),
        }
    }

    /// Index of the packet of `source` the next read will return.
    pub fn get_packet_index(&self, source: SourceId) -> Result<usize> {
        let state = self.lock();
        state.check_source(source)?;
        Ok(state.packet_index(source))
    }

    /// Number of packets of `source` known so far.
    ///
    /// For seekable files this is the total; for pipes it grows as the stream
    /// is read.
    pub fn get_num_packets(&self, source: SourceId) -> Result<usize> {
        let state = self.lock();
        state.check_source(source)?;
        Ok(state.index.packet_count(source).unwrap_or(0))
    }

    /// Skip forward to the next sync beacon after framing corruption.
    ///
    /// Scans byte by byte for a `SYN` tag, consumes the whole run of
    /// consecutive `SYN` tags and leaves the cursor on the following frame.
    /// Returns `false` if the stream ends first. Packets skipped this way are
    /// not indexed.
    pub fn resync(&self) -> Result<bool> {
        let mut state = self.lock();
        state.pending = None;
        let from = state.stream.position();

        let found = state
            .stream
            .find(Tag::Sync.as_bytes())
            .map_err(|e| PacketStreamError::io("scanning for sync beacon", e))?;
        if !found {
            warn!("No sync beacon after offset {}", from);
            return Ok(false);
        }

        while let Ok(Some(tag)) = state.stream.read_tag() {
            if Tag::from_bytes(tag) != Some(Tag::Sync) {
                state.stream.unread_tag(tag);
                break;
            }
        }

        warn!(
            "Resynchronised at offset {} after skipping {} bytes",
            state.stream.position(),
            state.stream.position() - from
        );
        Ok(true)
    }

    /// Rebuild and append a footer to a file that lacks a valid one.
    ///
    /// Any trailing partial frame or damaged footer is truncated away first. A
    /// file that already has a valid footer is left untouched.
    pub fn fix_file_index(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.stream.is_seekable() {
            return Err(PacketStreamError::not_seekable("fix_file_index"));
        }
        if state.footer_loaded {
            debug!("{} already has a valid footer", state.path.display());
            return Ok(());
        }

        state.scan_to_end()?;
        let sta_offset = state.frontier;
        let stats = SourceStats::from_index(&state.index, state.sources.len());
        let mut footer = Vec::new();
        stats.encode_footer(sta_offset, &mut footer)?;

        let path = state.path.clone();
        let fix = |path: &Path| -> io::Result<()> {
            let mut file = OpenOptions::new().write(true).open(path)?;
            file.set_len(sta_offset)?;
            file.seek(SeekFrom::Start(sta_offset))?;
            file.write_all(&footer)?;
            file.sync_all()
        };
        fix(&path).map_err(|e| PacketStreamError::file_error(path.clone(), e))?;

        // Drop buffered bytes from before the rewrite
        let position = state.stream.position().min(sta_offset);
        state.seek_cursor(position)?;
        state.footer_loaded = true;
        info!(
            "Wrote footer for {} packets at offset {} of {}",
            state.index.total_packets(),
            sta_offset,
            path.display()
        );
        Ok(())
    }

    /// Packet rate of `source` estimated from capture times.
    pub fn source_rate_hz(&self, source: SourceId) -> Option<f64> {
        let state = self.lock();
        let entries = state.index.entries(source);
        let (first, last) = (entries.first()?, entries.last()?);
        let span_us = last.time_us.checked_sub(first.time_us)?;
        if entries.len() < 2 || span_us <= 0 {
            return None;
        }
        Some((entries.len() - 1) as f64 * 1_000_000.0 / span_us as f64)
    }

    /// Sources registered so far, in id order.
    pub fn sources(&self) -> Vec<PacketStreamSource> {
        self.lock().sources.clone()
    }

    /// The stream header.
    pub fn header(&self) -> StreamHeader {
        self.lock().header.clone()
    }

    /// Snapshot of the packet index.
    pub fn index(&self) -> PacketIndex {
        self.lock().index.clone()
    }

    pub fn is_seekable(&self) -> bool {
        self.lock().stream.is_seekable()
    }

    /// Whether the index came from the footer.
    pub fn has_footer_index(&self) -> bool {
        self.lock().footer_loaded
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A located packet, holding the reader's lock until released or dropped.
///
/// Dropping the guard skips whatever part of the payload was not read.
pub struct SourcePacket<'a> {
    state: MutexGuard<'a, ReaderState>,
    packet: PendingPacket,
}

impl SourcePacket<'_> {
    pub fn source(&self) -> SourceId {
        self.packet.source
    }

    /// Position of the packet within its source.
    pub fn sequence(&self) -> usize {
        self.packet.sequence
    }

    pub fn time_us(&self) -> i64 {
        self.packet.time_us
    }

    pub fn meta(&self) -> Option<&Value> {
        self.packet.meta.as_ref()
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.packet.size
    }

    /// Copy up to `buf.len()` payload bytes, returning how many were copied.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.state.pending.as_ref().map_or(0, |p| p.remaining);
        let n = buf.len().min(remaining);
        self.state.read_payload(&mut buf[..n])?;
        Ok(n)
    }

    /// Copy the rest of the payload.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let remaining = self.state.pending.as_ref().map_or(0, |p| p.remaining);
        let mut data = vec![0u8; remaining];
        self.state.read_payload(&mut data)?;
        Ok(data)
    }

    /// Skip any unread payload and release the lock.
    pub fn release(mut self) -> Result<()> {
        self.state.skip_pending()
    }

    fn to_packet(&self, data: Vec<u8>) -> Packet {
        Packet::new(
            self.packet.source,
            self.packet.sequence,
            self.packet.time_us,
            self.packet.meta.clone(),
            data,
        )
    }
}

impl Drop for SourcePacket<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.state.skip_pending() {
            warn!("Failed to skip unread payload: {}", e);
        }
    }
}

/// Outcome of reading one frame.
enum Frame {
    Packet(PendingPacket),
    Skipped,
    End,
}

impl ReaderState {
    fn check_source(&self, source: SourceId) -> Result<()> {
        if source < self.sources.len() {
            Ok(())
        } else {
            Err(PacketStreamError::UnknownSource { source_id: source, known: self.sources.len() })
        }
    }

    fn packet_index(&self, source: SourceId) -> usize {
        let next = self.next_seq.get(source).copied().unwrap_or(0);
        match &self.pending {
            Some(pending) if pending.source == source => next.saturating_sub(1),
            _ => next,
        }
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let offset = self.stream.position();
        match self.stream.read_tag().map_err(|e| frame_error(e, "tag", offset))? {
            Some(tag) if Tag::from_bytes(tag) == Some(expected) => Ok(()),
            Some(tag) => Err(PacketStreamError::TagMismatch {
                expected: expected.to_string(),
                found: tag_name(&tag),
                offset,
            }),
            None => Err(PacketStreamError::truncated(format!("{} frame", expected))),
        }
    }

    fn read_header(&mut self) -> Result<()> {
        let offset = self.stream.position();
        self.header = self.stream.read_json().map_err(|e| json_error(e, "stream header", offset))?;
        self.stream.skip_newline().map_err(|e| frame_error(e, "stream header", offset))?;
        trace!("Stream header: {:?}", self.header);
        Ok(())
    }

    fn read_source(&mut self) -> Result<()> {
        let offset = self.stream.position();
        let source: PacketStreamSource =
            self.stream.read_json().map_err(|e| json_error(e, "source descriptor", offset))?;
        self.stream.skip_newline().map_err(|e| frame_error(e, "source descriptor", offset))?;

        let id = source.id;
        match id.cmp(&self.sources.len()) {
            std::cmp::Ordering::Less => {
                // Re-emitted after a writer restart
                if self.sources[id].data_size_bytes != source.data_size_bytes {
                    warn!("Source {} re-registered with a different packet size", id);
                }
                self.sources[id] = source;
            }
            std::cmp::Ordering::Equal => {
                debug!("Source {}: {} ({})", id, source.driver, source.uri);
                self.sources.push(source);
                self.next_seq.push(0);
            }
            std::cmp::Ordering::Greater => {
                return Err(PacketStreamError::corrupt(
                    offset,
                    format!("source id {} skips ids after {}", id, self.sources.len()),
                ));
            }
        }
        Ok(())
    }

    /// The pending packet, or the next one in the stream.
    fn advance(&mut self) -> Result<Option<PendingPacket>> {
        if let Some(pending) = &self.pending {
            return Ok(Some(pending.clone()));
        }

        loop {
            let start = self.stream.position();
            match self.read_frame(start) {
                Ok(Frame::Packet(packet)) => {
                    self.pending = Some(packet.clone());
                    return Ok(Some(packet));
                }
                Ok(Frame::Skipped) => {
                    let end = self.stream.position();
                    self.extend_frontier(start, end);
                }
                Ok(Frame::End) => {
                    self.rewind(start);
                    return Ok(None);
                }
                Err(PacketStreamError::Truncated { context }) => {
                    debug!("Truncated {} at offset {}, treating as end of stream", context, start);
                    self.rewind(start);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn read_frame(&mut self, start: u64) -> Result<Frame> {
        let Some(tag) = self.stream.read_tag().map_err(|e| frame_error(e, "tag", start))? else {
            return Ok(Frame::End);
        };

        match Tag::from_bytes(tag) {
            Some(Tag::SourceJson) | Some(Tag::SourcePacket) => {
                self.read_packet_header(start, tag).map(Frame::Packet)
            }
            Some(Tag::Sync) => Ok(Frame::Skipped),
            Some(Tag::AddSource) => self.read_source().map(|_| Frame::Skipped),
            Some(Tag::Header) => self.read_header().map(|_| Frame::Skipped),
            Some(Tag::Magic) => {
                let mut rest = [0u8; 2];
                self.stream.read_exact(&mut rest).map_err(|e| frame_error(e, "magic", start))?;
                if &rest != b"GO" {
                    return Err(PacketStreamError::corrupt(start, "incomplete stream magic"));
                }
                debug!("Stream restarted at offset {}", start);
                Ok(Frame::Skipped)
            }
            Some(Tag::Stats) | Some(Tag::Footer) | Some(Tag::End) => Ok(Frame::End),
            None => Err(PacketStreamError::UnknownTag { found: tag_name(&tag), offset: start }),
        }
    }

    fn read_packet_header(&mut self, start: u64, tag: TagBytes) -> Result<PendingPacket> {
        let mut meta = None;

        if Tag::from_bytes(tag) == Some(Tag::SourceJson) {
            let meta_source = read_varint(&mut self.stream)
                .map_err(|e| frame_error(e, "metadata source id", start))?;
            let value: Value =
                self.stream.read_json().map_err(|e| json_error(e, "packet metadata", start))?;
            meta = Some((meta_source, value));
            self.expect_tag(Tag::SourcePacket)?;
        }

        let time_us =
            read_timestamp(&mut self.stream).map_err(|e| frame_error(e, "timestamp", start))?;
        let source = read_varint(&mut self.stream)
            .map_err(|e| frame_error(e, "packet source id", start))? as usize;

        if let Some((meta_source, _)) = &meta
            && *meta_source as usize != source
        {
            return Err(PacketStreamError::corrupt(
                start,
                format!("metadata for source {} precedes packet of source {}", meta_source, source),
            ));
        }

        let Some(descriptor) = self.sources.get(source) else {
            return Err(PacketStreamError::corrupt(
                start,
                format!("packet for unregistered source {}", source),
            ));
        };

        let size = if descriptor.is_variable_size() {
            read_varint(&mut self.stream).map_err(|e| frame_error(e, "packet length", start))?
                as usize
        } else {
            descriptor.data_size_bytes
        };

        let end = self.stream.position() + size as u64;
        if self.stream.is_seekable() {
            let len = self.stream.len().map_err(|e| PacketStreamError::io("stat", e))?;
            if end > len {
                return Err(PacketStreamError::truncated("packet payload"));
            }
        }

        let sequence = self.next_seq[source];
        self.next_seq[source] += 1;

        if start <= self.frontier && !self.index.has(source, sequence) {
            self.index.add(source, sequence, PacketIndexEntry { offset: start, time_us })?;
        }
        self.extend_frontier(start, end);

        trace!("Packet {} of source {} at offset {} ({} bytes)", sequence, source, start, size);
        Ok(PendingPacket {
            offset: start,
            source,
            sequence,
            time_us,
            meta: meta.map(|(_, value)| value).filter(|value| !value.is_null()),
            size,
            remaining: size,
        })
    }

    fn extend_frontier(&mut self, start: u64, end: u64) {
        if start <= self.frontier {
            self.frontier = self.frontier.max(end);
        }
    }

    /// Step back to `offset` on seekable media so a later read retries there.
    fn rewind(&mut self, offset: u64) {
        if self.stream.is_seekable()
            && let Err(e) = self.stream.seek_to(offset)
        {
            warn!("Failed to rewind to offset {}: {}", offset, e);
        }
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<()> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        let n = buf.len().min(pending.remaining);
        self.stream.read_exact(&mut buf[..n]).map_err(|e| frame_error(e, "packet payload", 0))?;
        pending.remaining -= n;
        Ok(())
    }

    fn skip_pending(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            self.stream
                .skip(pending.remaining as u64)
                .map_err(|e| frame_error(e, "packet payload", 0))?;
        }
        Ok(())
    }

    fn seek_cursor(&mut self, offset: u64) -> Result<()> {
        self.stream.seek_to(offset).map_err(|e| PacketStreamError::io("seeking", e))
    }

    fn seek(&mut self, source: SourceId, frame: i64) -> Result<usize> {
        if !self.stream.is_seekable() {
            return self.seek_forward(source, frame.max(0) as usize);
        }

        let mut count = self.index.packet_count(source).unwrap_or(0);
        if frame >= count as i64 {
            self.extend_index()?;
            count = self.index.packet_count(source).unwrap_or(0);
        }
        if count == 0 {
            return Ok(0);
        }

        let target = frame.clamp(0, count as i64 - 1) as usize;
        let offset = self.index.position(source, target).ok_or_else(|| PacketStreamError::Index {
            details: format!("frame {} of source {} has no offset", target, source),
        })?;

        self.pending = None;
        self.seek_cursor(offset)?;
        for (id, next) in self.next_seq.iter_mut().enumerate() {
            *next = self.index.frames_before(id, offset);
        }
        trace!("Seeked source {} to frame {} at offset {}", source, target, offset);
        Ok(target)
    }

    /// Read forward until `target` of `source` is the next packet.
    fn seek_forward(&mut self, source: SourceId, target: usize) -> Result<usize> {
        let current = self.packet_index(source);
        if target < current {
            return Err(PacketStreamError::not_seekable("seeking backwards"));
        }

        loop {
            match self.advance()? {
                None => return Ok(self.packet_index(source).saturating_sub(1)),
                Some(packet) if packet.source == source && packet.sequence == target => {
                    return Ok(target);
                }
                Some(_) => self.skip_pending()?,
            }
        }
    }

    /// Like [`scan_to_end`](Self::scan_to_end), but corrupt framing only ends
    /// the index. The bad bytes are not rescanned until the frontier moves.
    fn extend_index(&mut self) -> Result<()> {
        if self.scan_halted == Some(self.frontier) {
            return Ok(());
        }

        match self.scan_to_end() {
            Ok(()) => {
                self.scan_halted = None;
                Ok(())
            }
            Err(e) if e.is_corruption() => {
                warn!("Index of {} stops at offset {}: {}", self.path.display(), self.frontier, e);
                self.scan_halted = Some(self.frontier);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Index everything between the frontier and the end of the file, then
    /// restore the cursor.
    fn scan_to_end(&mut self) -> Result<()> {
        let resume = match self.pending.take() {
            Some(pending) => {
                // Re-read the pending packet from its frame start afterwards
                self.next_seq[pending.source] -= 1;
                pending.offset
            }
            None => self.stream.position(),
        };
        let saved_seq = self.next_seq.clone();
        let before = self.index.total_packets();

        let scanned = self.scan_from_frontier();

        // Sources registered late extend the sequence table
        let mut restored = saved_seq;
        restored.resize(self.next_seq.len(), 0);
        self.next_seq = restored;
        self.pending = None;
        self.seek_cursor(resume)?;

        scanned?;
        debug!(
            "Indexed {} packets, frontier at offset {}",
            self.index.total_packets() - before,
            self.frontier
        );
        Ok(())
    }

    fn scan_from_frontier(&mut self) -> Result<()> {
        self.seek_cursor(self.frontier)?;
        for (id, next) in self.next_seq.iter_mut().enumerate() {
            *next = self.index.packet_count(id).unwrap_or(0);
        }
        while self.advance()?.is_some() {
            self.skip_pending()?;
        }
        Ok(())
    }

    /// Try to load the index from the footer; leaves the cursor at the data start.
    fn load_footer(&mut self) -> Result<bool> {
        let len = self.stream.len().map_err(|e| PacketStreamError::io("stat", e))?;
        if len < self.data_start + FOOTER_LEN {
            return Ok(false);
        }

        let footer_at = len - FOOTER_LEN;
        self.seek_cursor(footer_at)?;
        let result = self.read_footer(footer_at);
        self.seek_cursor(self.data_start)?;

        let Some((sta_offset, index)) = result? else {
            return Ok(false);
        };
        self.index = index;
        self.frontier = sta_offset;
        self.footer_loaded = true;
        debug!("Loaded index of {} packets from footer", self.index.total_packets());
        Ok(true)
    }

    fn read_footer(&mut self, footer_at: u64) -> Result<Option<(u64, PacketIndex)>> {
        match self.stream.read_tag().map_err(|e| frame_error(e, "footer", footer_at))? {
            Some(tag) if Tag::from_bytes(tag) == Some(Tag::Footer) => {}
            _ => return Ok(None),
        }
        let sta_offset =
            read_u64_le(&mut self.stream).map_err(|e| frame_error(e, "footer", footer_at))?;
        if sta_offset < self.data_start || sta_offset >= footer_at {
            return Err(PacketStreamError::corrupt(
                footer_at,
                format!("footer points outside the stream ({})", sta_offset),
            ));
        }

        self.seek_cursor(sta_offset)?;
        self.expect_tag(Tag::Stats)?;
        let stats: SourceStats =
            self.stream.read_json().map_err(|e| json_error(e, "statistics", sta_offset))?;

        // Sources registered after the first packet only show up in a scan
        if stats.num_sources > self.sources.len() {
            debug!(
                "Footer lists {} sources, header registered {}",
                stats.num_sources,
                self.sources.len()
            );
            return Ok(None);
        }

        let index = PacketIndex::from_stats(&stats)?;
        if let Some(last) = index.last_offset()
            && last >= sta_offset
        {
            return Err(PacketStreamError::corrupt(sta_offset, "index entry beyond statistics block"));
        }
        Ok(Some((sta_offset, index)))
    }
}

fn frame_error(err: io::Error, context: &str, offset: u64) -> PacketStreamError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => PacketStreamError::truncated(context),
        io::ErrorKind::InvalidData => {
            PacketStreamError::corrupt(offset, format!("{}: {}", context, err))
        }
        _ => PacketStreamError::io(format!("reading {}", context), err),
    }
}

fn json_error(err: serde_json::Error, context: &str, offset: u64) -> PacketStreamError {
    use serde_json::error::Category;

    match err.classify() {
        Category::Eof => PacketStreamError::truncated(context),
        Category::Io => PacketStreamError::io(format!("reading {}", context), err.into()),
        Category::Syntax | Category::Data => {
            PacketStreamError::corrupt(offset, format!("{}: {}", context, err))
        }
    }
}

#[cfg(test)]
mod tests;
