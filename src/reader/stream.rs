//! Position-tracking byte cursor over a recording or pipe

use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

use crate::format::{TAG_LENGTH, TagBytes};

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Buffered reader that knows its absolute stream offset.
///
/// Tags can be pushed back after inspection, which lets the reader peek at
/// the next frame on media that cannot seek.
pub(crate) struct TagStream {
    inner: BufReader<File>,
    pos: u64,
    pushback: Vec<u8>,
    seekable: bool,
}

impl TagStream {
    pub fn new(file: File, seekable: bool) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_BYTES, file),
            pos: 0,
            pushback: Vec::new(),
            seekable,
        }
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Current length of the underlying file.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.inner.get_ref().metadata()?.len())
    }

    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if !self.seekable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "stream is not seekable"));
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.pushback.clear();
        self.pos = offset;
        Ok(())
    }

    /// Next tag, or `None` at a clean end of stream.
    ///
    /// A partial tag at the end is reported as `UnexpectedEof`.
    pub fn read_tag(&mut self) -> io::Result<Option<TagBytes>> {
        let mut tag = [0u8; TAG_LENGTH];
        let mut filled = 0;
        while filled < TAG_LENGTH {
            match self.read(&mut tag[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Some(tag))
    }

    /// Return a tag to the front of the stream.
    pub fn unread_tag(&mut self, tag: TagBytes) {
        let mut restored = tag.to_vec();
        restored.append(&mut self.pushback);
        self.pushback = restored;
        self.pos -= TAG_LENGTH as u64;
    }

    /// Parse one JSON value without consuming anything after it.
    pub fn read_json<T: DeserializeOwned>(&mut self) -> serde_json::Result<T> {
        let mut de = serde_json::Deserializer::from_reader(&mut *self);
        T::deserialize(&mut de)
    }

    /// Consume a single `\n` if it is the next byte.
    pub fn skip_newline(&mut self) -> io::Result<()> {
        if let Some(&first) = self.pushback.first() {
            if first == b'\n' {
                self.pushback.remove(0);
                self.pos += 1;
            }
            return Ok(());
        }
        let buf = self.inner.fill_buf()?;
        if buf.first() == Some(&b'\n') {
            self.inner.consume(1);
            self.pos += 1;
        }
        Ok(())
    }

    /// Discard `len` bytes.
    pub fn skip(&mut self, len: u64) -> io::Result<()> {
        let from_pushback = (len as usize).min(self.pushback.len());
        self.pushback.drain(..from_pushback);
        self.pos += from_pushback as u64;
        let remaining = len - from_pushback as u64;

        if self.seekable {
            let offset = i64::try_from(remaining)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "skip too large"))?;
            self.inner.seek_relative(offset)?;
            self.pos += remaining;
            Ok(())
        } else {
            let copied = io::copy(&mut (&mut self.inner).take(remaining), &mut io::sink())?;
            self.pos += copied;
            if copied < remaining {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Ok(())
        }
    }

    /// Scan byte by byte for `pattern`, leaving the cursor just after it.
    ///
    /// Returns `false` if the stream ends first.
    pub fn find(&mut self, pattern: &[u8]) -> io::Result<bool> {
        let mut window: Vec<u8> = Vec::with_capacity(pattern.len());
        let mut byte = [0u8; 1];
        loop {
            match self.read(&mut byte) {
                Ok(0) => return Ok(false),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            if window.len() == pattern.len() {
                window.remove(0);
            }
            window.push(byte[0]);
            if window == pattern {
                return Ok(true);
            }
        }
    }
}

impl Read for TagStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.pushback.is_empty() {
            let n = buf.len().min(self.pushback.len());
            buf[..n].copy_from_slice(&self.pushback[..n]);
            self.pushback.drain(..n);
            self.pos += n as u64;
            return Ok(n);
        }
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}
