//! Helpers for building sample recordings in tests and benchmarks

#![cfg(any(test, feature = "benchmark"))]

use std::path::{Path, PathBuf};

use crate::Result;
use crate::types::PacketStreamSource;
use crate::writer::{PacketStreamWriter, WriterOptions};

/// Payload size of every packet in a sample recording
pub const SAMPLE_PACKET_SIZE: usize = 16;

/// Spacing between consecutive packets of a sample recording
pub const SAMPLE_PACKET_SPACING_US: i64 = 1_000;

/// Deterministic payload of packet `sequence` of `source`.
pub fn sample_payload(source: usize, sequence: usize) -> Vec<u8> {
    (0..SAMPLE_PACKET_SIZE).map(|i| (source * 31 + sequence * 7 + i) as u8).collect()
}

/// Capture time of packet `sequence` of `source` in a recording of `sources`.
pub fn sample_time_us(sources: usize, source: usize, sequence: usize) -> i64 {
    ((sequence * sources + source) as i64 + 1) * SAMPLE_PACKET_SPACING_US
}

/// Write `sample.pango` into `dir` with `sources` fixed-size sources.
///
/// Packets are interleaved round-robin, each source gets `packets` of them and
/// capture times increase by [`SAMPLE_PACKET_SPACING_US`] across the stream.
pub fn write_sample_recording(dir: &Path, sources: usize, packets: usize) -> Result<PathBuf> {
    let path = dir.join("sample.pango");
    let writer = PacketStreamWriter::create(&path, WriterOptions::default())?;

    for source in 0..sources {
        let mut registration =
            PacketStreamSource::fixed_size(format!("sample_{source}"), SAMPLE_PACKET_SIZE)
                .with_uri(format!("test://sample/{source}"));
        writer.add_source(&mut registration)?;
    }

    for sequence in 0..packets {
        for source in 0..sources {
            writer.write_source_packet(
                source,
                &sample_payload(source, sequence),
                sample_time_us(sources, source, sequence),
                None,
            )?;
        }
    }

    writer.close()?;
    Ok(path)
}
