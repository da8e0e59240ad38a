//! Reader tests against recordings produced by the writer

use super::*;
use crate::writer::{PacketStreamWriter, WriterOptions};
use serde_json::json;

fn record(
    dir: &tempfile::TempDir,
    name: &str,
    write: impl FnOnce(&PacketStreamWriter),
) -> PathBuf {
    let path = dir.path().join(name);
    let writer = PacketStreamWriter::create(&path, WriterOptions::default()).unwrap();
    write(&writer);
    writer.close().unwrap();
    path
}

/// Remove the footer, as if the writer had crashed before closing.
fn strip_footer(path: &Path) {
    let bytes = std::fs::read(path).unwrap();
    let sta = u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(sta).unwrap();
}

fn add_fixed(writer: &PacketStreamWriter, size: usize) -> SourceId {
    let mut source = PacketStreamSource::fixed_size("fixed", size);
    writer.add_source(&mut source).unwrap()
}

fn add_variable(writer: &PacketStreamWriter) -> SourceId {
    let mut source = PacketStreamSource::variable("variable");
    writer.add_source(&mut source).unwrap()
}

fn open(path: &Path) -> PacketStreamReader {
    PacketStreamReader::open(path, ReaderOptions::default()).unwrap()
}

fn scan_only() -> ReaderOptions {
    ReaderOptions { use_footer_index: false, rebuild_missing_index: true }
}

#[test]
fn fixed_size_packets_seek_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "fixed.pango", |writer| {
        let source = add_fixed(writer, 4);
        writer.write_source_packet(source, &0x01020304u32.to_be_bytes(), 100, None).unwrap();
        writer.write_source_packet(source, &0x05060708u32.to_be_bytes(), 200, None).unwrap();
    });

    let reader = open(&path);
    assert!(reader.has_footer_index());
    assert_eq!(reader.get_num_packets(0).unwrap(), 2);
    assert_eq!(reader.seek(0, 1).unwrap(), 1);

    let mut packet = reader.read_to_source_packet_and_lock(0).unwrap().unwrap();
    assert_eq!(packet.time_us(), 200);
    assert_eq!(packet.size(), 4);
    let mut buf = [0u8; 4];
    assert_eq!(packet.read(&mut buf).unwrap(), 4);
    assert_eq!(u32::from_be_bytes(buf), 0x05060708);
    packet.release().unwrap();

    assert!(reader.read_to_source_packet_and_lock(0).unwrap().is_none());
}

#[test]
fn sources_and_header_are_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "sources.pango", |writer| {
        let mut camera = PacketStreamSource::fixed_size("raw_video", 6)
            .with_uri("test://camera")
            .with_info(json!({"streams": [{"encoding": "GRAY8", "width": 3, "height": 2}]}));
        writer.add_source(&mut camera).unwrap();
        add_variable(writer);
    });

    let reader = open(&path);
    let sources = reader.sources();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].driver, "raw_video");
    assert_eq!(sources[0].uri, "test://camera");
    assert_eq!(sources[0].info["streams"][0]["width"], 3);
    assert_eq!(sources[1].id, 1);
    assert!(sources[1].is_variable_size());

    let header = reader.header();
    assert_eq!(header.endian, "little_endian");
    assert_eq!(header.pangolin_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(reader.get_num_packets(1).unwrap(), 0);
}

#[test]
fn interleaved_sources_read_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "interleaved.pango", |writer| {
        let a = add_variable(writer);
        let b = add_fixed(writer, 2);
        for i in 0..10u8 {
            writer.write_source_packet(a, &vec![i; i as usize], i as i64 * 10, None).unwrap();
            writer.write_source_packet(b, &[i, i], i as i64 * 10 + 5, None).unwrap();
        }
    });

    let reader = open(&path);
    for i in 0..10u8 {
        let packet = reader.read_packet(1).unwrap().unwrap();
        assert_eq!(packet.sequence, i as usize);
        assert_eq!(&packet.data[..], &[i, i]);
        assert_eq!(packet.time_us, i as i64 * 10 + 5);
    }
    assert!(reader.read_packet(1).unwrap().is_none());

    reader.seek(0, 0).unwrap();
    let mut seen = Vec::new();
    while let Some(packet) = reader.next_packet().unwrap() {
        seen.push((packet.source, packet.sequence, packet.len()));
    }
    assert_eq!(seen.len(), 20);
    assert_eq!(seen[0], (0, 0, 0));
    assert_eq!(seen[1], (1, 0, 2));
    assert_eq!(seen[18], (0, 9, 9));
}

#[test]
fn footer_index_matches_linear_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "equivalence.pango", |writer| {
        let a = add_variable(writer);
        let b = add_fixed(writer, 3);
        for i in 0..50i64 {
            let meta = json!({"frame": i});
            writer.write_source_packet(a, &[1; 7], i, (i % 3 == 0).then_some(&meta)).unwrap();
            if i % 2 == 0 {
                writer.write_source_packet(b, &[2; 3], i, None).unwrap();
            }
            if i % 10 == 0 {
                writer.write_sync().unwrap();
            }
        }
    });

    let from_footer = open(&path);
    let from_scan = PacketStreamReader::open(&path, scan_only()).unwrap();
    assert!(from_footer.has_footer_index());
    assert!(!from_scan.has_footer_index());
    assert_eq!(from_footer.index(), from_scan.index());
    assert_eq!(from_scan.get_num_packets(0).unwrap(), 50);
    assert_eq!(from_scan.get_num_packets(1).unwrap(), 25);
}

#[test]
fn missing_footer_is_rebuilt_by_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "nofooter.pango", |writer| {
        let source = add_fixed(writer, 1);
        for i in 0..5u8 {
            writer.write_source_packet(source, &[i], i as i64, None).unwrap();
        }
    });
    let expected = open(&path).index();
    strip_footer(&path);

    let reader = open(&path);
    assert!(!reader.has_footer_index());
    assert_eq!(reader.index(), expected);
    assert_eq!(reader.seek(0, 3).unwrap(), 3);
    assert_eq!(&reader.read_packet(0).unwrap().unwrap().data[..], &[3]);
}

#[test]
fn index_grows_on_demand_without_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "lazy.pango", |writer| {
        let source = add_fixed(writer, 1);
        for i in 0..5u8 {
            writer.write_source_packet(source, &[i], i as i64, None).unwrap();
        }
    });
    strip_footer(&path);

    let options = ReaderOptions { use_footer_index: false, rebuild_missing_index: false };
    let reader = PacketStreamReader::open(&path, options).unwrap();
    assert_eq!(reader.get_num_packets(0).unwrap(), 0);

    reader.read_packet(0).unwrap().unwrap();
    assert_eq!(reader.get_num_packets(0).unwrap(), 1);

    // Seeking past the known packets indexes the rest of the file
    assert_eq!(reader.seek(0, 100).unwrap(), 4);
    assert_eq!(reader.get_num_packets(0).unwrap(), 5);
}

#[test]
fn seek_clamps_out_of_range_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "clamp.pango", |writer| {
        let source = add_fixed(writer, 2);
        add_variable(writer);
        for i in 0..10u8 {
            writer.write_source_packet(source, &[i, i], i as i64, None).unwrap();
        }
    });

    let reader = open(&path);
    assert_eq!(reader.seek(0, 110).unwrap(), 9);
    assert_eq!(reader.get_packet_index(0).unwrap(), 9);
    assert_eq!(reader.seek(0, -5).unwrap(), 0);
    assert_eq!(reader.get_packet_index(0).unwrap(), 0);

    // No packets: nothing to seek to
    assert_eq!(reader.seek(1, 3).unwrap(), 0);

    let err = reader.seek(7, 0).unwrap_err();
    assert!(matches!(err, PacketStreamError::UnknownSource { source_id: 7, known: 2 }));
}

#[test]
fn seek_keeps_other_sources_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "consistent.pango", |writer| {
        let a = add_fixed(writer, 1);
        let b = add_fixed(writer, 1);
        for i in 0..6u8 {
            writer.write_source_packet(a, &[i], i as i64, None).unwrap();
            writer.write_source_packet(b, &[100 + i], i as i64, None).unwrap();
        }
    });

    let reader = open(&path);
    reader.seek(0, 4).unwrap();
    assert_eq!(reader.get_packet_index(1).unwrap(), 4);

    let packet = reader.read_packet(1).unwrap().unwrap();
    assert_eq!(packet.sequence, 4);
    assert_eq!(&packet.data[..], &[104]);

    let packet = reader.read_packet(0).unwrap().unwrap();
    assert_eq!(packet.sequence, 5);
}

#[test]
fn seek_by_capture_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "time.pango", |writer| {
        let source = add_fixed(writer, 1);
        for i in 0..10u8 {
            writer.write_source_packet(source, &[i], 1_000 * i as i64, None).unwrap();
        }
    });

    let reader = open(&path);
    assert_eq!(reader.seek_time(0, 4_500).unwrap(), 5);
    assert_eq!(reader.read_packet(0).unwrap().unwrap().time_us, 5_000);
    assert_eq!(reader.seek_time(0, 0).unwrap(), 0);

    // Nothing that late: the cursor stays put
    assert_eq!(reader.seek_time(0, 1_000_000).unwrap(), 0);
    assert_eq!(reader.source_rate_hz(0), Some(1_000.0));
}

#[test]
fn metadata_travels_with_its_packet() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "meta.pango", |writer| {
        let a = add_variable(writer);
        let b = add_variable(writer);
        writer.write_source_packet(a, b"first", 1, Some(&json!({"exposure_us": 250}))).unwrap();
        writer.write_source_packet(b, b"other", 2, Some(&json!(["x", "y"]))).unwrap();
        writer.write_source_packet(a, b"second", 3, None).unwrap();
        writer.write_source_packet(a, b"third", 4, Some(&json!("label"))).unwrap();
    });

    let reader = open(&path);
    let first = reader.read_to_source_packet_and_lock(0).unwrap().unwrap();
    assert_eq!(first.meta().unwrap()["exposure_us"], 250);
    drop(first);

    let second = reader.read_packet(0).unwrap().unwrap();
    assert!(second.meta.is_none());
    assert_eq!(&second.data[..], b"second");

    let third = reader.read_packet(0).unwrap().unwrap();
    assert_eq!(third.meta, Some(json!("label")));

    reader.seek(1, 0).unwrap();
    let other = reader.read_packet(1).unwrap().unwrap();
    assert_eq!(other.meta, Some(json!(["x", "y"])));
}

#[test]
fn partial_reads_skip_remaining_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "partial.pango", |writer| {
        let source = add_variable(writer);
        writer.write_source_packet(source, &[1, 2, 3, 4, 5, 6], 1, None).unwrap();
        writer.write_source_packet(source, &[7, 8], 2, None).unwrap();
    });

    let reader = open(&path);
    {
        let mut packet = reader.read_to_source_packet_and_lock(0).unwrap().unwrap();
        let mut head = [0u8; 2];
        assert_eq!(packet.read(&mut head).unwrap(), 2);
        assert_eq!(head, [1, 2]);
        assert_eq!(packet.read_to_vec().unwrap(), vec![3, 4, 5, 6]);
    }
    {
        let mut packet = reader.read_to_source_packet_and_lock(0).unwrap().unwrap();
        let mut big = [0u8; 16];
        assert_eq!(packet.read(&mut big).unwrap(), 2);
    }

    reader.seek(0, 0).unwrap();
    drop(reader.read_to_source_packet_and_lock(0).unwrap().unwrap());
    assert_eq!(reader.read_packet(0).unwrap().unwrap().data.as_ref(), &[7, 8]);
}

#[test]
fn truncated_trailing_frame_ends_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "truncated.pango", |writer| {
        let source = add_fixed(writer, 8);
        writer.write_source_packet(source, &[1; 8], 1, None).unwrap();
        writer.write_source_packet(source, &[2; 8], 2, None).unwrap();
    });
    strip_footer(&path);

    // Cut the last packet in half
    let len = std::fs::metadata(&path).unwrap().len();
    OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 4).unwrap();

    let reader = open(&path);
    assert_eq!(reader.get_num_packets(0).unwrap(), 1);
    assert!(reader.read_packet(0).unwrap().is_some());
    assert!(reader.read_packet(0).unwrap().is_none());
    assert!(reader.next_packet().unwrap().is_none());
}

#[test]
fn corrupt_tail_limits_seek_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "corrupt_tail.pango", |writer| {
        let source = add_fixed(writer, 4);
        writer.write_source_packet(source, &[1; 4], 100, None).unwrap();
        writer.write_source_packet(source, &[2; 4], 200, None).unwrap();
    });
    strip_footer(&path);
    OpenOptions::new().append(true).open(&path).unwrap().write_all(b"XYZgarbage").unwrap();

    let reader = open(&path);
    assert_eq!(reader.get_num_packets(0).unwrap(), 2);
    assert_eq!(reader.seek(0, 1).unwrap(), 1);

    // Past the end clamps to the last good packet, every time
    assert_eq!(reader.seek(0, 102).unwrap(), 1);
    assert_eq!(reader.seek(0, 500).unwrap(), 1);
    assert_eq!(reader.seek_time(0, 1_000).unwrap(), 1);

    let packet = reader.read_packet(0).unwrap().unwrap();
    assert_eq!((packet.sequence, packet.time_us), (1, 200));
    assert!(reader.next_packet().is_err(), "reading into the garbage still reports it");
}

#[test]
fn late_registered_sources_are_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "late.pango", |writer| {
        let a = add_fixed(writer, 1);
        writer.write_source_packet(a, &[1], 1, None).unwrap();
        let b = add_variable(writer);
        writer.write_source_packet(b, &[2, 2], 2, None).unwrap();
    });

    // The footer mentions a source the header run does not, so the index is scanned
    let reader = open(&path);
    assert_eq!(reader.sources().len(), 2);
    assert!(!reader.has_footer_index());
    assert_eq!(reader.get_num_packets(1).unwrap(), 1);
    assert_eq!(&reader.read_packet(1).unwrap().unwrap().data[..], &[2, 2]);
}

#[test]
fn fix_file_index_appends_footer() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "fix.pango", |writer| {
        let source = add_variable(writer);
        for i in 0..20u8 {
            writer.write_source_packet(source, &vec![i; 3], i as i64, None).unwrap();
        }
    });
    let original = std::fs::read(&path).unwrap();
    strip_footer(&path);
    let len = std::fs::metadata(&path).unwrap().len();
    OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 2).unwrap();

    let reader = open(&path);
    reader.fix_file_index().unwrap();
    assert!(reader.has_footer_index());
    assert_eq!(reader.get_num_packets(0).unwrap(), 19);

    let fixed = open(&path);
    assert!(fixed.has_footer_index());
    assert_eq!(fixed.index(), reader.index());
    assert!(std::fs::read(&path).unwrap().len() < original.len());

    // Already valid: nothing to do
    fixed.fix_file_index().unwrap();
}

#[test]
fn corruption_is_fatal_until_resync() {
    let dir = tempfile::tempdir().unwrap();
    let path = record(&dir, "corrupt.pango", |writer| {
        let source = add_fixed(writer, 2);
        writer.write_source_packet(source, &[1, 1], 1, None).unwrap();
        writer.write_source_packet(source, &[2, 2], 2, None).unwrap();
        writer.write_sync().unwrap();
        writer.write_source_packet(source, &[3, 3], 3, None).unwrap();
    });
    let clean = open(&path).index();
    strip_footer(&path);

    // Overwrite the tag of the second packet
    let mut bytes = std::fs::read(&path).unwrap();
    let second = clean.position(0, 1).unwrap() as usize;
    bytes[second..second + 3].copy_from_slice(b"XYZ");
    std::fs::write(&path, &bytes).unwrap();

    let reader = open(&path);
    assert_eq!(reader.get_num_packets(0).unwrap(), 1);
    assert_eq!(&reader.read_packet(0).unwrap().unwrap().data[..], &[1, 1]);

    let err = reader.read_packet(0).unwrap_err();
    assert!(matches!(err, PacketStreamError::UnknownTag { ref found, .. } if found == "XYZ"));
    assert!(err.is_corruption());

    assert!(reader.resync().unwrap());
    assert_eq!(&reader.read_packet(0).unwrap().unwrap().data[..], &[3, 3]);
    assert!(!reader.resync().unwrap());
}

#[test]
fn rejects_files_without_magic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bogus.pango");
    std::fs::write(&path, b"NOTAPANGOFILE").unwrap();

    let err = PacketStreamReader::open(&path, ReaderOptions::default()).err().unwrap();
    assert!(matches!(err, PacketStreamError::BadMagic { ref found } if found == b"NOTAP"));

    let missing = PacketStreamReader::open(dir.path().join("missing"), ReaderOptions::default());
    assert!(matches!(missing, Err(PacketStreamError::File { .. })));
}
