//! Benchmarks for recording and reading packet streams
//!
//! Measures:
//! - Writer append throughput for small and large fixed-size packets
//! - Sequential read throughput through the footer index
//! - Random seeks by frame number
//!
//! Platform: Cross-platform (writes into a temporary directory)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use packetstream::test_utils::{SAMPLE_PACKET_SIZE, write_sample_recording};
use packetstream::{PacketStream, PacketStreamSource};
use std::hint::black_box;

fn bench_writer_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut group = c.benchmark_group("writer_append");

    for size in [64usize, 4096, 640 * 480] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let writer = PacketStream::create(dir.path().join(format!("append_{size}.pango")))
                .expect("create recording");
            let id = writer
                .add_source(&mut PacketStreamSource::fixed_size("bench", size))
                .expect("register source");
            let mut time_us = 0i64;

            b.iter(|| {
                time_us += 1;
                writer.write_source_packet(id, black_box(payload), time_us, None).unwrap();
            });

            writer.close().expect("close recording");
        });
    }

    group.finish();
}

fn bench_sequential_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_sample_recording(dir.path(), 4, 2_500).expect("sample recording");
    let reader = PacketStream::open(&path).expect("open recording");

    let mut group = c.benchmark_group("sequential_read");
    group.throughput(Throughput::Bytes((4 * 2_500 * SAMPLE_PACKET_SIZE) as u64));

    group.bench_function("all_sources", |b| {
        b.iter(|| {
            reader.seek(0, 0).unwrap();
            let mut count = 0usize;
            while let Some(packet) = reader.next_packet().unwrap() {
                count += black_box(packet.len());
            }
            count
        })
    });

    group.finish();
}

fn bench_random_seek(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_sample_recording(dir.path(), 2, 10_000).expect("sample recording");
    let reader = PacketStream::open(&path).expect("open recording");

    let mut frame = 0i64;
    c.bench_function("seek_and_read", |b| {
        b.iter(|| {
            frame = (frame + 7_919) % 10_000;
            reader.seek(1, black_box(frame)).unwrap();
            black_box(reader.read_packet(1).unwrap())
        })
    });
}

criterion_group!(benches, bench_writer_append, bench_sequential_read, bench_random_seek);
criterion_main!(benches);
