//! CRC-32 throughput benchmarks.
//!
//! Measures the checksum unit across data sizes, and compares single-shot
//! hashing against the chunked updates the archive writer performs.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use oxizip_core::crc::{Crc32, CrcReader};
use std::hint::black_box;
use std::io::Read;

/// Text-like data
fn text_like(size: usize) -> Vec<u8> {
    let text = b"The quick brown fox jumps over the lazy dog. ";
    let mut data = Vec::with_capacity(size);
    while data.len() < size {
        let chunk_size = (size - data.len()).min(text.len());
        data.extend_from_slice(&text[..chunk_size]);
    }
    data
}

fn bench_crc32_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32_sizes");

    let sizes = [
        ("256B", 256),
        ("4KB", 4 * 1024),
        ("64KB", 64 * 1024),
        ("1MB", 1024 * 1024),
    ];

    for (size_name, size) in sizes {
        let data = text_like(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size_name), &data, |b, data| {
            b.iter(|| {
                let checksum = Crc32::compute(black_box(data));
                black_box(checksum);
            });
        });
    }

    group.finish();
}

/// Incremental hashing with the chunk sizes used by the copy loops
fn bench_crc32_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32_incremental");

    let size = 1024 * 1024;
    let data = text_like(size);

    for chunk_size in [4096, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("chunks_{}", chunk_size)),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut crc = Crc32::new();
                    for chunk in data.chunks(chunk_size) {
                        crc.update(black_box(chunk));
                    }
                    black_box(crc.finalize());
                });
            },
        );
    }

    group.finish();
}

fn bench_crc_reader(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc_reader");

    let size = 1024 * 1024;
    let data = text_like(size);

    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("read_to_end", |b| {
        b.iter(|| {
            let mut reader = CrcReader::new(black_box(&data[..]));
            let mut buf = [0u8; 64 * 1024];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
            black_box(reader.crc());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_crc32_sizes,
    bench_crc32_incremental,
    bench_crc_reader
);
criterion_main!(benches);
