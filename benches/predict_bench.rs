use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Write;
use tempfile::NamedTempFile;
use zipcast::{
    calculate_total_size, stream_archive, ByteCounter, DosDateTime, StreamEntry, ZipArchive,
};

fn generate_random_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state = 0x12345678u32;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict_total_size");

    for count in [100usize, 10_000, 100_000] {
        let entries: Vec<(String, u64)> = (0..count)
            .map(|i| (format!("dir_{}/file_{}.bin", i % 97, i), (i as u64) * 4099))
            .collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &entries, |b, entries| {
            b.iter(|| calculate_total_size(black_box(entries)));
        });
    }

    group.finish();
}

fn bench_streaming(c: &mut Criterion) {
    let sizes = vec![100 * 1024, 1024 * 1024]; // 100KB, 1MB

    for size in sizes {
        let mut group = c.benchmark_group(format!("stream_{}", format_size(size)));
        group.throughput(Throughput::Bytes(size as u64));

        let data = generate_random_data(size);
        let entries = vec![StreamEntry::new("random.bin", size as u64, DosDateTime::MIN, data)
            .unwrap()];

        group.bench_function("byte_counter", |b| {
            b.iter(|| {
                let mut counter = ByteCounter::new();
                stream_archive(black_box(&entries), &mut counter).unwrap();
                counter.count()
            });
        });

        group.bench_function("temp_file", |b| {
            b.iter(|| {
                let temp = NamedTempFile::new().unwrap();
                stream_archive(black_box(&entries), temp.as_file()).unwrap();
            });
        });

        group.finish();
    }
}

fn bench_general_archive(c: &mut Criterion) {
    let mut group = c.benchmark_group("general_archive_100_entries");

    let entry_count = 100;
    let entry_size = 10 * 1024; // 10KB per entry
    group.throughput(Throughput::Bytes((entry_count * entry_size) as u64));

    let data = generate_random_data(entry_size);

    group.bench_function("patched_headers", |b| {
        b.iter(|| {
            let temp = NamedTempFile::new().unwrap();
            let mut archive = ZipArchive::new(temp.reopen().unwrap()).unwrap();
            for i in 0..entry_count {
                let id = archive.create_entry(&format!("file_{}.bin", i)).unwrap();
                let mut writer = archive.open_for_write(id).unwrap();
                writer.write_all(black_box(&data)).unwrap();
                writer.finish().unwrap();
            }
            archive.finish().unwrap();
        });
    });

    group.finish();
}

fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{}MB", bytes / (1024 * 1024))
    }
}

criterion_group!(
    benches,
    bench_prediction,
    bench_streaming,
    bench_general_archive
);
criterion_main!(benches);
