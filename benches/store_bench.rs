use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hoard::codec;
use hoard::{PackfileWriter, StreamWriter};
use std::io::Write;

fn bench_codec(c: &mut Criterion) {
    let compressible = b"a block of text that compresses nicely ".repeat(26_000);
    let mut state = 0x2545_F491u32;
    let random: Vec<u8> = (0..1024 * 1024)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect();

    c.bench_function("encode_1mb_text", |b| {
        b.iter(|| codec::encode(codec::FAST_LEVEL, black_box(&compressible)))
    });
    c.bench_function("encode_1mb_random", |b| {
        b.iter(|| codec::encode(codec::FAST_LEVEL, black_box(&random)))
    });
}

fn bench_packfile_write(c: &mut Criterion) {
    let blocks: Vec<Vec<u8>> = (0..64)
        .map(|i| format!("block {i} ").into_bytes().repeat(1000))
        .collect();

    c.bench_function("pack_64_blocks", |b| {
        b.iter(|| {
            let mut writer = PackfileWriter::new();
            for block in &blocks {
                writer.write(black_box(block)).unwrap();
            }
            writer.len()
        })
    });

    let data = vec![99u8; 32 * 1024];
    c.bench_function("pack_dedup_10x_identical", |b| {
        b.iter(|| {
            let mut writer = PackfileWriter::new();
            for _ in 0..10 {
                writer.write(black_box(&data)).unwrap();
            }
            writer.len()
        })
    });
}

fn bench_stream_write(c: &mut Criterion) {
    let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i * 31 % 251) as u8).collect();

    c.bench_function("stream_1mb_into_pack", |b| {
        b.iter(|| {
            let mut pack = PackfileWriter::new();
            let mut stream = StreamWriter::new(&mut pack);
            stream.write_all(black_box(&data)).unwrap();
            stream.finish().unwrap()
        })
    });
}

criterion_group!(benches, bench_codec, bench_packfile_write, bench_stream_write);
criterion_main!(benches);
