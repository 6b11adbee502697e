//! Benchmarks for station frame decoding.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench frame_decoder_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use parklink_protocol::{FrameDecoder, JsonLineCodec, parse_message};
use std::hint::black_box;
use tokio_util::codec::Decoder;

const SENSOR_FRAME: &[u8] =
    b"{\"type\":\"sensor_update\",\"space1_occupied\":true,\"space2_occupied\":false,\"parking_id\":1}\n";

const NOISY_FRAME: &[u8] =
    b"\x00\xffboot>{\"type\":\"button_press\",\"button\":\"enter\",\"parking_id\":1}<noise\n";

/// Build a stream of `count` frames.
fn stream_of(frame: &[u8], count: usize) -> Vec<u8> {
    frame.repeat(count)
}

/// Benchmark line extraction with the stream fed in transport-sized chunks.
fn bench_feed_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed_chunked");

    for chunk_size in [1usize, 16, 64, 1024] {
        let stream = stream_of(SENSOR_FRAME, 100);
        group.throughput(Throughput::Elements(100));

        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut decoder = FrameDecoder::new();
                    let mut count = 0;
                    for chunk in stream.chunks(size) {
                        count += decoder.feed(black_box(chunk)).count();
                    }
                    black_box(count);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark decoding plus JSON extraction of noisy frames.
fn bench_parse_noisy(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_noisy");
    group.throughput(Throughput::Elements(1000));

    let stream = stream_of(NOISY_FRAME, 1000);

    group.bench_function("decode_and_parse_1000", |b| {
        b.iter(|| {
            let mut codec = JsonLineCodec::new();
            let mut buffer = BytesMut::from(&stream[..]);
            let mut parsed = 0;

            while let Ok(Some(line)) = codec.decode(&mut buffer) {
                if parse_message(&line).is_ok() {
                    parsed += 1;
                }
            }

            black_box(parsed);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_feed_chunked, bench_parse_noisy);
criterion_main!(benches);
