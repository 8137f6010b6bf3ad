#![allow(clippy::unwrap_used, clippy::uninlined_format_args)]

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use euicc_bridge::core::codec::PacketCodec;
use euicc_bridge::core::packet::{Command, ConnectParams, Packet};
use euicc_bridge::utils::compression::CompressionKind;
use std::hint::black_box;

fn bench_small_packets(c: &mut Criterion) {
    let codec = PacketCodec::default();
    let select = Packet::body(Command::Transmit, vec![0x00, 0xA4, 0x04, 0x00, 0x00]);
    let connect = Packet::connect(ConnectParams::new("/dev/ttyUSB2", "at", 0));

    let mut group = c.benchmark_group("small_packets");
    for (name, packet) in [("transmit", &select), ("connect", &connect)] {
        let bytes = codec.encode(packet).unwrap();
        group.bench_function(format!("encode_{}", name), |b| {
            b.iter(|| codec.encode(black_box(packet)).unwrap())
        });
        group.bench_function(format!("decode_{}", name), |b| {
            b.iter(|| codec.decode(black_box(&bytes)).unwrap())
        });
    }
    group.finish();
}

fn bench_large_responses(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_responses");
    // profile listings are repetitive TLV data, roughly what a card returns
    let payload: Vec<u8> = (0..4096u32).map(|i| (i % 37) as u8).collect();
    let packet = Packet::body(Command::Response, payload.clone());

    let codecs = [
        ("plain", PacketCodec::new(None, 0)),
        ("lz4", PacketCodec::new(Some(CompressionKind::Lz4), 128)),
        ("zstd", PacketCodec::new(Some(CompressionKind::Zstd), 128)),
    ];

    group.throughput(Throughput::Bytes(payload.len() as u64));
    for (name, codec) in &codecs {
        let bytes = codec.encode(&packet).unwrap();
        group.bench_function(format!("encode_{}", name), |b| {
            b.iter(|| codec.encode(black_box(&packet)).unwrap())
        });
        group.bench_function(format!("decode_{}", name), |b| {
            b.iter(|| codec.decode(black_box(&bytes)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_small_packets, bench_large_responses);
criterion_main!(benches);
