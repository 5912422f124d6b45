//! Benchmarks for key encoding and sink writes.
//!
//! Every block the watcher stores goes through the key codec at least twice (row key and cursor),
//! and consumers decode every row they scan.

use std::{hint::black_box, sync::OnceLock};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use vaa_watcher::{
    BlockKey, Chain, VaaKey, VaasByBlock,
    sink::{InMemorySink, ScanRequest, Sink},
};

const EMITTER: &str = "0000000000000000000000003ee18b2214aff97000d974cf647e7c347e8fa585";

static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

fn get_runtime() -> &'static tokio::runtime::Runtime {
    RUNTIME.get_or_init(|| tokio::runtime::Runtime::new().expect("failed to create tokio runtime"))
}

fn block(number: u64) -> BlockKey {
    BlockKey::from_unix_seconds(number, 1_672_000_000 + (number % 1_000_000) as i64).expect("valid timestamp")
}

fn batch(from: u64, size: u64) -> VaasByBlock {
    let mut vaas: VaasByBlock = (from..from + size).map(|number| (block(number), vec![])).collect();
    for number in (from..from + size).step_by(10) {
        vaas.push(block(number), VaaKey::new(format!("0x{number:064x}"), Chain::Ethereum, EMITTER, number));
    }
    vaas
}

fn codec_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_codec");
    let key = block(46_997_506);
    let encoded = key.to_string();
    let vaa = VaaKey::new(format!("0x{:064x}", 7), Chain::Ethereum, EMITTER, 219_960);
    let vaa_encoded = vaa.to_string();

    group.bench_function("encode_block_key", |b| b.iter(|| black_box(&key).to_string()));
    group.bench_function("decode_block_key", |b| {
        b.iter(|| black_box(&encoded).parse::<BlockKey>().expect("valid key"));
    });
    group.bench_function("encode_vaa_key", |b| b.iter(|| black_box(&vaa).to_string()));
    group.bench_function("decode_vaa_key", |b| {
        b.iter(|| black_box(&vaa_encoded).parse::<VaaKey>().expect("valid key"));
    });
    group.finish();
}

fn sink_benchmark(c: &mut Criterion) {
    let rt = get_runtime();
    let mut group = c.benchmark_group("in_memory_sink");

    for size in [100u64, 1_000, 10_000] {
        let vaas = batch(1_000_000, size);
        group.throughput(Throughput::Elements(size));

        group.bench_with_input(BenchmarkId::new("store", size), &vaas, |b, vaas| {
            b.to_async(rt).iter(|| async {
                let sink = InMemorySink::new();
                sink.store_vaas_by_block(Chain::Ethereum, vaas).await.expect("store failed");
            });
        });

        let sink = InMemorySink::new();
        rt.block_on(sink.store_vaas_by_block(Chain::Ethereum, &vaas)).expect("store failed");
        group.bench_with_input(BenchmarkId::new("scan", size), &sink, |b, sink| {
            b.to_async(rt).iter(|| async {
                let request = ScanRequest::new(Chain::Ethereum).page_size(usize::MAX);
                let page = sink.scan_blocks(&request).await.expect("scan failed");
                black_box(page.rows.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, codec_benchmark, sink_benchmark);
criterion_main!(benches);
