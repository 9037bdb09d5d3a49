//! Benchmarks for order book operations

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use feedmux::book::OrderBookStore;
use feedmux::types::{Market, PriceLevel, Snapshot};

fn create_snapshot(levels: usize) -> Snapshot {
    let bids: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel::new(&format!("{}", 50_000 - i as i64), "1.5"))
        .collect();

    let asks: Vec<PriceLevel> = (0..levels)
        .map(|i| PriceLevel::new(&format!("{}", 50_001 + i as i64), "1.5"))
        .collect();

    Snapshot {
        market: Market::new("binance", "BTC", "USDT", "BTCUSDT"),
        timestamp_ms: Some(1_672_531_200_000),
        sequence_id: Some(1_000),
        asks,
        bids,
        checksum: None,
    }
}

fn benchmark_from_snapshot(c: &mut Criterion) {
    let snapshot = create_snapshot(100);

    c.bench_function("from_snapshot_100_levels", |b| {
        b.iter(|| OrderBookStore::from_snapshot(black_box(&snapshot)).unwrap())
    });
}

fn benchmark_update_near_top(c: &mut Criterion) {
    let snapshot = create_snapshot(1_000);
    let mut book = OrderBookStore::from_snapshot(&snapshot).unwrap();
    let level = PriceLevel::new("49999", "2.0");

    let mut ts = 1_672_531_200_001u64;
    c.bench_function("update_near_top_1000_levels", |b| {
        b.iter(|| {
            ts += 1;
            book.update(true, black_box(&level), ts).unwrap();
        })
    });
}

fn benchmark_update_insert_delete(c: &mut Criterion) {
    let snapshot = create_snapshot(1_000);
    let mut book = OrderBookStore::from_snapshot(&snapshot).unwrap();
    let insert = PriceLevel::new("50000.5", "3.0");
    let delete = PriceLevel::new("50000.5", "0");

    let mut ts = 1_672_531_200_001u64;
    c.bench_function("insert_delete_1000_levels", |b| {
        b.iter(|| {
            ts += 1;
            book.update(false, black_box(&insert), ts).unwrap();
            ts += 1;
            book.update(false, black_box(&delete), ts).unwrap();
        })
    });
}

fn benchmark_checksum(c: &mut Criterion) {
    let snapshot = create_snapshot(1_000);
    let book = OrderBookStore::from_snapshot(&snapshot).unwrap();

    c.bench_function("checksum_top_10", |b| b.iter(|| black_box(book.checksum())));
}

fn benchmark_top_of_book_snapshot(c: &mut Criterion) {
    let snapshot = create_snapshot(1_000);
    let book = OrderBookStore::from_snapshot(&snapshot).unwrap();

    c.bench_function("snapshot_depth_10", |b| b.iter(|| black_box(book.snapshot(10))));
}

criterion_group!(
    benches,
    benchmark_from_snapshot,
    benchmark_update_near_top,
    benchmark_update_insert_delete,
    benchmark_checksum,
    benchmark_top_of_book_snapshot
);
criterion_main!(benches);
