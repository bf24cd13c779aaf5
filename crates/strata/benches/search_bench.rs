//! Benchmarks for Strata partition I/O.
//!
//! Run with: cargo bench --package alopex-strata
//!
//! ## Benchmark Categories
//!
//! - **Position search**: Seek inside one in-memory partition
//! - **Append**: Writing a day of samples into an hourly store
//! - **Range read**: Reading a slice of a day back

use alopex_strata::codec::{encode_event_line, FileHeader};
use alopex_strata::event::{collect_events, VecEventStream};
use alopex_strata::search::{PositionSearch, TimestampComparator};
use alopex_strata::store::{PlainStore, StoreConfig};
use alopex_strata::{
    Event, PartitionGranularity, SampleKind, SampleValue, StoragePlugin, StreamDescription,
    Timestamp,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use tempfile::TempDir;

// 2012-01-01T00:00:00Z
const T0: i64 = 1_325_376_000;

/// Slowly varying samples at a fixed period.
fn generate_events(count: usize, period_secs: i64) -> Vec<Event> {
    let mut value = 50.0;
    (0..count)
        .map(|i| {
            value += (i as f64 * 0.1).sin() * 0.1;
            Event::new(
                Timestamp::from_epoch_seconds(T0 + i as i64 * period_secs),
                SampleValue::Double(value),
            )
        })
        .collect()
}

/// Builds the bytes of one partition file and returns them with the header length.
fn partition_bytes(events: &[Event]) -> (Vec<u8>, u64) {
    let mut bytes = FileHeader::new("BENCH:PV", SampleKind::ScalarDouble, 2012)
        .encode_line()
        .unwrap();
    let header_end = bytes.len() as u64;
    for event in events {
        bytes.extend(encode_event_line(event, 2012).unwrap());
    }
    (bytes, header_end)
}

fn bench_position_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("position_search");
    for count in [1_000usize, 10_000, 100_000] {
        let events = generate_events(count, 1);
        let (bytes, header_end) = partition_bytes(&events);
        let target = Timestamp::from_epoch_seconds(T0 + (count as i64 * 2) / 3);

        group.bench_with_input(BenchmarkId::from_parameter(count), &bytes, |b, bytes| {
            b.iter(|| {
                let mut search =
                    PositionSearch::new(Cursor::new(bytes.as_slice()), bytes.len() as u64)
                        .with_start_position(header_end - 1);
                search
                    .seek(black_box(&TimestampComparator::new(target, 2012)))
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let events = generate_events(8_640, 10);
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(events.len() as u64));
    group.sample_size(10);

    group.bench_function("hourly_day_8640", |b| {
        b.iter_with_setup(
            || {
                let temp_dir = TempDir::new().unwrap();
                let store = PlainStore::new(StoreConfig::plain(
                    "STS",
                    temp_dir.path(),
                    PartitionGranularity::Hour,
                ))
                .unwrap();
                let stream = VecEventStream::new(
                    StreamDescription::new("BENCH:PV", SampleKind::ScalarDouble, "bench"),
                    events.clone(),
                );
                (temp_dir, store, stream)
            },
            |(_temp_dir, store, mut stream)| store.append("BENCH:PV", &mut stream).unwrap(),
        )
    });
    group.finish();
}

fn bench_range_read(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = PlainStore::new(StoreConfig::plain(
        "STS",
        temp_dir.path(),
        PartitionGranularity::Day,
    ))
    .unwrap();
    let mut stream = VecEventStream::new(
        StreamDescription::new("BENCH:PV", SampleKind::ScalarDouble, "bench"),
        generate_events(86_400, 1),
    );
    store.append("BENCH:PV", &mut stream).unwrap();

    let mut group = c.benchmark_group("range_read");
    group.sample_size(20);
    group.bench_function("one_hour_of_a_day", |b| {
        b.iter(|| {
            let mut data = store
                .get_data(
                    "BENCH:PV",
                    Timestamp::from_epoch_seconds(T0 + 15 * 3600),
                    Timestamp::from_epoch_seconds(T0 + 16 * 3600),
                )
                .unwrap();
            collect_events(&mut data).unwrap().len()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_position_search, bench_append, bench_range_read);
criterion_main!(benches);
