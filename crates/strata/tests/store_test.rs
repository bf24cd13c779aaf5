//! Integration tests for the partitioned store: round trips, range reads,
//! rename/convert and merging the output of two stores.

use alopex_strata::event::{collect_events, VecEventStream};
use alopex_strata::merge::MergeDedupStream;
use alopex_strata::partition::PARTITION_EXTENSION;
use alopex_strata::postprocess::TypeConversion;
use alopex_strata::store::{store_from_url, PlainStore, SharedStore, StoreConfig};
use alopex_strata::{
    Event, PartitionGranularity, SampleKind, SampleValue, StoragePlugin, StreamDescription,
    Timestamp,
};
use proptest::prelude::*;
use std::fs;
use tempfile::TempDir;

// 2012-12-31T22:00:00Z
const NEW_YEAR_EVE: i64 = 1_356_991_200;
// 2012-12-01T00:00:00Z
const DECEMBER: i64 = 1_354_320_000;

fn stream(pv: &str, kind: SampleKind, events: Vec<Event>) -> VecEventStream {
    VecEventStream::new(StreamDescription::new(pv, kind, "test"), events)
}

fn read(store: &dyn StoragePlugin, pv: &str, start: i64, end: i64) -> Vec<Event> {
    let mut data = store
        .get_data(
            pv,
            Timestamp::from_epoch_seconds(start),
            Timestamp::from_epoch_seconds(end),
        )
        .unwrap();
    collect_events(&mut data).unwrap()
}

// ============================================================================
// Round trip
// ============================================================================

/// Events across a year boundary keep every attribute.
#[test]
fn test_round_trip_across_year_boundary() {
    let temp_dir = TempDir::new().unwrap();
    let store = PlainStore::new(StoreConfig::plain(
        "STS",
        temp_dir.path(),
        PartitionGranularity::Hour,
    ))
    .unwrap();

    let events: Vec<Event> = (0..32)
        .map(|i| {
            let mut event = Event::new(
                Timestamp::new(NEW_YEAR_EVE + i * 450, (i as u32) * 1_000_000),
                SampleValue::Double(i as f64 / 3.0),
            )
            .with_severity((i % 3) as i32)
            .with_status((i % 5) as i32)
            .with_actual_change(i % 2 == 0);
            if i % 4 == 0 {
                event = event.with_field("cnxlostepsecs", format!("{}", i));
            }
            if i == 7 {
                event = event.with_field("description", "line\nbreak\r\u{1b}escape");
            }
            event
        })
        .collect();
    let summary = store
        .append("ABC:DEF", &mut stream("ABC:DEF", SampleKind::ScalarDouble, events.clone()))
        .unwrap();
    assert_eq!(summary.written, 32);

    let back = read(&store, "ABC:DEF", NEW_YEAR_EVE, NEW_YEAR_EVE + 4 * 3600);
    assert_eq!(back, events);

    // A range inside the data.
    let middle = read(&store, "ABC:DEF", NEW_YEAR_EVE + 3600, NEW_YEAR_EVE + 7199);
    // Starts with the sample in effect at +3600 (i = 7, stamped +3150.007).
    assert_eq!(middle.first().unwrap().timestamp.epoch_seconds(), NEW_YEAR_EVE + 3150);
    assert_eq!(middle.len(), 9);
    assert_eq!(
        store.first_known_event("ABC:DEF").unwrap().unwrap(),
        events[0]
    );
    assert_eq!(
        store.last_known_event("ABC:DEF").unwrap().unwrap(),
        events[31]
    );
}

// ============================================================================
// Range reads
// ============================================================================

/// One sample a day, each in its own daily partition.
fn sparse_daily_store(temp_dir: &TempDir) -> SharedStore {
    let url = format!(
        "pb://localhost?name=STS&rootFolder={}&partitionGranularity=PARTITION_DAY",
        temp_dir.path().display()
    );
    let store = store_from_url(&url).unwrap();
    let events = [10, 86_421, 172_830]
        .into_iter()
        .map(|offset| {
            Event::new(
                Timestamp::from_epoch_seconds(DECEMBER + offset),
                SampleValue::Double(offset as f64),
            )
        })
        .collect();
    store
        .append("ABC:DEF", &mut stream("ABC:DEF", SampleKind::ScalarDouble, events))
        .unwrap();
    store
}

/// Reads `[start, end]` (seconds after `DECEMBER`) as offsets from `DECEMBER`.
fn window(store: &SharedStore, start: i64, end: i64) -> Vec<i64> {
    read(store.as_ref(), "ABC:DEF", DECEMBER + start, DECEMBER + end)
        .iter()
        .map(|e| e.timestamp.epoch_seconds() - DECEMBER)
        .collect()
}

/// A read starts with the last sample before the range, even from an older partition.
#[test]
fn test_range_read_includes_last_sample_before_start() {
    let temp_dir = TempDir::new().unwrap();
    let store = sparse_daily_store(&temp_dir);

    assert_eq!(window(&store, 86_500, 10 * 86_400), vec![86_421, 172_830]);

    // Nothing is stored inside the window; the value in effect still is.
    assert_eq!(window(&store, 172_801, 172_820), vec![86_421]);

    // A start on a sample needs nothing older.
    assert_eq!(window(&store, 86_421, 86_500), vec![86_421]);

    assert!(window(&store, -86_400, 5).is_empty());
}

/// Every window after the first sample yields data, whichever partition it falls in.
#[test]
fn test_every_window_after_first_sample_has_data() {
    let temp_dir = TempDir::new().unwrap();
    let store = sparse_daily_store(&temp_dir);

    for hour in 0..96 {
        let start = 60 + hour * 3600;
        let data = window(&store, start, start + 60);
        assert!(!data.is_empty(), "no data in the window at +{}", start);
        assert!(data[0] <= start);
    }
}

#[test]
fn test_waveform_and_string_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let url = format!(
        "pb://localhost?name=STS&rootFolder={}&partitionGranularity=PARTITION_DAY",
        temp_dir.path().display()
    );
    let store = store_from_url(&url).unwrap();

    let waveforms: Vec<Event> = (0..5)
        .map(|i| {
            Event::new(
                Timestamp::from_epoch_seconds(NEW_YEAR_EVE + i),
                SampleValue::DoubleArray(vec![i as f64, -1.5, f64::MAX]),
            )
        })
        .collect();
    let mut description =
        StreamDescription::new("WF:DOUBLE", SampleKind::WaveformDouble, "test");
    description = description.with_element_count(3);
    store
        .append("WF:DOUBLE", &mut VecEventStream::new(description, waveforms.clone()))
        .unwrap();
    assert_eq!(read(store.as_ref(), "WF:DOUBLE", NEW_YEAR_EVE, NEW_YEAR_EVE + 10), waveforms);

    let strings: Vec<Event> = (0..5)
        .map(|i| {
            Event::new(
                Timestamp::from_epoch_seconds(NEW_YEAR_EVE + i),
                SampleValue::Str(format!("state\n{}", i)),
            )
        })
        .collect();
    store
        .append("STR:PV", &mut stream("STR:PV", SampleKind::ScalarString, strings.clone()))
        .unwrap();
    assert_eq!(read(store.as_ref(), "STR:PV", NEW_YEAR_EVE, NEW_YEAR_EVE + 10), strings);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_append_then_read_returns_input(
        gaps in proptest::collection::vec(1i64..4000, 1..80),
        values in proptest::collection::vec(-1e6f64..1e6, 80),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let store = PlainStore::new(StoreConfig::plain(
            "STS",
            temp_dir.path(),
            PartitionGranularity::Hour,
        ))
        .unwrap();
        let mut t = NEW_YEAR_EVE - 3 * 3600;
        let events: Vec<Event> = gaps
            .iter()
            .zip(values.iter())
            .map(|(gap, value)| {
                t += gap;
                Event::new(Timestamp::from_epoch_seconds(t), SampleValue::Double(*value))
            })
            .collect();
        store
            .append("ABC:DEF", &mut stream("ABC:DEF", SampleKind::ScalarDouble, events.clone()))
            .unwrap();
        let back = read(&store, "ABC:DEF", NEW_YEAR_EVE - 4 * 3600, t + 1);
        prop_assert_eq!(back, events);
    }
}

// ============================================================================
// Rename, delete and convert
// ============================================================================

#[test]
fn test_convert_keeps_the_file_set() {
    let temp_dir = TempDir::new().unwrap();
    let store = PlainStore::new(StoreConfig::plain(
        "STS",
        temp_dir.path(),
        PartitionGranularity::Hour,
    ))
    .unwrap();
    let events: Vec<Event> = (0..24)
        .map(|i| {
            Event::new(
                Timestamp::from_epoch_seconds(NEW_YEAR_EVE + i * 600),
                SampleValue::Double(i as f64 + 0.75),
            )
        })
        .collect();
    store
        .append("ABC:DEF", &mut stream("ABC:DEF", SampleKind::ScalarDouble, events))
        .unwrap();

    let names = |store: &PlainStore| -> Vec<String> {
        let mut names: Vec<String> = store
            .layout()
            .list_partition_files("ABC:DEF", PARTITION_EXTENSION)
            .unwrap()
            .into_iter()
            .map(|file| file.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    };
    let before = names(&store);
    assert_eq!(before.len(), 4);

    store
        .convert("ABC:DEF", &TypeConversion::new(SampleKind::ScalarShort))
        .unwrap();
    assert_eq!(names(&store), before);
    let (dir, _) = store.layout().pv_dir_and_prefix("ABC:DEF");
    let leftovers = fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains("_tmp_"))
        .count();
    assert_eq!(leftovers, 0);

    let back = read(&store, "ABC:DEF", NEW_YEAR_EVE, NEW_YEAR_EVE + 86_400);
    assert_eq!(back.len(), 24);
    assert_eq!(back[3].value, SampleValue::Short(3));
    assert_eq!(back[3].kind(), SampleKind::ScalarShort);
}

#[test]
fn test_rename_moves_data_to_new_name() {
    let temp_dir = TempDir::new().unwrap();
    let store = PlainStore::new(StoreConfig::plain(
        "STS",
        temp_dir.path(),
        PartitionGranularity::Hour,
    ))
    .unwrap();
    let events: Vec<Event> = (0..10)
        .map(|i| {
            Event::new(
                Timestamp::from_epoch_seconds(NEW_YEAR_EVE + i * 900),
                SampleValue::Int(i as i32),
            )
        })
        .collect();
    store
        .append("OLD:NAME", &mut stream("OLD:NAME", SampleKind::ScalarInt, events.clone()))
        .unwrap();

    store.rename("OLD:NAME", "NEW:NAME").unwrap();
    assert!(read(&store, "OLD:NAME", NEW_YEAR_EVE, NEW_YEAR_EVE + 86_400).is_empty());
    let moved = read(&store, "NEW:NAME", NEW_YEAR_EVE, NEW_YEAR_EVE + 86_400);
    assert_eq!(moved.len(), events.len());
    assert!(moved.iter().zip(&events).all(|(a, b)| a.value == b.value));

    store.delete("NEW:NAME").unwrap();
    assert!(store.last_known_event("NEW:NAME").unwrap().is_none());
}

// ============================================================================
// Merge-dedup over two stores
// ============================================================================

#[test]
fn test_merge_local_and_failover_stores() {
    let temp_dir = TempDir::new().unwrap();
    let local = PlainStore::new(StoreConfig::plain(
        "LOCAL",
        temp_dir.path().join("local"),
        PartitionGranularity::Hour,
    ))
    .unwrap();
    let remote = PlainStore::new(StoreConfig::plain(
        "REMOTE",
        temp_dir.path().join("remote"),
        PartitionGranularity::Day,
    ))
    .unwrap();

    let make = |seconds: Vec<i64>, value: f64| -> Vec<Event> {
        seconds
            .into_iter()
            .map(|s| {
                Event::new(
                    Timestamp::from_epoch_seconds(NEW_YEAR_EVE + s),
                    SampleValue::Double(value),
                )
            })
            .collect()
    };
    let coarse = make((0..20).map(|i| i * 600).collect(), 1.0);
    local
        .append("ABC:DEF", &mut stream("ABC:DEF", SampleKind::ScalarDouble, coarse))
        .unwrap();
    let fine = make((0..40).map(|i| i * 300).collect(), 2.0);
    remote
        .append("ABC:DEF", &mut stream("ABC:DEF", SampleKind::ScalarDouble, fine))
        .unwrap();

    let start = Timestamp::from_epoch_seconds(NEW_YEAR_EVE);
    let end = Timestamp::from_epoch_seconds(NEW_YEAR_EVE + 86_400);
    let mut merged = MergeDedupStream::new(
        local.get_data("ABC:DEF", start, end).unwrap(),
        remote.get_data("ABC:DEF", start, end).unwrap(),
    );
    let events = collect_events(&mut merged).unwrap();
    assert_eq!(events.len(), 40);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.timestamp.epoch_seconds(), NEW_YEAR_EVE + i as i64 * 300);
        let expected = if i % 2 == 0 { 1.0 } else { 2.0 };
        assert_eq!(event.value, SampleValue::Double(expected));
    }
}
