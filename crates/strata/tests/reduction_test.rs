//! Integration tests for reductions and conversions applied during ETL.
//!
//! Reading a reduced destination must give exactly what the same
//! post-processor produces over the raw data at query time.

use alopex_strata::config::{EtlOptions, StaticConfigService};
use alopex_strata::etl::EtlExecutor;
use alopex_strata::event::{collect_events, BoxedEventStream, EventStream, VecEventStream};
use alopex_strata::postprocess::{
    post_processor_for, ConversionFunction, PostProcessor, TypeConversion,
};
use alopex_strata::store::{store_from_config, StoreConfig};
use alopex_strata::{
    Event, PartitionGranularity, SampleKind, SampleValue, SharedStore, StoragePlugin,
    StreamDescription, Timestamp,
};
use std::sync::Arc;
use tempfile::TempDir;

const PV: &str = "ABC:REDUCE";
// 2012-01-01T00:00:00Z
const T0: i64 = 1_325_376_000;
const DAY: i64 = 86_400;

const DIRECTIVES: [&str; 19] = [
    "firstSample_3600",
    "lastSample",
    "firstFill_3600",
    "lastFill",
    "mean_600",
    "min",
    "max",
    "median",
    "std",
    "variance",
    "popvariance",
    "count",
    "ncount",
    "jitter",
    "kurtosis_3600",
    "skewness_3600",
    "nth_5",
    "ignoreflyers",
    "flyers_900_1.5",
];

/// Samples every 450 seconds with a gap from hour 5 to hour 8 so fill
/// variants have empty bins to fill.
fn raw_events(days: i64) -> Vec<Event> {
    (0..days * DAY / 450)
        .map(|i| T0 + i * 450)
        .filter(|t| !(T0 + 5 * 3600..T0 + 8 * 3600).contains(t))
        .map(|t| {
            let x = (t - T0) as f64 / 450.0;
            let spike = if (t - T0) % 7200 == 0 { 80.0 } else { 0.0 };
            Event::new(
                Timestamp::from_epoch_seconds(t),
                SampleValue::Double((x * 0.3).sin() * 10.0 + x % 7.0 + spike),
            )
            .with_severity(((t - T0) / 3600 % 3) as i32)
        })
        .collect()
}

fn raw_stream(events: Vec<Event>) -> VecEventStream {
    VecEventStream::new(
        StreamDescription::new(PV, SampleKind::ScalarDouble, "generator"),
        events,
    )
}

fn chain(temp_dir: &TempDir, dest: StoreConfig) -> (SharedStore, SharedStore, EtlExecutor) {
    let sts = store_from_config(StoreConfig::plain(
        "STS",
        temp_dir.path().join("sts"),
        PartitionGranularity::Hour,
    ))
    .unwrap();
    let mts = store_from_config(dest).unwrap();
    let service = Arc::new(StaticConfigService::new());
    service.register_pv_stores(PV, vec![sts.clone(), mts.clone()]);
    let executor = EtlExecutor::new(service, EtlOptions::default());
    (sts, mts, executor)
}

// Debug text compares NaN bins as equal.
fn timestamps_and_values(events: &[Event]) -> Vec<(Timestamp, String)> {
    events
        .iter()
        .map(|event| (event.timestamp, format!("{:?}", event.value)))
        .collect()
}

#[test]
fn test_reduced_destination_equals_query_time_reduction() {
    let days = 3;
    let migrated_until = T0 + 2 * DAY;

    for directive in DIRECTIVES {
        let temp_dir = TempDir::new().unwrap();
        let dest = StoreConfig::plain("MTS", temp_dir.path().join("mts"), PartitionGranularity::Day)
            .with_post_processor(directive);
        let (sts, mts, executor) = chain(&temp_dir, dest);
        sts.append(PV, &mut raw_stream(raw_events(days))).unwrap();

        let summary = executor.run_etl(Timestamp::from_epoch_seconds(migrated_until));
        assert!(summary.is_clean(), "{}: {:?}", directive, summary.failures);

        let mut stored = mts
            .get_data(
                PV,
                Timestamp::from_epoch_seconds(T0 - DAY),
                Timestamp::from_epoch_seconds(T0 + 10 * DAY),
            )
            .unwrap();
        let stored = collect_events(&mut stored).unwrap();

        let migrated: Vec<Event> = raw_events(days)
            .into_iter()
            .filter(|e| e.timestamp.epoch_seconds() < migrated_until)
            .collect();
        let post_processor = post_processor_for(directive).unwrap();
        let raw: BoxedEventStream = Box::new(raw_stream(migrated));
        let mut expected = post_processor.wrap(raw);
        let expected = collect_events(&mut expected).unwrap();

        assert!(!expected.is_empty(), "{} produced nothing", directive);
        assert_eq!(
            timestamps_and_values(&stored),
            timestamps_and_values(&expected),
            "{} differs between ETL and query time",
            directive
        );
    }
}

#[test]
fn test_fill_variants_cover_the_gap() {
    let temp_dir = TempDir::new().unwrap();
    let dest = StoreConfig::plain("MTS", temp_dir.path().join("mts"), PartitionGranularity::Day)
        .with_post_processor("lastFill_3600");
    let (sts, mts, executor) = chain(&temp_dir, dest);
    sts.append(PV, &mut raw_stream(raw_events(1))).unwrap();
    assert!(executor
        .run_etl(Timestamp::from_epoch_seconds(T0 + 2 * DAY))
        .is_clean());

    let mut stored = mts
        .get_data(
            PV,
            Timestamp::from_epoch_seconds(T0),
            Timestamp::from_epoch_seconds(T0 + DAY),
        )
        .unwrap();
    let stored = collect_events(&mut stored).unwrap();
    // One event per hour, including the three hours without samples.
    assert_eq!(stored.len(), 24);
    assert_eq!(stored[5].value, stored[4].value);
    assert_eq!(stored[7].value, stored[4].value);
}

#[test]
fn test_conversion_during_etl() {
    let temp_dir = TempDir::new().unwrap();
    let dest = StoreConfig::plain("MTS", temp_dir.path().join("mts"), PartitionGranularity::Day)
        .with_conversion(SampleKind::ScalarInt);
    let (sts, mts, executor) = chain(&temp_dir, dest);
    let events: Vec<Event> = (0..16)
        .map(|i| {
            Event::new(
                Timestamp::from_epoch_seconds(T0 + i * 450),
                SampleValue::Double(i as f64 * 1.25),
            )
        })
        .collect();
    sts.append(PV, &mut raw_stream(events.clone())).unwrap();
    assert!(executor
        .run_etl(Timestamp::from_epoch_seconds(T0 + 2 * 3600))
        .is_clean());

    let mut stored = mts
        .get_data(
            PV,
            Timestamp::from_epoch_seconds(T0),
            Timestamp::from_epoch_seconds(T0 + DAY),
        )
        .unwrap();
    assert_eq!(stored.description().kind, SampleKind::ScalarInt);
    let stored = collect_events(&mut stored).unwrap();

    let conversion = TypeConversion::new(SampleKind::ScalarInt);
    let expected: Vec<SampleValue> = events
        .iter()
        .map(|e| conversion.convert_value(&e.value).unwrap())
        .collect();
    let values: Vec<SampleValue> = stored.into_iter().map(|e| e.value).collect();
    assert_eq!(values, expected);
    assert!(conversion.should_convert(&StreamDescription::new(
        PV,
        SampleKind::ScalarDouble,
        "STS"
    )));
}
