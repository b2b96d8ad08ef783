//! Property tests over the telemetry store contracts

use im_common::{TelemetryPoint, TelemetryValue};
use im_store::memory::MemoryTelemetry;
use im_store::{AggregateFunction, TelemetryFilter, TelemetryRepository};
use proptest::prelude::*;

fn arb_points() -> impl Strategy<Value = Vec<TelemetryPoint>> {
    prop::collection::vec((0i64..10_000, 0u32..3, -1000.0f64..1000.0), 0..200).prop_map(|rows| {
        rows.into_iter()
            .map(|(ts, seq, v)| {
                let mut point = TelemetryPoint::new("d1", "t1", ts, TelemetryValue::Float64(v));
                point.seq = seq;
                point
            })
            .collect()
    })
}

proptest! {
    /// Appending a batch twice is observationally equal to appending it once
    #[test]
    fn append_is_idempotent(points in arb_points()) {
        tokio_test::block_on(async {
            let store = MemoryTelemetry::new();
            store.append(points.clone()).await.unwrap();
            let once = store.query(&TelemetryFilter::default()).await.unwrap();
            store.append(points).await.unwrap();
            let twice = store.query(&TelemetryFilter::default()).await.unwrap();
            assert_eq!(once, twice);
        });
    }

    /// Count buckets over a range sum to the row count of the same range
    #[test]
    fn aggregate_count_is_total(points in arb_points(), bucket_ms in 1i64..2_000) {
        tokio_test::block_on(async {
            let store = MemoryTelemetry::new();
            store.append(points).await.unwrap();
            let buckets = store
                .aggregate("d1", "t1", 0, 10_000, bucket_ms, AggregateFunction::Count)
                .await
                .unwrap();
            let total: f64 = buckets.iter().map(|b| b.value).sum();
            let rows = store.query_simple("d1", Some("t1"), 0, 10_000, usize::MAX).await.unwrap();
            assert_eq!(total as usize, rows.len());
        });
    }

    /// Narrowing any filter never returns more rows
    #[test]
    fn narrowing_is_monotone(points in arb_points(), start in 0i64..10_000, span in 0i64..10_000) {
        tokio_test::block_on(async {
            let store = MemoryTelemetry::new();
            store.append(points).await.unwrap();
            let all = store.query(&TelemetryFilter::default()).await.unwrap();
            let narrowed = store
                .query(&TelemetryFilter {
                    start: Some(start),
                    end: Some(start + span),
                    ..TelemetryFilter::default()
                })
                .await
                .unwrap();
            assert!(narrowed.len() <= all.len());
        });
    }
}
