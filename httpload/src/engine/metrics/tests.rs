use std::{sync::Arc, time::SystemTime};

use super::*;
use tokio::time;

fn stage() -> Stage {
    Stage::main(
        OperatingPoint {
            concurrency: 4,
            rate: 100,
        },
        Duration::from_secs(20),
    )
}

fn ok_sample(latency_ms: u64) -> Sample {
    Sample {
        ts: SystemTime::now(),
        latency: Duration::from_millis(latency_ms),
        status: Some(200),
        failure: None,
        bytes: 10,
    }
}

fn failed_sample(kind: FailureKind, status: Option<u16>) -> Sample {
    Sample {
        ts: SystemTime::now(),
        latency: Duration::from_millis(5),
        status,
        failure: Some(kind),
        bytes: 0,
    }
}

#[test]
fn empty_stage_snapshot() {
    let metrics = StageMetrics::try_new(stage()).unwrap();
    let summary = metrics.snapshot();
    assert_eq!(0, summary.total);
    assert_eq!(0., summary.error_rate);
    assert_eq!(LatencyPercentiles::default(), summary.latency);
    assert!(summary.status_codes.is_empty());
}

#[test]
fn record_counts_outcomes() {
    let metrics = StageMetrics::try_new(stage()).unwrap();
    for _ in 0..6 {
        metrics.record(&ok_sample(10));
    }
    metrics.record(&failed_sample(FailureKind::Status, Some(503)));
    metrics.record(&failed_sample(FailureKind::Status, Some(503)));
    metrics.record(&failed_sample(FailureKind::Timeout, None));
    metrics.record(&failed_sample(FailureKind::Transport, None));

    let summary = metrics.snapshot();
    assert_eq!(10, summary.total);
    assert_eq!(6, summary.ok);
    assert_eq!(
        FailureCounts {
            status: 2,
            timeout: 1,
            transport: 1,
            body: 0,
        },
        summary.failures
    );
    assert_eq!(60, summary.bytes);
    assert!((summary.error_rate - 0.4).abs() < f64::EPSILON);
    assert_eq!(Some(&6), summary.status_codes.get(&200));
    assert_eq!(Some(&2), summary.status_codes.get(&503));
    assert_eq!(summary.total, summary.ok + summary.failures.total());
}

#[test]
fn percentiles_are_monotonic_and_bounded() {
    let metrics = StageMetrics::try_new(stage()).unwrap();

    // skewed distribution with a long tail
    let latencies: Vec<u64> = (1..=2_000u64).map(|i| (i * i * 7919) % 1_499 + 1).collect();
    for latency in &latencies {
        metrics.record(&ok_sample(*latency));
    }

    let min = *latencies.iter().min().unwrap() as f64;
    let max = *latencies.iter().max().unwrap() as f64;

    let p = metrics.snapshot().latency;
    assert_eq!(min, p.min);
    assert_eq!(max, p.max);
    assert!(p.min <= p.p50, "{p:?}");
    assert!(p.p50 <= p.p90, "{p:?}");
    assert!(p.p90 <= p.p99, "{p:?}");
    assert!(p.p99 <= p.max, "{p:?}");
    assert!(p.min <= p.mean && p.mean <= p.max, "{p:?}");
}

#[test]
fn percentiles_of_a_constant_latency() {
    let metrics = StageMetrics::try_new(stage()).unwrap();
    for _ in 0..1_000 {
        metrics.record(&ok_sample(42));
    }

    let p = metrics.snapshot().latency;
    assert_eq!(42., p.min);
    assert_eq!(42., p.p50);
    assert_eq!(42., p.p99);
    assert_eq!(42., p.max);
}

#[test]
fn extreme_latencies_are_saturated() {
    let metrics = StageMetrics::try_new(stage()).unwrap();
    metrics.record(&Sample {
        latency: Duration::ZERO,
        ..ok_sample(0)
    });
    metrics.record(&Sample {
        latency: Duration::from_secs(10 * 3600),
        ..ok_sample(0)
    });

    let summary = metrics.snapshot();
    assert_eq!(2, summary.total);
    assert_eq!(0., summary.latency.min);
    assert_eq!(36_000_000., summary.latency.max);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_records_are_never_lost() {
    let metrics = Arc::new(StageMetrics::try_new(stage()).unwrap());

    let mut handles = Vec::new();
    for worker in 0..32u64 {
        let metrics = metrics.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..500u64 {
                if (worker + i) % 10 == 0 {
                    metrics.record(&failed_sample(FailureKind::Timeout, None));
                } else {
                    metrics.record(&ok_sample(1 + i % 50));
                }
                if i % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let summary = metrics.snapshot();
    assert_eq!(32 * 500, summary.total);
    assert_eq!(1_600, summary.failures.timeout);
    assert_eq!(summary.total, summary.ok + summary.failures.total());
}

#[tokio::test(start_paused = true)]
async fn closing_freezes_the_throughput_window() {
    let metrics = StageMetrics::try_new(stage()).unwrap();
    for _ in 0..100 {
        metrics.record(&ok_sample(1));
    }

    time::advance(Duration::from_secs(10)).await;
    metrics.close();

    // late completions still count, the window does not grow
    time::advance(Duration::from_secs(5)).await;
    for _ in 0..50 {
        metrics.record(&ok_sample(1));
    }
    metrics.close();

    let summary = metrics.snapshot();
    assert_eq!(150, summary.total);
    assert!((summary.elapsed - 10.).abs() < 1e-6, "{}", summary.elapsed);
    assert!((summary.throughput - 15.).abs() < 1e-6, "{}", summary.throughput);
}
