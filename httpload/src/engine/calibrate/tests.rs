use std::collections::BTreeMap;

use super::*;
use crate::engine::{FailureCounts, LatencyPercentiles, Stage};

fn policy() -> CalibrationPolicy {
    CalibrationPolicy {
        max_concurrency: 1024,
        ..Default::default()
    }
}

fn point(concurrency: u32, rate: u32) -> OperatingPoint {
    OperatingPoint { concurrency, rate }
}

fn burst(at: OperatingPoint, total: u64, errors: u64, p99_ms: f64, throughput: f64) -> AggregateResult {
    AggregateResult {
        stage: Stage::calibration(0, at, Duration::from_secs(3)),
        elapsed: 3.,
        total,
        ok: total - errors,
        failures: FailureCounts {
            status: errors,
            ..Default::default()
        },
        bytes: 0,
        throughput,
        error_rate: if total > 0 {
            errors as f64 / total as f64
        } else {
            0.
        },
        latency: LatencyPercentiles {
            min: p99_ms / 4.,
            mean: p99_ms / 2.,
            p50: p99_ms / 2.,
            p90: p99_ms,
            p99: p99_ms,
            max: p99_ms,
        },
        status_codes: BTreeMap::new(),
    }
}

/// Simulated target that serves at most `capacity` rps,
/// failing half of its requests above it.
fn target(at: OperatingPoint, capacity: u32) -> AggregateResult {
    let total = u64::from(at.rate) * 3;
    if at.rate > capacity {
        burst(at, total, total / 2, 20., at.rate as f64)
    } else {
        burst(at, total, 0, 10., at.rate as f64)
    }
}

fn run_to_convergence(search: &mut BurstSearch, capacity: u32) -> (OperatingPoint, Convergence) {
    loop {
        let result = target(search.current(), capacity);
        match search.observe(&result) {
            SearchStep::Probe(_) => continue,
            SearchStep::Converged { point, reason } => return (point, reason),
        }
    }
}

#[test]
fn starts_at_the_seed() {
    let search = BurstSearch::new(policy(), Pins::default());
    assert_eq!(point(8, 50), search.current());
    assert_eq!(0, search.bursts());
}

#[test]
fn pinned_dimensions_replace_the_seed() {
    let search = BurstSearch::new(
        policy(),
        Pins {
            concurrency: Some(3),
            rate: None,
        },
    );
    assert_eq!(point(3, 50), search.current());
}

#[test]
fn converges_below_target_capacity() {
    let mut search = BurstSearch::new(policy(), Pins::default());
    let (converged, reason) = run_to_convergence(&mut search, 200);

    assert!(converged.rate <= 200, "converged at {converged}");
    assert!(converged.rate >= 50, "converged at {converged}");
    assert_eq!(point(32, 200), converged);
    assert!(matches!(
        reason,
        Convergence::BackedOff {
            breach: Breach::ErrorRate { .. }
        }
    ));
    assert_eq!(4, search.bursts());
}

#[test]
fn healthy_bursts_double_unpinned_dimensions() {
    let mut search = BurstSearch::new(policy(), Pins::default());
    let step = search.observe(&target(search.current(), u32::MAX));
    assert_eq!(SearchStep::Probe(point(16, 100)), step);
    let step = search.observe(&target(search.current(), u32::MAX));
    assert_eq!(SearchStep::Probe(point(32, 200)), step);
}

#[test]
fn first_burst_breach_falls_back_to_seed() {
    let mut search = BurstSearch::new(policy(), Pins::default());
    let (converged, _) = run_to_convergence(&mut search, 10);
    assert_eq!(point(8, 50), converged);
    assert_eq!(1, search.bursts());
}

#[test]
fn burst_without_samples_is_a_breach() {
    let mut search = BurstSearch::new(policy(), Pins::default());
    let step = search.observe(&burst(search.current(), 0, 0, 0., 0.));
    assert_eq!(
        SearchStep::Converged {
            point: point(8, 50),
            reason: Convergence::BackedOff {
                breach: Breach::NoSamples
            },
        },
        step
    );
}

#[test]
fn latency_degradation_is_a_breach() {
    let mut search = BurstSearch::new(policy(), Pins::default());

    // baseline p99 of 10ms
    let step = search.observe(&burst(search.current(), 150, 0, 10., 50.));
    assert_eq!(SearchStep::Probe(point(16, 100)), step);
    let step = search.observe(&burst(search.current(), 300, 0, 30., 100.));
    assert_eq!(SearchStep::Probe(point(32, 200)), step);

    let step = search.observe(&burst(search.current(), 600, 0, 41., 200.));
    let SearchStep::Converged { point: p, reason } = step else {
        panic!("expected convergence, got {step:?}");
    };
    assert_eq!(point(16, 100), p);
    assert_eq!(
        Convergence::BackedOff {
            breach: Breach::Latency {
                p99_ms: 41.,
                baseline_p99_ms: 10.,
            }
        },
        reason
    );
}

#[test]
fn pinned_rate_is_held_and_converges_once_reached() {
    let pins = Pins {
        concurrency: None,
        rate: Some(100),
    };
    let mut search = BurstSearch::new(policy(), pins);
    assert_eq!(point(8, 100), search.current());

    // too few workers to sustain the rate
    let step = search.observe(&burst(search.current(), 180, 0, 10., 60.));
    assert_eq!(SearchStep::Probe(point(16, 100)), step);

    let step = search.observe(&burst(search.current(), 290, 0, 10., 96.));
    assert_eq!(
        SearchStep::Converged {
            point: point(16, 100),
            reason: Convergence::RateReached,
        },
        step
    );
}

#[test]
fn pinned_concurrency_is_never_changed() {
    let pins = Pins {
        concurrency: Some(4),
        rate: None,
    };
    let mut search = BurstSearch::new(policy(), pins);
    let (converged, _) = run_to_convergence(&mut search, 300);
    assert_eq!(4, converged.concurrency);
    assert!(converged.rate <= 300);
}

#[test]
fn pinned_concurrency_converges_once_workers_saturate() {
    let pins = Pins {
        concurrency: Some(1),
        rate: None,
    };
    let mut search = BurstSearch::new(policy(), pins);

    // a single worker sustains about 150 rps
    let sustained = |at: OperatingPoint| burst(at, 450, 0, 6., f64::from(at.rate).min(150.));

    let step = search.observe(&sustained(search.current()));
    assert_eq!(SearchStep::Probe(point(1, 100)), step);
    let step = search.observe(&sustained(search.current()));
    assert_eq!(SearchStep::Probe(point(1, 200)), step);
    let step = search.observe(&sustained(search.current()));
    assert_eq!(
        SearchStep::Converged {
            point: point(1, 100),
            reason: Convergence::Saturated,
        },
        step
    );
}

#[test]
fn saturated_seed_is_kept() {
    let pins = Pins {
        concurrency: Some(1),
        rate: None,
    };
    let mut search = BurstSearch::new(policy(), pins);
    let step = search.observe(&burst(search.current(), 30, 0, 100., 10.));
    assert_eq!(
        SearchStep::Converged {
            point: point(1, 50),
            reason: Convergence::Saturated,
        },
        step
    );
}

#[test]
fn concurrency_ceiling_ends_the_search() {
    let pins = Pins {
        concurrency: None,
        rate: Some(1000),
    };
    let mut search = BurstSearch::new(
        CalibrationPolicy {
            max_concurrency: 16,
            ..policy()
        },
        pins,
    );

    let step = search.observe(&burst(search.current(), 300, 0, 10., 100.));
    assert_eq!(SearchStep::Probe(point(16, 1000)), step);
    let step = search.observe(&burst(search.current(), 600, 0, 10., 200.));
    assert_eq!(
        SearchStep::Converged {
            point: point(16, 1000),
            reason: Convergence::Ceiling,
        },
        step
    );
}

#[test]
fn breach_at_ceiling_keeps_capped_concurrency() {
    let mut search = BurstSearch::new(
        CalibrationPolicy {
            max_concurrency: 16,
            ..policy()
        },
        Pins::default(),
    );

    let _ = search.observe(&target(search.current(), 150));
    let step = search.observe(&target(search.current(), 150));
    // concurrency capped, rate still grows
    assert_eq!(SearchStep::Probe(point(16, 200)), step);
    let step = search.observe(&target(search.current(), 150));
    let SearchStep::Converged { point: p, .. } = step else {
        panic!("expected convergence, got {step:?}");
    };
    assert_eq!(point(16, 100), p);
}

#[test]
fn burst_limit_converges_on_last_healthy_point() {
    let mut search = BurstSearch::new(
        CalibrationPolicy {
            max_bursts: 3,
            ..policy()
        },
        Pins::default(),
    );
    let (converged, reason) = run_to_convergence(&mut search, u32::MAX);
    assert_eq!(point(32, 200), converged);
    assert_eq!(Convergence::BurstLimit, reason);
    assert_eq!(3, search.bursts());
}

#[test]
fn repeated_calibration_on_a_stable_target_agrees() {
    // stable target with a few percent of noise on every burst
    let noisy = |at: OperatingPoint| {
        let noise = 1. + (rand::random::<f64>() - 0.5) / 10.;
        let total = u64::from(at.rate) * 3;
        let errors = if at.rate > 300 {
            total / 2
        } else {
            (total as f64 * 0.02 * rand::random::<f64>()) as u64
        };
        burst(at, total, errors, 10. * noise, at.rate as f64 * noise)
    };
    let calibrate = || {
        let mut search = BurstSearch::new(policy(), Pins::default());
        loop {
            match search.observe(&noisy(search.current())) {
                SearchStep::Probe(_) => continue,
                SearchStep::Converged { point, .. } => return point,
            }
        }
    };

    for _ in 0..10 {
        let first = calibrate();
        let second = calibrate();
        let within_step = |a: u32, b: u32| a.max(b) <= a.min(b) * 2;
        assert!(
            within_step(first.concurrency, second.concurrency)
                && within_step(first.rate, second.rate),
            "{first} vs {second}"
        );
    }
}

#[test]
fn observing_after_convergence_is_idempotent() {
    let mut search = BurstSearch::new(policy(), Pins::default());
    let (converged, reason) = run_to_convergence(&mut search, 200);
    let bursts = search.bursts();

    let step = search.observe(&target(point(1000, 10_000), 200));
    assert_eq!(
        SearchStep::Converged {
            point: converged,
            reason
        },
        step
    );
    assert_eq!(bursts, search.bursts());
    assert_eq!(converged, search.interrupt());
}

#[test]
fn interrupt_uses_last_healthy_point_or_seed() {
    let mut search = BurstSearch::new(policy(), Pins::default());
    assert_eq!(point(8, 50), search.interrupt());

    let mut search = BurstSearch::new(policy(), Pins::default());
    let _ = search.observe(&target(search.current(), u32::MAX));
    let _ = search.observe(&target(search.current(), u32::MAX));
    assert_eq!(point(16, 100), search.interrupt());
}
