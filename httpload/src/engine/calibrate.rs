use std::{fmt, time::Duration};

use serde::Serialize;

use super::AggregateResult;
use crate::utils::env;

/// A (concurrency, rate) pair the target is driven at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperatingPoint {
    pub concurrency: u32,
    /// Requests per second, 0 = unlimited.
    pub rate: u32,
}

impl fmt::Display for OperatingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rate == 0 {
            write!(f, "concurrency={} rate=unlimited", self.concurrency)
        } else {
            write!(f, "concurrency={} rate={}/s", self.concurrency, self.rate)
        }
    }
}

/// Dimensions fixed by the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pins {
    pub concurrency: Option<u32>,
    pub rate: Option<u32>,
}

impl Pins {
    /// The operating point when nothing is left to calibrate.
    pub fn resolved(&self) -> Option<OperatingPoint> {
        Some(OperatingPoint {
            concurrency: self.concurrency?,
            rate: self.rate?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationPolicy {
    /// Starting point for every dimension that is not pinned.
    pub seed: OperatingPoint,
    /// Multiplier applied to unpinned dimensions after a healthy burst.
    pub growth: u32,
    /// Fraction of a breaching point that is kept when backing off.
    pub backoff: f64,
    /// Error rate above which a burst breaches.
    pub max_error_rate: f64,
    /// p99 latency, as multiple of the first burst's p99, above which a burst breaches.
    pub max_latency_factor: f64,
    /// Fraction of a pinned rate that counts as "reached".
    pub saturation_ratio: f64,
    pub burst_duration: Duration,
    pub max_bursts: usize,
    pub max_concurrency: u32,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            seed: OperatingPoint {
                concurrency: 8,
                rate: 50,
            },
            growth: 2,
            backoff: 0.5,
            max_error_rate: 0.05,
            max_latency_factor: 4.,
            saturation_ratio: 0.95,
            burst_duration: Duration::from_secs(3),
            max_bursts: 8,
            max_concurrency: env::max_concurrency(),
        }
    }
}

/// Why a burst was considered too heavy for the target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Breach {
    ErrorRate { observed: f64, ceiling: f64 },
    Latency { p99_ms: f64, baseline_p99_ms: f64 },
    /// Not a single request completed within the burst.
    NoSamples,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breach::ErrorRate { observed, ceiling } => write!(
                f,
                "error rate {:.2}% above {:.2}%",
                observed * 100.,
                ceiling * 100.
            ),
            Breach::Latency {
                p99_ms,
                baseline_p99_ms,
            } => write!(
                f,
                "p99 latency {p99_ms:.2}ms degraded from baseline {baseline_p99_ms:.2}ms"
            ),
            Breach::NoSamples => write!(f, "no request completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Convergence {
    /// A burst breached, the point was backed off.
    BackedOff { breach: Breach },
    /// The pinned rate is sustained, more workers are pointless.
    RateReached,
    /// The pinned workers fell short of the probed rate,
    /// the last rate they sustained is used.
    Saturated,
    /// All unpinned dimensions hit their ceiling.
    Ceiling,
    BurstLimit,
    /// Calibration was interrupted, the last healthy point (or seed) is used.
    Interrupted,
}

impl fmt::Display for Convergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convergence::BackedOff { breach } => write!(f, "backed off after breach: {breach}"),
            Convergence::RateReached => write!(f, "pinned rate reached"),
            Convergence::Saturated => write!(f, "pinned workers saturated"),
            Convergence::Ceiling => write!(f, "concurrency ceiling reached"),
            Convergence::BurstLimit => write!(f, "burst limit reached"),
            Convergence::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchStep {
    /// Run another burst at this point.
    Probe(OperatingPoint),
    Converged {
        point: OperatingPoint,
        reason: Convergence,
    },
}

/// Burst search over the unpinned dimensions.
///
/// Seed -> probe -> (healthy: grow and probe again | breach: back off) -> converged.
/// The search only consumes [`AggregateResult`]s, it never touches the network.
#[derive(Debug, Clone)]
pub struct BurstSearch {
    policy: CalibrationPolicy,
    pins: Pins,
    seed: OperatingPoint,
    current: OperatingPoint,
    last_healthy: Option<OperatingPoint>,
    baseline_p99_ms: Option<f64>,
    bursts: usize,
    converged: Option<(OperatingPoint, Convergence)>,
}

impl BurstSearch {
    pub fn new(policy: CalibrationPolicy, pins: Pins) -> Self {
        let max_concurrency = policy.max_concurrency.max(1);
        let seed = OperatingPoint {
            concurrency: pins
                .concurrency
                .unwrap_or(policy.seed.concurrency.clamp(1, max_concurrency)),
            rate: pins.rate.unwrap_or(policy.seed.rate.max(1)),
        };

        Self {
            policy,
            pins,
            seed,
            current: seed,
            last_healthy: None,
            baseline_p99_ms: None,
            bursts: 0,
            converged: None,
        }
    }

    /// The point the next burst should run at.
    pub fn current(&self) -> OperatingPoint {
        self.current
    }

    #[cfg(test)]
    pub fn bursts(&self) -> usize {
        self.bursts
    }

    pub fn burst_duration(&self) -> Duration {
        self.policy.burst_duration
    }

    /// Feed the summary of the burst that ran at [`Self::current`].
    pub fn observe(&mut self, result: &AggregateResult) -> SearchStep {
        if let Some((point, reason)) = self.converged {
            return SearchStep::Converged { point, reason };
        }

        self.bursts += 1;

        if let Some(breach) = self.breach(result) {
            let point = self.back_off(self.current);
            return self.converge(point, Convergence::BackedOff { breach });
        }

        let previous = self.last_healthy.replace(self.current);

        if self.pins.concurrency.is_some()
            && self.pins.rate.is_none()
            && result.throughput < self.current.rate as f64 * self.policy.saturation_ratio
        {
            return self.converge(previous.unwrap_or(self.current), Convergence::Saturated);
        }

        if let Some(rate) = self.pins.rate
            && self.pins.concurrency.is_none()
            && result.throughput >= rate as f64 * self.policy.saturation_ratio
        {
            return self.converge(self.current, Convergence::RateReached);
        }

        if self.bursts >= self.policy.max_bursts {
            return self.converge(self.current, Convergence::BurstLimit);
        }

        let next = self.grow(self.current);
        if next == self.current {
            return self.converge(self.current, Convergence::Ceiling);
        }

        self.current = next;
        SearchStep::Probe(next)
    }

    /// Point to use when calibration is interrupted.
    pub fn interrupt(&mut self) -> OperatingPoint {
        if let Some((point, _)) = self.converged {
            return point;
        }
        let point = self.last_healthy.unwrap_or(self.seed);
        self.converged = Some((point, Convergence::Interrupted));
        point
    }

    fn converge(&mut self, point: OperatingPoint, reason: Convergence) -> SearchStep {
        self.converged = Some((point, reason));
        SearchStep::Converged { point, reason }
    }

    fn breach(&mut self, result: &AggregateResult) -> Option<Breach> {
        if result.total == 0 {
            return Some(Breach::NoSamples);
        }

        if result.error_rate > self.policy.max_error_rate {
            return Some(Breach::ErrorRate {
                observed: result.error_rate,
                ceiling: self.policy.max_error_rate,
            });
        }

        let p99_ms = result.latency.p99;
        match self.baseline_p99_ms {
            None => {
                self.baseline_p99_ms = Some(p99_ms);
                None
            }
            Some(baseline_p99_ms)
                if baseline_p99_ms > 0.
                    && p99_ms > baseline_p99_ms * self.policy.max_latency_factor =>
            {
                Some(Breach::Latency {
                    p99_ms,
                    baseline_p99_ms,
                })
            }
            Some(_) => None,
        }
    }

    fn grow(&self, point: OperatingPoint) -> OperatingPoint {
        let growth = self.policy.growth.max(2);
        OperatingPoint {
            concurrency: match self.pins.concurrency {
                Some(pinned) => pinned,
                None => point
                    .concurrency
                    .saturating_mul(growth)
                    .min(self.policy.max_concurrency.max(1)),
            },
            rate: match self.pins.rate {
                Some(pinned) => pinned,
                None => point.rate.saturating_mul(growth),
            },
        }
    }

    /// Back off the dimensions that grew into the breach,
    /// never below the seed.
    fn back_off(&self, breached: OperatingPoint) -> OperatingPoint {
        let backoff = self.policy.backoff.clamp(0., 1.);
        let scale = |value: u32, seed: u32, healthy: Option<u32>| {
            if healthy == Some(value) {
                // did not grow into this breach (ceiling)
                return value;
            }
            ((value as f64 * backoff).floor() as u32).max(seed)
        };

        OperatingPoint {
            concurrency: match self.pins.concurrency {
                Some(pinned) => pinned,
                None => scale(
                    breached.concurrency,
                    self.seed.concurrency,
                    self.last_healthy.map(|p| p.concurrency),
                ),
            },
            rate: match self.pins.rate {
                Some(pinned) => pinned,
                None => scale(
                    breached.rate,
                    self.seed.rate,
                    self.last_healthy.map(|p| p.rate),
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests;
