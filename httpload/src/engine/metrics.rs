use std::{collections::BTreeMap, fmt, time::Duration};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use serde::Serialize;
use tokio::time::Instant;

use super::OperatingPoint;

/// Latency resolution is microseconds, 1µs up to one hour,
/// with 3 significant digits (~0.1% error) per bucket.
const HISTOGRAM_LOWEST: u64 = 1;
const HISTOGRAM_HIGHEST: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Response received, but not with the expected status code.
    Status,
    /// No (complete) response within the request timeout.
    Timeout,
    /// Connection or protocol error before a response was received.
    Transport,
    /// Response body could not be read.
    Body,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Status => "status",
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport",
            FailureKind::Body => "body",
        })
    }
}

/// Outcome of a single completed request.
#[derive(Debug, Clone)]
pub struct Sample {
    pub ts: std::time::SystemTime,
    /// Send until response head (or error).
    pub latency: Duration,
    pub status: Option<u16>,
    pub failure: Option<FailureKind>,
    pub bytes: u64,
}

/// A named phase of the run with its own target operating point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub name: String,
    pub point: OperatingPoint,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl Stage {
    pub fn calibration(index: usize, point: OperatingPoint, duration: Duration) -> Self {
        Self {
            name: format!("calibration-{index}"),
            point,
            duration,
        }
    }

    pub fn main(point: OperatingPoint, duration: Duration) -> Self {
        Self {
            name: "main".to_owned(),
            point,
            duration,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub status: u64,
    pub timeout: u64,
    pub transport: u64,
    pub body: u64,
}

impl FailureCounts {
    pub fn total(&self) -> u64 {
        self.status + self.timeout + self.transport + self.body
    }

    fn count(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Status => self.status += 1,
            FailureKind::Timeout => self.timeout += 1,
            FailureKind::Transport => self.transport += 1,
            FailureKind::Body => self.body += 1,
        }
    }
}

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub min: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub max: f64,
}

/// Point-in-time summary of a stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub stage: Stage,
    /// Seconds since the stage started,
    /// or the stage length once its admission window closed.
    pub elapsed: f64,
    pub total: u64,
    pub ok: u64,
    pub failures: FailureCounts,
    pub bytes: u64,
    /// Completed requests per second over `elapsed`.
    pub throughput: f64,
    pub error_rate: f64,
    pub latency: LatencyPercentiles,
    pub status_codes: BTreeMap<u16, u64>,
}

impl AggregateResult {
    /// Result of a stage that never ran.
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            elapsed: 0.,
            total: 0,
            ok: 0,
            failures: FailureCounts::default(),
            bytes: 0,
            throughput: 0.,
            error_rate: 0.,
            latency: LatencyPercentiles::default(),
            status_codes: BTreeMap::new(),
        }
    }
}

/// Aggregates all samples of requests started within one stage.
///
/// Recording is O(1): a few counters and a histogram bucket
/// updated in one short critical section, memory does not grow
/// with the amount of requests.
#[derive(Debug)]
pub struct StageMetrics {
    stage: Stage,
    started: Instant,
    inner: Mutex<Aggregate>,
}

#[derive(Debug)]
struct Aggregate {
    total: u64,
    ok: u64,
    failures: FailureCounts,
    bytes: u64,
    min: Option<Duration>,
    max: Duration,
    histogram: Histogram<u64>,
    status_codes: BTreeMap<u16, u64>,
    closed_at: Option<Instant>,
}

impl StageMetrics {
    pub fn try_new(stage: Stage) -> Result<Self, BoxError> {
        let histogram =
            Histogram::new_with_bounds(HISTOGRAM_LOWEST, HISTOGRAM_HIGHEST, HISTOGRAM_SIGFIG)
                .context("create latency histogram")?;
        Ok(Self {
            stage,
            started: Instant::now(),
            inner: Mutex::new(Aggregate {
                total: 0,
                ok: 0,
                failures: FailureCounts::default(),
                bytes: 0,
                min: None,
                max: Duration::ZERO,
                histogram,
                status_codes: BTreeMap::new(),
                closed_at: None,
            }),
        })
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn record(&self, sample: &Sample) {
        if let Some(kind) = sample.failure {
            tracing::trace!(
                stage = %self.stage.name,
                ts = ?sample.ts,
                latency = ?sample.latency,
                status = ?sample.status,
                "request failed: {kind}",
            );
        }
        let micros = u64::try_from(sample.latency.as_micros()).unwrap_or(u64::MAX);

        let mut agg = self.inner.lock();
        agg.total += 1;
        match sample.failure {
            None => agg.ok += 1,
            Some(kind) => agg.failures.count(kind),
        }
        agg.bytes += sample.bytes;
        agg.min = Some(agg.min.map_or(sample.latency, |min| min.min(sample.latency)));
        agg.max = agg.max.max(sample.latency);
        agg.histogram.saturating_record(micros.max(HISTOGRAM_LOWEST));
        if let Some(status) = sample.status {
            *agg.status_codes.entry(status).or_default() += 1;
        }
    }

    /// Mark the end of the stage's admission window.
    ///
    /// Requests still in flight keep recording,
    /// but throughput is computed over the window only.
    pub fn close(&self) {
        let mut agg = self.inner.lock();
        if agg.closed_at.is_none() {
            agg.closed_at = Some(Instant::now());
        }
    }

    pub fn snapshot(&self) -> AggregateResult {
        let agg = self.inner.lock();

        let elapsed = agg
            .closed_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started)
            .as_secs_f64();

        AggregateResult {
            stage: self.stage.clone(),
            elapsed,
            total: agg.total,
            ok: agg.ok,
            failures: agg.failures,
            bytes: agg.bytes,
            throughput: if elapsed > 0. {
                agg.total as f64 / elapsed
            } else {
                0.
            },
            error_rate: if agg.total > 0 {
                agg.failures.total() as f64 / agg.total as f64
            } else {
                0.
            },
            latency: agg.percentiles(),
            status_codes: agg.status_codes.clone(),
        }
    }
}

impl Aggregate {
    fn percentiles(&self) -> LatencyPercentiles {
        let Some(min) = self.min else {
            return LatencyPercentiles::default();
        };
        let min = as_millis(min);
        let max = as_millis(self.max);

        // bucket values are approximations,
        // keep them within the exact observed bounds
        let quantile = |q: f64| {
            (self.histogram.value_at_quantile(q) as f64 / 1000.).clamp(min, max)
        };

        LatencyPercentiles {
            min,
            mean: (self.histogram.mean() / 1000.).clamp(min, max),
            p50: quantile(0.50),
            p90: quantile(0.90),
            p99: quantile(0.99),
            max,
        }
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests;
