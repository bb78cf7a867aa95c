use std::io::Write;

use rama::telemetry::tracing;

use super::{Reporter, TickWindow};
use crate::engine::{AggregateResult, RunReport, RunState, SearchStep};

/// Line oriented progress for a terminal.
pub struct HumanReporter<W> {
    out: W,
    window: TickWindow,
}

impl<W: Write + Send> HumanReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            window: TickWindow::default(),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.out, "{args}") {
            tracing::debug!("write human report line: {err}");
        }
    }

    fn summary(&mut self, label: &str, r: &AggregateResult) {
        self.line(format_args!(
            "{label}: total={} ok={} fail={} (status={} timeout={} transport={} body={}) rps={:.1} error_rate={:.2}% bytes={}",
            r.total,
            r.ok,
            r.failures.total(),
            r.failures.status,
            r.failures.timeout,
            r.failures.transport,
            r.failures.body,
            r.throughput,
            r.error_rate * 100.,
            r.bytes,
        ));
        self.line(format_args!(
            "{label}: latency min={:.2}ms mean={:.2}ms p50={:.2}ms p90={:.2}ms p99={:.2}ms max={:.2}ms",
            r.latency.min, r.latency.mean, r.latency.p50, r.latency.p90, r.latency.p99, r.latency.max,
        ));
    }
}

impl<W: Write + Send> Reporter for HumanReporter<W> {
    fn on_state(&mut self, state: RunState) {
        match state {
            RunState::Calibrating => self.line(format_args!("calibrating operating point...")),
            RunState::Draining => self.line(format_args!("draining in-flight requests...")),
            _ => (),
        }
    }

    fn on_burst(&mut self, result: &AggregateResult, step: &SearchStep) {
        let stage = &result.stage;
        self.line(format_args!(
            "{} [{}]: total={} rps={:.1} error_rate={:.2}% p99={:.2}ms",
            stage.name,
            stage.point,
            result.total,
            result.throughput,
            result.error_rate * 100.,
            result.latency.p99,
        ));
        match step {
            SearchStep::Probe(point) => self.line(format_args!("  next probe: {point}")),
            SearchStep::Converged { point, reason } => {
                self.line(format_args!("  converged on {point}: {reason}"))
            }
        }
    }

    fn on_tick(&mut self, progress: &AggregateResult) {
        let delta = self.window.advance(progress);
        self.line(format_args!(
            "t={:.1}s rps={:.1} ok={} fail={} total_ok={} total_fail={}",
            progress.elapsed,
            delta.rps,
            delta.total - delta.failures,
            delta.failures,
            progress.ok,
            progress.failures.total(),
        ));
    }

    fn finish(&mut self, report: &RunReport) {
        if report.cancelled {
            self.line(format_args!("run cancelled, partial results"));
        }
        self.line(format_args!("operating point: {}", report.operating_point));
        if let Some(reason) = &report.convergence {
            self.line(format_args!("calibration: {reason}"));
        }
        self.summary("result", &report.result);
        for (code, count) in &report.result.status_codes {
            self.line(format_args!("  status {code}: {count}"));
        }
        if report.drain.aborted > 0 {
            self.line(format_args!(
                "{} in-flight requests abandoned while draining",
                report.drain.aborted
            ));
        }
        if let Err(err) = self.out.flush() {
            tracing::debug!("flush human report: {err}");
        }
    }
}
