use crate::engine::{AggregateResult, RunReport, RunState, SearchStep};

mod document;
mod human;
mod json;
mod web;

pub use self::{
    document::{ReportDocument, write_report_file},
    human::HumanReporter,
    json::JsonlReporter,
    web::{open_in_browser, open_command},
};

/// Sink for everything a run produces while it runs.
pub trait Reporter: Send {
    fn on_state(&mut self, _state: RunState) {}

    /// A calibration burst completed, `step` is what the search does next.
    fn on_burst(&mut self, result: &AggregateResult, step: &SearchStep);

    /// Progress of the main run, cumulative since it started.
    fn on_tick(&mut self, progress: &AggregateResult);

    fn finish(&mut self, report: &RunReport);
}

/// Requests completed between two ticks.
#[derive(Debug, Default)]
struct TickWindow {
    last_total: u64,
    last_failures: u64,
    last_elapsed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TickDelta {
    total: u64,
    failures: u64,
    rps: f64,
}

impl TickWindow {
    fn advance(&mut self, progress: &AggregateResult) -> TickDelta {
        let total = progress.total.saturating_sub(self.last_total);
        let failures = progress
            .failures
            .total()
            .saturating_sub(self.last_failures);
        let secs = progress.elapsed - self.last_elapsed;

        self.last_total = progress.total;
        self.last_failures = progress.failures.total();
        self.last_elapsed = progress.elapsed;

        TickDelta {
            total,
            failures,
            rps: if secs > 0. { total as f64 / secs } else { 0. },
        }
    }
}
