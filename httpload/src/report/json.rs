use std::io::Write;

use rama::telemetry::tracing;
use serde_json::json;

use super::{Reporter, TickWindow};
use crate::engine::{AggregateResult, RunReport, RunState, SearchStep};

/// One JSON object per line, for machines.
pub struct JsonlReporter<W> {
    out: W,
    window: TickWindow,
}

impl<W: Write + Send> JsonlReporter<W> {
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

    fn emit(&mut self, line: serde_json::Value) {
        if let Err(err) = writeln!(self.out, "{line}") {
            tracing::debug!("write jsonl report line: {err}");
        }
    }
}

impl<W: Write + Send> Reporter for JsonlReporter<W> {
    fn on_state(&mut self, state: RunState) {
        self.emit(json!({
            "type": "state",
            "state": state,
        }));
    }

    fn on_burst(&mut self, result: &AggregateResult, step: &SearchStep) {
        let next = match step {
            SearchStep::Probe(point) => json!({ "probe": point }),
            SearchStep::Converged { point, reason } => json!({
                "converged": point,
                "reason": reason,
            }),
        };
        self.emit(json!({
            "type": "burst",
            "result": result,
            "next": next,
        }));
    }

    fn on_tick(&mut self, progress: &AggregateResult) {
        let delta = self.window.advance(progress);
        self.emit(json!({
            "type": "summary",
            "t_ms": (progress.elapsed * 1000.).round() as u64,
            "rps": delta.rps,
            "interval": {
                "total": delta.total,
                "ok": delta.total - delta.failures,
                "fail": delta.failures,
            },
            "total": {
                "total": progress.total,
                "ok": progress.ok,
                "failures": progress.failures,
            },
        }));
    }

    fn finish(&mut self, report: &RunReport) {
        self.emit(json!({
            "type": "final",
            "report": report,
        }));
        if let Err(err) = self.out.flush() {
            tracing::debug!("flush jsonl report: {err}");
        }
    }
}
