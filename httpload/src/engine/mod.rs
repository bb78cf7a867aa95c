//! Load generation engine: admission control, workers, metrics
//! and the calibration search, driven by the [`Engine`] orchestrator.

mod calibrate;
mod metrics;
mod orchestrator;
mod pool;
mod rate;

#[cfg(test)]
mod test_client;

pub use self::{
    calibrate::{
        Breach, BurstSearch, CalibrationPolicy, Convergence, OperatingPoint, Pins, SearchStep,
    },
    metrics::{
        AggregateResult, FailureCounts, FailureKind, LatencyPercentiles, Sample, Stage,
        StageMetrics,
    },
    orchestrator::{Engine, EngineError, RunReport, RunState},
    pool::{DrainSummary, WorkerPool},
    rate::RateController,
};
