use std::{fmt, future::Future, pin::Pin, sync::Arc};

use rama::{
    Service,
    error::BoxError,
    http::{Request, Response},
    telemetry::tracing,
};
use serde::Serialize;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until};

use super::{
    AggregateResult, BurstSearch, Convergence, DrainSummary, OperatingPoint, RateController,
    SearchStep, Stage, StageMetrics, WorkerPool,
};
use crate::{
    config::{ConfigError, EngineConfig, RequestTemplate},
    report::Reporter,
};

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Calibrating,
    Running,
    Draining,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Calibrating => "calibrating",
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    /// Resources for the run could not be set up.
    Setup(BoxError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(err) => write!(f, "invalid configuration: {err}"),
            EngineError::Setup(err) => write!(f, "setup run: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(err) => Some(err),
            EngineError::Setup(err) => Some(&**err),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

/// Final result of a run, handed to the reporting boundary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operating_point: OperatingPoint,
    /// Why calibration settled on the operating point, absent when fully pinned.
    pub convergence: Option<Convergence>,
    /// One summary per calibration burst, in order.
    pub calibration: Vec<AggregateResult>,
    /// Summary of the main run.
    pub result: AggregateResult,
    pub cancelled: bool,
    pub drain: DrainSummary,
}

/// Drives a run: calibration (unless fully pinned), the timed main run
/// and draining, feeding progress to a [`Reporter`].
pub struct Engine<C> {
    config: EngineConfig,
    template: RequestTemplate,
    client: C,
}

impl<C> fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("template", &self.template)
            .finish()
    }
}

impl<C> Engine<C>
where
    C: Service<Request, Output = Response, Error: Into<BoxError>> + Send + Sync + 'static,
{
    pub fn new(config: EngineConfig, template: RequestTemplate, client: C) -> Self {
        Self {
            config,
            template,
            client,
        }
    }

    /// Run until the main run completes or `cancel` resolves,
    /// whichever comes first.
    ///
    /// Cancellation is not an error: the report is marked as cancelled
    /// and contains everything measured up to that point.
    pub async fn run<F>(
        self,
        cancel: F,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport, EngineError>
    where
        F: Future,
    {
        let Self {
            config,
            template,
            client,
        } = self;

        let mut lifecycle = Lifecycle {
            state: RunState::Idle,
            reporter,
        };
        lifecycle.enter(RunState::Idle);

        if let Err(err) = config.validate() {
            tracing::error!("abort run: {err}");
            lifecycle.enter(RunState::Aborted);
            return Err(err.into());
        }

        let pins = config.pins();
        let search = BurstSearch::new(config.calibration.clone(), pins);
        let first_stage = match pins.resolved() {
            Some(point) => Stage::main(point, config.duration),
            None => Stage::calibration(0, search.current(), search.burst_duration()),
        };
        let first_metrics = match StageMetrics::try_new(first_stage) {
            Ok(metrics) => Arc::new(metrics),
            Err(err) => {
                tracing::error!("abort run: {err}");
                lifecycle.enter(RunState::Aborted);
                return Err(EngineError::Setup(err));
            }
        };

        let rate = Arc::new(RateController::new(
            first_metrics.stage().point.rate,
            config.burst_size,
        ));
        let pool = WorkerPool::new(
            client,
            template,
            rate.clone(),
            first_metrics.clone(),
            config.timeout,
            config.success_status,
        );

        let mut run = Run {
            config,
            pool,
            rate,
            cancel: CancelSignal::new(cancel),
            lifecycle,
        };

        let mut calibration = Vec::new();
        let mut convergence = None;
        let mut pinned_metrics = None;

        let point = match pins.resolved() {
            Some(point) => {
                tracing::info!(%point, "operating point pinned, skip calibration");
                pinned_metrics = Some(first_metrics);
                point
            }
            None => {
                let (point, reason) = run
                    .calibrate(search, first_metrics, &mut calibration)
                    .await?;
                convergence = Some(reason);
                point
            }
        };

        let main_stage = Stage::main(point, run.config.duration);
        let main_metrics = if run.cancel.fired {
            None
        } else {
            let metrics = match pinned_metrics {
                Some(metrics) => metrics,
                None => run.new_stage(main_stage.clone())?,
            };
            run.main(metrics.clone()).await;
            Some(metrics)
        };

        let Run {
            config,
            pool,
            cancel,
            mut lifecycle,
            ..
        } = run;

        lifecycle.enter(RunState::Draining);
        let drain = pool.drain(config.drain_grace).await;

        // snapshot after draining: late completions belong to the stage
        // in which they were admitted
        let report = RunReport {
            operating_point: point,
            convergence,
            calibration: calibration.iter().map(|m| m.snapshot()).collect(),
            result: main_metrics
                .map(|m| m.snapshot())
                .unwrap_or_else(|| AggregateResult::empty(main_stage)),
            cancelled: cancel.fired,
            drain,
        };

        lifecycle.enter(RunState::Done);
        lifecycle.reporter.finish(&report);
        Ok(report)
    }
}

struct Lifecycle<'r> {
    state: RunState,
    reporter: &'r mut dyn Reporter,
}

impl Lifecycle<'_> {
    fn enter(&mut self, state: RunState) {
        if state != self.state {
            tracing::info!(from = %self.state, to = %state, "run state changed");
        }
        self.state = state;
        self.reporter.on_state(state);
    }
}

/// Cancellation future that can be polled repeatedly,
/// staying resolved once it fired.
struct CancelSignal<F> {
    signal: Pin<Box<F>>,
    fired: bool,
}

impl<F: Future> CancelSignal<F> {
    fn new(signal: F) -> Self {
        Self {
            signal: Box::pin(signal),
            fired: false,
        }
    }

    async fn fired(&mut self) {
        if !self.fired {
            self.signal.as_mut().await;
            self.fired = true;
        }
    }
}

struct Run<'r, C, F> {
    config: EngineConfig,
    pool: WorkerPool<C>,
    rate: Arc<RateController>,
    cancel: CancelSignal<F>,
    lifecycle: Lifecycle<'r>,
}

impl<C, F> Run<'_, C, F>
where
    C: Service<Request, Output = Response, Error: Into<BoxError>> + Send + Sync + 'static,
    F: Future,
{
    fn new_stage(&mut self, stage: Stage) -> Result<Arc<StageMetrics>, EngineError> {
        match StageMetrics::try_new(stage) {
            Ok(metrics) => Ok(Arc::new(metrics)),
            Err(err) => {
                tracing::error!("abort run: {err}");
                self.lifecycle.enter(RunState::Aborted);
                Err(EngineError::Setup(err))
            }
        }
    }

    /// Point the pool at a stage: fresh rate bucket, new attribution target
    /// and the stage's amount of workers.
    fn begin(&mut self, metrics: Arc<StageMetrics>) {
        let point = metrics.stage().point;
        self.rate.reset(point.rate);
        self.pool.begin_stage(metrics);
        self.pool.resize(point.concurrency as usize);
    }

    async fn calibrate(
        &mut self,
        mut search: BurstSearch,
        first: Arc<StageMetrics>,
        bursts: &mut Vec<Arc<StageMetrics>>,
    ) -> Result<(OperatingPoint, Convergence), EngineError> {
        self.lifecycle.enter(RunState::Calibrating);

        let burst_duration = search.burst_duration();
        let mut metrics = first;

        loop {
            tracing::info!(
                burst = bursts.len(),
                point = %metrics.stage().point,
                "start calibration burst"
            );
            self.begin(metrics.clone());
            bursts.push(metrics.clone());

            let completed = tokio::select! {
                biased;

                _ = self.cancel.fired() => false,
                _ = sleep(burst_duration) => true,
            };
            metrics.close();

            // requests admitted late in the burst, timeouts included,
            // must be recorded before the burst is judged
            let completed = completed
                && tokio::select! {
                    biased;

                    _ = self.cancel.fired() => false,
                    _ = self.pool.pause(self.config.drain_grace) => true,
                };

            if !completed {
                let point = search.interrupt();
                tracing::info!(%point, "calibration cancelled, use last healthy point");
                return Ok((point, Convergence::Interrupted));
            }

            let result = metrics.snapshot();
            let step = search.observe(&result);
            tracing::info!(
                burst = bursts.len() - 1,
                total = result.total,
                throughput = result.throughput,
                error_rate = result.error_rate,
                p99_ms = result.latency.p99,
                "calibration burst done"
            );
            self.lifecycle.reporter.on_burst(&result, &step);

            match step {
                SearchStep::Probe(point) => {
                    metrics =
                        self.new_stage(Stage::calibration(bursts.len(), point, burst_duration))?;
                }
                SearchStep::Converged { point, reason } => {
                    tracing::info!(%point, %reason, "calibration converged");
                    return Ok((point, reason));
                }
            }
        }
    }

    /// Timed main run, stops admission at the deadline or on cancellation.
    async fn main(&mut self, metrics: Arc<StageMetrics>) {
        self.lifecycle.enter(RunState::Running);

        let point = metrics.stage().point;
        tracing::info!(%point, duration = ?self.config.duration, "start main run");
        self.begin(metrics.clone());

        let start = Instant::now();
        let deadline = start + self.config.duration;
        let mut ticker = (!self.config.progress_interval.is_zero()).then(|| {
            let mut ticker = interval_at(
                start + self.config.progress_interval,
                self.config.progress_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.fired() => {
                    tracing::info!("main run cancelled");
                    break;
                }
                _ = sleep_until(deadline) => {
                    tracing::debug!("main run deadline reached");
                    break;
                }
                _ = tick(&mut ticker) => {
                    self.lifecycle.reporter.on_tick(&metrics.snapshot());
                }
            }
        }

        metrics.close();
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
