use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use rama::{
    Service,
    error::BoxError,
    http::{Request, Response, StatusCode, body::util::BodyExt as _},
    telemetry::tracing,
};
use serde::Serialize;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, timeout_at},
};

use super::{FailureKind, RateController, Sample, StageMetrics};
use crate::config::RequestTemplate;

/// Outcome of stopping the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    /// Workers that completed their in-flight request within the grace period.
    pub finished: usize,
    /// Workers that were still busy at the end of the grace period.
    pub aborted: usize,
}

/// Fixed set of workers issuing the request template
/// as fast as the shared [`RateController`] admits them.
pub struct WorkerPool<C> {
    shared: Arc<Shared<C>>,
    workers: Vec<Worker>,
    /// Stopped workers that might still finish an in-flight request.
    retired: Vec<JoinHandle<()>>,
    next_id: usize,
}

struct Worker {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Shared<C> {
    client: C,
    template: RequestTemplate,
    rate: Arc<RateController>,
    stage: ArcSwap<StageMetrics>,
    timeout: Duration,
    success_status: StatusCode,
}

impl<C> std::fmt::Debug for WorkerPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl<C> WorkerPool<C>
where
    C: Service<Request, Output = Response, Error: Into<BoxError>> + Send + Sync + 'static,
{
    /// Create an empty pool, use [`Self::resize`] to start workers.
    pub fn new(
        client: C,
        template: RequestTemplate,
        rate: Arc<RateController>,
        stage: Arc<StageMetrics>,
        timeout: Duration,
        success_status: StatusCode,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                template,
                rate,
                stage: ArcSwap::new(stage),
                timeout,
                success_status,
            }),
            workers: Vec::new(),
            retired: Vec::new(),
            next_id: 0,
        }
    }

    /// Amount of active workers.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.workers.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Grow or shrink the pool to `n` active workers.
    ///
    /// Stopped workers finish their in-flight request first.
    pub fn resize(&mut self, n: usize) {
        self.retired.retain(|handle| !handle.is_finished());

        while self.workers.len() > n {
            if let Some(worker) = self.workers.pop() {
                let _ = worker.stop_tx.send(());
                self.retired.push(worker.handle);
            }
        }

        if let Some(missing) = n.checked_sub(self.workers.len()) {
            self.start(missing);
        }

        tracing::debug!(workers = n, "worker pool resized");
    }

    /// Launch `n` additional workers.
    pub fn start(&mut self, n: usize) {
        for _ in 0..n {
            let (stop_tx, stop_rx) = oneshot::channel();
            let id = self.next_id;
            self.next_id += 1;
            let handle = tokio::spawn(run_worker(id, self.shared.clone(), stop_rx));
            self.workers.push(Worker { stop_tx, handle });
        }
    }

    /// Attribute all requests admitted from now on to the given stage,
    /// returning the previous one.
    pub fn begin_stage(&self, stage: Arc<StageMetrics>) -> Arc<StageMetrics> {
        tracing::debug!(stage = %stage.stage().name, point = %stage.stage().point, "begin stage");
        self.shared.stage.swap(stage)
    }

    /// Stop all workers and wait for their in-flight requests,
    /// aborting workers still busy after `grace`.
    ///
    /// The pool is empty afterwards, [`Self::resize`] starts it again.
    /// Cancel safe: workers not yet awaited stay retired.
    pub async fn pause(&mut self, grace: Duration) -> DrainSummary {
        self.retire_all();
        let summary = self.await_retired(Instant::now() + grace).await;
        if summary.aborted > 0 {
            tracing::warn!(
                aborted = summary.aborted,
                ?grace,
                "in-flight requests abandoned while pausing workers"
            );
        }
        tracing::debug!(finished = summary.finished, "worker pool paused");
        summary
    }

    /// Stop admitting requests and wait for in-flight ones,
    /// aborting workers still busy after `grace`.
    pub async fn drain(mut self, grace: Duration) -> DrainSummary {
        self.retire_all();
        let summary = self.await_retired(Instant::now() + grace).await;
        if summary.aborted > 0 {
            tracing::warn!(
                aborted = summary.aborted,
                ?grace,
                "in-flight requests abandoned after drain grace period"
            );
        }
        summary
    }

    fn retire_all(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.stop_tx.send(());
            self.retired.push(worker.handle);
        }
    }

    async fn await_retired(&mut self, deadline: Instant) -> DrainSummary {
        let mut summary = DrainSummary::default();
        // pop only once awaited, a dropped future leaves the rest retired
        while let Some(handle) = self.retired.last_mut() {
            match timeout_at(deadline, &mut *handle).await {
                Ok(Ok(())) => summary.finished += 1,
                Ok(Err(err)) => {
                    tracing::debug!("worker task failed while stopping: {err}");
                    summary.finished += 1;
                }
                Err(_) => {
                    handle.abort();
                    summary.aborted += 1;
                }
            }
            self.retired.pop();
        }
        summary
    }
}

async fn run_worker<C>(id: usize, shared: Arc<Shared<C>>, mut stop_rx: oneshot::Receiver<()>)
where
    C: Service<Request, Output = Response, Error: Into<BoxError>> + Send + Sync + 'static,
{
    tracing::trace!(worker = id, "worker started");
    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                tracing::trace!(worker = id, "worker stopped");
                return;
            }
            _ = shared.rate.admit() => (),
        }

        // admitted: the request belongs to the stage active right now,
        // even if it completes after a stage switch
        let stage = shared.stage.load_full();
        let sample = shared.issue().await;
        stage.record(&sample);
    }
}

impl<C> Shared<C>
where
    C: Service<Request, Output = Response, Error: Into<BoxError>>,
{
    async fn issue(&self) -> Sample {
        let ts = std::time::SystemTime::now();
        let start = Instant::now();
        let deadline = start + self.timeout;

        let resp = match timeout_at(deadline, self.client.serve(self.template.to_request())).await
        {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => {
                let err: BoxError = err.into();
                tracing::trace!("request failed: {err}");
                return Sample {
                    ts,
                    latency: start.elapsed(),
                    status: None,
                    failure: Some(FailureKind::Transport),
                    bytes: 0,
                };
            }
            Err(_) => {
                return Sample {
                    ts,
                    latency: self.timeout,
                    status: None,
                    failure: Some(FailureKind::Timeout),
                    bytes: 0,
                };
            }
        };

        let latency = start.elapsed();
        let status = resp.status();

        let mut body = resp.into_body();
        let mut bytes = 0;
        let body_failure = loop {
            match timeout_at(deadline, body.frame()).await {
                Ok(None) => break None,
                Ok(Some(Ok(frame))) => {
                    if let Some(data) = frame.data_ref() {
                        bytes += data.len() as u64;
                    }
                }
                Ok(Some(Err(err))) => {
                    tracing::trace!("read response body: {err}");
                    break Some(FailureKind::Body);
                }
                Err(_) => break Some(FailureKind::Timeout),
            }
        };

        Sample {
            ts,
            latency,
            status: Some(status.as_u16()),
            failure: body_failure
                .or_else(|| (status != self.success_status).then_some(FailureKind::Status)),
            bytes,
        }
    }
}
