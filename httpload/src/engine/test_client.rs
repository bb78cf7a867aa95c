use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use rama::{
    Service,
    error::BoxError,
    http::{Body, Request, Response, StatusCode},
};
use tokio::time::{self, Instant};

/// In-process target: answers after `delay` with `status` and `body`,
/// fails at transport level when `status` is `None`.
#[derive(Debug, Clone)]
pub(crate) struct MockClient {
    pub delay: Duration,
    pub status: Option<StatusCode>,
    pub body: &'static str,
    /// Answer 503 to requests beyond this amount within one second.
    pub fail_above_rps: Option<u32>,
    /// Never answer requests beyond this amount within one second.
    pub hang_above_rps: Option<u32>,
    pub calls: Arc<AtomicUsize>,
    pub window: Arc<Mutex<Option<(Instant, u32)>>>,
}

impl MockClient {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            status: Some(StatusCode::OK),
            body: "hello",
            fail_above_rps: None,
            hang_above_rps: None,
            calls: Default::default(),
            window: Default::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn over_capacity(&self) -> bool {
        let Some(limit) = self.fail_above_rps.or(self.hang_above_rps) else {
            return false;
        };
        let now = Instant::now();
        let mut window = self.window.lock();
        let (start, count) = window.get_or_insert((now, 0));
        if now.duration_since(*start) >= Duration::from_secs(1) {
            *start = now;
            *count = 0;
        }
        *count += 1;
        *count > limit
    }
}

impl Service<Request> for MockClient {
    type Output = Response;
    type Error = BoxError;

    async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let over_capacity = self.over_capacity();
        if over_capacity && self.hang_above_rps.is_some() {
            return std::future::pending().await;
        }
        if !self.delay.is_zero() {
            time::sleep(self.delay).await;
        }
        let Some(mut status) = self.status else {
            return Err(BoxError::from("connection refused"));
        };
        if over_capacity {
            status = StatusCode::SERVICE_UNAVAILABLE;
        }
        let mut resp = Response::new(Body::from(self.body));
        *resp.status_mut() = status;
        Ok(resp)
    }
}
