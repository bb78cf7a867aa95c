use std::{convert::Infallible, sync::Arc, time::Duration};

use rama::{
    Layer as _, Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        HeaderValue, Request, Response, StatusCode,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
        service::web::response::IntoResponse,
    },
    layer::TimeoutLayer,
    net::socket::Interface,
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use clap::Args;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    config::{Scenario, ServerConfig},
    utils,
};

/// How long a request picked to time out is held before it gets answered.
const STALL: Duration = Duration::from_secs(60);

const OK_BODY: &str = "ok\n";

#[derive(Debug, Clone, Args)]
/// run a local mock target server
pub struct MockCommand {
    #[clap(flatten)]
    config: Option<ServerConfig>,

    #[arg(long)]
    /// Scenario to run,
    /// manually defined parameters overwrite scenario parameters.
    scenario: Option<Scenario>,

    /// network interface to bind to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "127.0.0.1:8080"
    )]
    pub bind: Interface,
}

pub async fn exec(guard: ShutdownGuard, args: MockCommand) -> Result<(), BoxError> {
    let bind = args.bind.clone();
    let mock = MockHttpServer::try_new(merge_server_cfg(args))?;

    let http_svc = (
        TraceLayer::new_for_http(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static(utils::env::project_name())),
    )
        .into_layer(Arc::new(mock));

    let exec = Executor::graceful(guard);
    let http_server = HttpServer::auto(exec.clone()).service(Arc::new(http_svc));
    let tcp_svc = TimeoutLayer::new(STALL + Duration::from_secs(5)).into_layer(http_server);

    let tcp_listener = TcpListener::bind(bind, exec)
        .await
        .context("bind mock http server")?;

    let addr = tcp_listener
        .local_addr()
        .context("get bound address for mock http server")?;
    tracing::info!("mock http server listening on: http://{addr}");

    tcp_listener.serve(tcp_svc).await;

    Ok(())
}

#[derive(Debug)]
struct MockHttpServer {
    base_latency: f64,
    jitter: f64,
    error_rate: f32,
    timeout_rate: f32,
    fail_above_rps: Option<u32>,
    /// Start of the current one second window and requests seen in it.
    window: Mutex<Option<(Instant, u32)>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockOutcome {
    Timeout,
    Error,
    Ok,
}

impl MockHttpServer {
    fn try_new(cfg: ServerConfig) -> Result<Self, BoxError> {
        let error_rate = cfg.error_rate.unwrap_or_default().clamp(0., 1.);
        let timeout_rate = cfg.timeout_rate.unwrap_or_default().clamp(0., 1.);

        if error_rate + timeout_rate > 1. {
            return Err(BoxError::from("timeout_rate + error_rate must be <= 1.0"));
        }

        Ok(Self {
            base_latency: cfg.base_latency.unwrap_or_default().max(0.),
            jitter: cfg.jitter.unwrap_or_default().max(0.),
            error_rate,
            timeout_rate,
            fail_above_rps: cfg.fail_above_rps.filter(|rps| *rps > 0),
            window: Mutex::new(None),
        })
    }

    fn pick_outcome(&self) -> MockOutcome {
        let r: f32 = rand::random();
        if r < self.timeout_rate {
            MockOutcome::Timeout
        } else if r < self.timeout_rate + self.error_rate {
            MockOutcome::Error
        } else {
            MockOutcome::Ok
        }
    }

    fn compute_delay(&self) -> Duration {
        if self.jitter == 0. {
            return Duration::from_secs_f64(self.base_latency);
        }

        let u: f64 = rand::random();
        let delta = u * self.jitter * 2. - self.jitter;
        Duration::from_secs_f64((self.base_latency + delta).max(0.))
    }

    /// Counts the request against the current window,
    /// true if it is beyond the configured capacity.
    fn over_capacity(&self) -> bool {
        let Some(limit) = self.fail_above_rps else {
            return false;
        };

        let now = Instant::now();
        let mut window = self.window.lock();
        let (start, count) = match *window {
            Some((start, count)) if now.duration_since(start) < Duration::from_secs(1) => {
                (start, count + 1)
            }
            _ => (now, 1),
        };
        *window = Some((start, count));
        count > limit
    }
}

impl Service<Request> for MockHttpServer {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
        if self.over_capacity() {
            return Ok(StatusCode::SERVICE_UNAVAILABLE.into_response());
        }

        let delay = self.compute_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(match self.pick_outcome() {
            MockOutcome::Timeout => {
                tokio::time::sleep(STALL).await;
                StatusCode::GATEWAY_TIMEOUT.into_response()
            }
            MockOutcome::Error => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            MockOutcome::Ok => (StatusCode::OK, OK_BODY).into_response(),
        })
    }
}

fn merge_server_cfg(args: MockCommand) -> ServerConfig {
    let scenario_cfg = args
        .scenario
        .map(|s| {
            tracing::info!("use scenario to define base config: {s:?}");
            s.server_config()
        })
        .unwrap_or_else(|| {
            tracing::info!("no scenario defined, use default as base config");
            Default::default()
        });

    let overwrite_cfg = args.config.unwrap_or_default();

    macro_rules! merge_config {
        ($scenario:ident, $overwrite:ident, {$($property:ident),+ $(,)?}) => {
            ServerConfig {
                $(
                    $property: if let Some(value) = $overwrite.$property {
                        tracing::info!("property '{}': use overwrite: {value}", stringify!($property));
                        Some(value)
                    } else if let Some(value) = $scenario.$property {
                        tracing::info!("property '{}': use scenario: {value}", stringify!($property));
                        Some(value)
                    } else {
                        tracing::debug!("property '{}': undefined", stringify!($property));
                        None
                    },
                )+
            }
        };
    }

    merge_config!(
        scenario_cfg, overwrite_cfg,
        {
            base_latency,
            jitter,
            error_rate,
            timeout_rate,
            fail_above_rps,
        }
    )
}
