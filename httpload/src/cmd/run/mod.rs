use std::{io, path::PathBuf, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::StatusCode,
    telemetry::tracing,
};

use clap::Args;

use crate::{
    config::{
        CalibrationConfig, ClientConfig, ConfigError, EngineConfig, RequestTemplate,
        RequestTemplateBuilder, default_drain_grace,
    },
    engine::{CalibrationPolicy, Engine, EngineError},
    report::{
        HumanReporter, JsonlReporter, ReportDocument, Reporter, open_command, open_in_browser,
        write_report_file,
    },
};

pub mod client;

#[derive(Debug, Clone, Args)]
/// run a load test against the target url
pub struct RunCommand {
    /// http(s) url requests are sent to
    #[arg(value_name = "URL", required = true)]
    url: String,

    /// HTTP method
    #[arg(short = 'm', long, default_value = "GET")]
    method: String,

    /// custom headers, e.g. "x-api-key: abc; accept-language: en"
    ///
    /// Whitespace around each pair is trimmed and empty pairs
    /// (such as a trailing ";") are skipped.
    #[arg(short = 'H', long, value_name = "NAME: VALUE[; ...]")]
    headers: Option<String>,

    /// request body
    #[arg(short = 'b', long)]
    body: Option<String>,

    /// value of the accept header
    #[arg(short = 'A', long)]
    accept: Option<String>,

    /// value of the content-type header
    #[arg(short = 'T', long = "content-type", default_value = "text/html")]
    content_type: String,

    /// file the final report is written to
    #[arg(short = 'r', long, value_name = "PATH", default_value = "report.json")]
    report: PathBuf,

    /// open the report in a browser once written
    #[arg(long, default_value_t = false)]
    web: bool,

    /// duration of the main run (at least 20s)
    #[arg(short = 'd', long, value_name = "DURATION", value_parser = humantime::parse_duration, default_value = "30s")]
    duration: Duration,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,

    #[clap(flatten)]
    client: ClientConfig,

    #[clap(flatten)]
    calibration: CalibrationConfig,
}

impl RunCommand {
    /// Resolve the arguments into the immutable inputs of a run.
    fn resolve(&self) -> Result<(EngineConfig, RequestTemplate), ConfigError> {
        let client = &self.client;

        let mut builder = RequestTemplateBuilder::new(self.url.as_str())
            .with_method(self.method.as_str())
            .with_content_type(self.content_type.as_str())
            .with_keep_alive(!client.disable_keep_alive)
            .with_compression(!client.disable_compression);
        if let Some(headers) = &self.headers {
            builder = builder.with_headers(headers.as_str());
        }
        if let Some(body) = &self.body {
            builder = builder.with_body(body.clone());
        }
        if let Some(accept) = &self.accept {
            builder = builder.with_accept(accept.as_str());
        }
        let template = builder.build()?;

        let success_status = StatusCode::from_u16(client.success_status_code)
            .map_err(|_| ConfigError::InvalidSuccessStatus(client.success_status_code))?;

        let config = EngineConfig {
            duration: self.duration,
            timeout: client.timeout,
            rate: client.rate,
            concurrency: client.concurrency,
            keep_alive: !client.disable_keep_alive,
            compression: !client.disable_compression,
            success_status,
            drain_grace: default_drain_grace(client.timeout),
            burst_size: client.burst_size.max(1),
            calibration: calibration_policy(&self.calibration),
            ..Default::default()
        };
        config.validate()?;

        Ok((config, template))
    }
}

fn calibration_policy(cfg: &CalibrationConfig) -> CalibrationPolicy {
    CalibrationPolicy {
        burst_duration: cfg.burst_duration,
        max_bursts: cfg.max_bursts.max(1),
        max_error_rate: cfg.max_error_rate.clamp(0., 1.),
        max_latency_factor: cfg.max_latency_factor.max(1.),
        ..Default::default()
    }
}

fn usage_error(err: ConfigError) -> BoxError {
    BoxError::from(format!(
        "{err}\n\nsee `httpload run --help` for all options"
    ))
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let (config, template) = args.resolve().map_err(usage_error)?;

    tracing::info!(
        url = %template.uri(),
        method = %template.method(),
        rate = config.rate,
        concurrency = config.concurrency,
        duration = ?config.duration,
        timeout = ?config.timeout,
        "run config ready",
    );

    let client = client::new_load_client(config.keep_alive).context("create load client")?;

    let mut reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonlReporter::new(io::stdout()))
    } else {
        Box::new(HumanReporter::new(io::stdout()))
    };

    let engine = Engine::new(config.clone(), template.clone(), client);
    let report = engine
        .run(guard.cancelled(), reporter.as_mut())
        .await
        .map_err(|err| match err {
            EngineError::Config(err) => usage_error(err),
            EngineError::Setup(err) => err,
        })
        .context("run load test")?;

    let doc = ReportDocument::new(&config, &template, &report);
    if let Err(err) = write_report_file(&args.report, &doc).await {
        tracing::error!("report file not written: {err}");
        return Ok(());
    }

    if args.web {
        if let Err(err) = open_in_browser(&args.report).await {
            tracing::error!("open report in browser: {err}");
            eprintln!("open the report with: {}", open_command(&args.report));
        }
    } else {
        eprintln!("open the report with: {}", open_command(&args.report));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use rama::http::header;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        run: RunCommand,
    }

    fn parse(args: &[&str]) -> RunCommand {
        Cli::try_parse_from(std::iter::once("httpload").chain(args.iter().copied()))
            .unwrap()
            .run
    }

    #[test]
    fn defaults_calibrate_both_dimensions() {
        let (config, template) = parse(&["http://localhost:8080/"]).resolve().unwrap();

        assert_eq!(0, config.rate);
        assert_eq!(0, config.concurrency);
        assert_eq!(Duration::from_secs(30), config.duration);
        assert_eq!(Duration::from_secs(5), config.timeout);
        assert_eq!(Duration::from_secs(6), config.drain_grace);
        assert_eq!(StatusCode::OK, config.success_status);
        assert_eq!(Duration::from_secs(3), config.calibration.burst_duration);
        assert_eq!(8, config.calibration.max_bursts);

        assert_eq!("GET", template.method().as_str());
        assert_eq!("text/html", template.headers()[header::CONTENT_TYPE]);
        assert_eq!("keep-alive", template.headers()[header::CONNECTION]);
        assert_eq!("gzip", template.headers()[header::ACCEPT_ENCODING]);
    }

    #[test]
    fn header_help_mentions_lenient_parsing() {
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("empty pairs"), "{help}");
        assert!(help.contains("trailing \";\""), "{help}");
    }

    #[test]
    fn flags_shape_config_and_template() {
        let (config, template) = parse(&[
            "https://example.com/api",
            "-m",
            "post",
            "-H",
            "x-api-key: abc; x-trace: 1",
            "-b",
            "{}",
            "-T",
            "application/json",
            "-q",
            "100",
            "-c",
            "50",
            "-d",
            "1m",
            "-t",
            "500ms",
            "-k",
            "--disable-compression",
            "--success-status-code",
            "204",
            "--max-error-rate",
            "0.1",
        ])
        .resolve()
        .unwrap();

        assert_eq!(100, config.rate);
        assert_eq!(50, config.concurrency);
        assert_eq!(Duration::from_secs(60), config.duration);
        assert_eq!(Duration::from_millis(500), config.timeout);
        assert!(!config.keep_alive);
        assert!(!config.compression);
        assert_eq!(StatusCode::NO_CONTENT, config.success_status);
        assert_eq!(0.1, config.calibration.max_error_rate);

        assert_eq!("POST", template.method().as_str());
        assert_eq!("abc", template.headers()["x-api-key"]);
        assert_eq!("1", template.headers()["x-trace"]);
        assert_eq!("application/json", template.headers()[header::CONTENT_TYPE]);
        assert_eq!("close", template.headers()[header::CONNECTION]);
        assert!(!template.headers().contains_key(header::ACCEPT_ENCODING));
        assert_eq!(&b"{}"[..], &template.body()[..]);
    }

    #[test]
    fn invalid_input_is_rejected_before_any_traffic() {
        assert!(matches!(
            parse(&["http://localhost/", "-d", "10s"]).resolve(),
            Err(ConfigError::DurationBelowFloor { .. })
        ));
        assert!(matches!(
            parse(&["localhost:8080"]).resolve(),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse(&["http://localhost/", "--success-status-code", "1000"]).resolve(),
            Err(ConfigError::InvalidSuccessStatus(1000))
        ));
        assert!(matches!(
            parse(&["http://localhost/", "-H", "not a header"]).resolve(),
            Err(ConfigError::InvalidHeader(_))
        ));
    }

    #[test]
    fn usage_error_points_to_help() {
        let err = usage_error(ConfigError::MissingUrl);
        assert!(err.to_string().contains("missing target url"));
        assert!(err.to_string().contains("--help"));
    }
}
