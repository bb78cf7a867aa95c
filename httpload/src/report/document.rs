use std::path::Path;

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
    utils::time::now_unix_ms,
};
use serde::Serialize;

use crate::{
    config::{EngineConfig, RequestTemplate},
    engine::RunReport,
    utils::env,
};

/// The persisted report: what was tested, how, and the outcome.
#[derive(Debug, Serialize)]
pub struct ReportDocument<'a> {
    pub generator: &'static str,
    pub generated_at_ms: i64,
    pub target: Target<'a>,
    pub config: ConfigEcho,
    #[serde(flatten)]
    pub run: &'a RunReport,
}

#[derive(Debug, Serialize)]
pub struct Target<'a> {
    pub method: &'a str,
    pub url: String,
}

/// The configuration as resolved before the run.
#[derive(Debug, Serialize)]
pub struct ConfigEcho {
    pub duration_secs: f64,
    pub timeout_secs: f64,
    /// 0 = calibrated
    pub rate: u32,
    /// 0 = calibrated
    pub concurrency: u32,
    pub keep_alive: bool,
    pub compression: bool,
    pub success_status: u16,
}

impl<'a> ReportDocument<'a> {
    pub fn new(config: &EngineConfig, template: &'a RequestTemplate, run: &'a RunReport) -> Self {
        Self {
            generator: env::user_agent(),
            generated_at_ms: now_unix_ms(),
            target: Target {
                method: template.method().as_str(),
                url: template.uri().to_string(),
            },
            config: ConfigEcho {
                duration_secs: config.duration.as_secs_f64(),
                timeout_secs: config.timeout.as_secs_f64(),
                rate: config.rate,
                concurrency: config.concurrency,
                keep_alive: config.keep_alive,
                compression: config.compression,
                success_status: config.success_status.as_u16(),
            },
            run,
        }
    }
}

/// Write the report as pretty printed JSON, replacing any existing file.
pub async fn write_report_file(path: &Path, doc: &ReportDocument<'_>) -> Result<(), BoxError> {
    let payload = serde_json::to_vec_pretty(doc).context("encode report as json")?;
    tokio::fs::write(path, payload)
        .await
        .context("write report file")
        .with_context_debug_field("path", || path.to_path_buf())?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}
