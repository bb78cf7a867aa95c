use std::time::Duration;

/// Client side load generation configuration.
/// This models how requests are produced over time.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Requests per second limit.
    /// Detected automatically (calibration) when 0.
    #[arg(short = 'q', long = "rate", value_name = "RPS", default_value_t = 0)]
    pub rate: u32,

    /// Number of concurrent clients.
    /// Detected automatically (calibration) when 0.
    #[arg(short = 'c', long, value_name = "N", default_value_t = 0)]
    pub concurrency: u32,

    /// Number of requests the rate limiter admits back to back.
    #[arg(long, value_name = "#REQUESTS", default_value_t = 1)]
    pub burst_size: u32,

    /// Request timeout (e.g. 5s, 500ms).
    #[arg(short = 't', long, value_name = "DURATION", value_parser = humantime::parse_duration, default_value = "5s")]
    pub timeout: Duration,

    /// Disable keep-alive (send `Connection: close`).
    #[arg(short = 'k', long = "disable-keepalive", default_value_t = false)]
    pub disable_keep_alive: bool,

    /// Disable compression (no `Accept-Encoding: gzip`).
    #[arg(long, default_value_t = false)]
    pub disable_compression: bool,

    /// Status code on which a request is considered successful.
    #[arg(long = "success-status-code", value_name = "CODE", default_value_t = 200)]
    pub success_status_code: u16,
}

/// Tuning of the calibration burst search.
#[derive(Debug, Clone, clap::Args)]
pub struct CalibrationConfig {
    /// Duration of a single calibration burst.
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration, default_value = "3s")]
    pub burst_duration: Duration,

    /// Maximum amount of calibration bursts.
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub max_bursts: usize,

    /// Error rate (0.0 - 1.0) above which a burst is considered too heavy.
    #[arg(long, value_name = "RATIO", default_value_t = 0.05)]
    pub max_error_rate: f64,

    /// p99 latency, as multiple of the first burst, above which a burst is considered too heavy.
    #[arg(long, value_name = "FACTOR", default_value_t = 4.)]
    pub max_latency_factor: f64,
}
