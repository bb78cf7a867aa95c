use super::ServerConfig;

/// Mock server presets.
#[derive(Debug, Clone, Copy, clap::ValueEnum, Default)]
pub enum Scenario {
    /// Fast and fully reliable server.
    /// Used to measure pure client overhead.
    #[default]
    Baseline,

    /// Server processing time varies per request.
    /// Used to observe queuing and tail latency.
    LatencyJitter,

    /// Server that can not keep up beyond 200 requests per second.
    /// Used to exercise calibration.
    Saturated,

    /// Server occasionally errors or stalls.
    FlakyUpstream,
}

impl Scenario {
    /// Construct the concrete server configuration
    /// associated with this scenario.
    pub fn server_config(self) -> ServerConfig {
        match self {
            Scenario::Baseline => ServerConfig {
                base_latency: Some(0.002),
                ..Default::default()
            },

            Scenario::LatencyJitter => ServerConfig {
                base_latency: Some(0.05),
                jitter: Some(0.04),
                ..Default::default()
            },

            Scenario::Saturated => ServerConfig {
                base_latency: Some(0.005),
                fail_above_rps: Some(200),
                ..Default::default()
            },

            Scenario::FlakyUpstream => ServerConfig {
                base_latency: Some(0.02),
                jitter: Some(0.01),
                error_rate: Some(0.05),
                timeout_rate: Some(0.01),
                ..Default::default()
            },
        }
    }
}
