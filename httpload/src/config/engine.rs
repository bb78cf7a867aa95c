use std::time::Duration;

use rama::http::StatusCode;

use super::ConfigError;
use crate::engine::{CalibrationPolicy, Pins};

/// Shortest main run that produces a meaningful report.
pub const MIN_DURATION: Duration = Duration::from_secs(20);

/// Resolved configuration of a single load test run.
///
/// Constructed once (by the CLI layer or a test) and
/// never mutated after it is handed to the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Duration of the main (reported) run.
    pub duration: Duration,
    /// Deadline for a single request, including reading its body.
    pub timeout: Duration,
    /// Requests per second, 0 = calibrate.
    pub rate: u32,
    /// Number of concurrent workers, 0 = calibrate.
    pub concurrency: u32,
    pub keep_alive: bool,
    pub compression: bool,
    /// The only status code counted as success.
    pub success_status: StatusCode,
    /// Time in-flight requests get to finish once admission stopped.
    pub drain_grace: Duration,
    /// Admissions the rate controller allows back to back.
    pub burst_size: u32,
    /// Interval at which the reporter receives progress of the main run.
    pub progress_interval: Duration,
    pub calibration: CalibrationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(5);
        Self {
            duration: Duration::from_secs(30),
            timeout,
            rate: 0,
            concurrency: 0,
            keep_alive: true,
            compression: true,
            success_status: StatusCode::OK,
            drain_grace: default_drain_grace(timeout),
            burst_size: 1,
            progress_interval: Duration::from_secs(1),
            calibration: CalibrationPolicy::default(),
        }
    }
}

/// In-flight requests end by their own timeout well within this grace.
pub fn default_drain_grace(timeout: Duration) -> Duration {
    timeout + Duration::from_secs(1)
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration < MIN_DURATION {
            return Err(ConfigError::DurationBelowFloor {
                duration: self.duration,
                floor: MIN_DURATION,
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Dimensions fixed by the operator, excluded from calibration.
    pub fn pins(&self) -> Pins {
        Pins {
            concurrency: (self.concurrency > 0).then_some(self.concurrency),
            rate: (self.rate > 0).then_some(self.rate),
        }
    }
}
