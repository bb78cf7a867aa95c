use std::{fmt, time::Duration};

/// Invalid run configuration, detected before any traffic is generated.
#[derive(Debug)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ConfigError {
    MissingUrl,
    InvalidUrl { url: String, reason: String },
    InvalidMethod(String),
    InvalidHeader(String),
    DurationBelowFloor { duration: Duration, floor: Duration },
    ZeroTimeout,
    InvalidSuccessStatus(u16),
    InvalidRequest(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingUrl => write!(f, "missing target url"),
            ConfigError::InvalidUrl { url, reason } => {
                write!(f, "invalid target url '{url}': {reason}")
            }
            ConfigError::InvalidMethod(method) => write!(f, "invalid http method '{method}'"),
            ConfigError::InvalidHeader(input) => {
                write!(f, "could not parse the provided header; input = {input}")
            }
            ConfigError::DurationBelowFloor { duration, floor } => write!(
                f,
                "duration can't be less than {}; got {}",
                humantime::format_duration(*floor),
                humantime::format_duration(*duration),
            ),
            ConfigError::ZeroTimeout => write!(f, "request timeout must be greater than zero"),
            ConfigError::InvalidSuccessStatus(code) => {
                write!(f, "invalid success status code: {code}")
            }
            ConfigError::InvalidRequest(reason) => {
                write!(f, "request template can not be built: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
