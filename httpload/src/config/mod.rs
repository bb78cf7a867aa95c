mod client;
mod engine;
mod error;
mod scenario;
mod server;
mod template;

pub use self::{
    client::{CalibrationConfig, ClientConfig},
    engine::{EngineConfig, MIN_DURATION, default_drain_grace},
    error::ConfigError,
    scenario::Scenario,
    server::ServerConfig,
    template::{RequestTemplate, RequestTemplateBuilder, parse_headers},
};
