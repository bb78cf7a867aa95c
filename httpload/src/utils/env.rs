pub const fn project_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

pub const fn user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

/// Upper bound for the number of concurrent workers calibration may probe.
///
/// Can be overwritten using the `HTTPLOAD_MAX_CONCURRENCY` env variable,
/// defaults to 64 workers per available CPU.
pub fn max_concurrency() -> u32 {
    std::env::var("HTTPLOAD_MAX_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n: &u32| *n > 0)
        .unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            u32::try_from(cpus * 64).unwrap_or(u32::MAX)
        })
}
