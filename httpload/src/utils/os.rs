#[cfg(target_family = "unix")]
pub use self::unix::{raise_nofile, rlim_t};

#[cfg(target_family = "unix")]
mod unix {
    use rama::telemetry::tracing;

    pub use libc::rlim_t;

    /// Raise the soft limit of open file descriptors,
    /// each worker keeps at least one connection open.
    pub fn raise_nofile(target: rlim_t) -> std::io::Result<()> {
        use std::{io, mem};

        // SAFETY: rlimit is a plain C struct, zeroed is a valid value,
        // and both calls only read/write the struct we own.
        unsafe {
            let mut lim: libc::rlimit = mem::zeroed();
            if libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) != 0 {
                return Err(io::Error::last_os_error());
            }

            let new_soft = target.min(lim.rlim_max);
            if lim.rlim_cur >= new_soft {
                tracing::debug!(
                    current = lim.rlim_cur,
                    requested = new_soft,
                    "ulimit: current nofile limit is sufficient",
                );
                return Ok(());
            }

            let previous = lim.rlim_cur;
            lim.rlim_cur = new_soft;
            if libc::setrlimit(libc::RLIMIT_NOFILE, &lim) != 0 {
                return Err(io::Error::last_os_error());
            }
            tracing::info!(previous, applied = new_soft, "ulimit: raised nofile soft limit");
        }

        Ok(())
    }
}
