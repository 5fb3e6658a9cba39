use std::time::Duration;

/// Tunables for the fleet registry and its background sweeps.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// How often the liveness sweep inspects labs and devices.
    pub cleanup_interval: Duration,
    /// A device silent longer than this is removed by the liveness sweep.
    pub device_removal_time: Duration,
    /// A lab silent longer than this is removed by the liveness sweep.
    pub lab_removal_time: Duration,
    /// How long the first-device signal waits before resolving anyway.
    pub first_device_timeout: Duration,
    /// How often the job-expiry sweep runs.
    pub job_expiry_interval: Duration,
    /// Lower bound applied to client-requested job keep-alive durations.
    pub min_job_expiration: Duration,
    /// How often the history recorder checks for entities gone missing.
    pub missing_check_interval: Duration,
    /// An entity with no history update for this long is recorded as missing.
    pub missing_delay: Duration,
    /// Inactivity expiry for per-session query cache entries.
    pub session_cache_ttl: Duration,
    /// Creation expiry for cross-client query cache entries.
    pub query_cache_ttl: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(2 * 60),
            device_removal_time: Duration::from_secs(10 * 60),
            lab_removal_time: Duration::from_secs(60 * 60),
            first_device_timeout: Duration::from_secs(10),
            job_expiry_interval: Duration::from_secs(5 * 60),
            min_job_expiration: Duration::from_secs(5 * 60),
            missing_check_interval: Duration::from_secs(60),
            missing_delay: Duration::from_secs(10 * 60),
            session_cache_ttl: Duration::from_secs(5 * 60),
            query_cache_ttl: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.cleanup_interval, Duration::from_secs(120));
        assert_eq!(cfg.device_removal_time, Duration::from_secs(600));
        assert_eq!(cfg.lab_removal_time, Duration::from_secs(3600));
        assert_eq!(cfg.min_job_expiration, Duration::from_secs(300));
        assert_eq!(cfg.query_cache_ttl, Duration::from_secs(5));
    }
}
