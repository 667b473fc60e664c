//! Metric names and label keys.

/// Discovery and sync cycle metrics
pub mod discovery {
    /// Completed sync cycles, labelled by `result` (`ok` / `error`)
    pub const CYCLES_TOTAL: &str = "volbroker_discovery_cycles_total";
    /// Wall time of one discover-merge-publish cycle
    pub const CYCLE_DURATION_SECONDS: &str = "volbroker_discovery_cycle_duration_seconds";
    /// Drivers skipped in a cycle, labelled by `protocol` and `reason`
    pub const DRIVERS_REJECTED_TOTAL: &str = "volbroker_discovery_drivers_rejected_total";
    /// Fresh plugin handles constructed, labelled by `protocol`
    pub const HANDLES_CREATED_TOTAL: &str = "volbroker_discovery_handles_created_total";
}

/// Registry metrics
pub mod registry {
    /// Plugins in the current snapshot
    pub const PLUGINS: &str = "volbroker_registry_plugins";
}

/// Mount purge metrics
pub mod purge {
    /// Volumes unmounted by the startup sweep
    pub const UNMOUNTED_TOTAL: &str = "volbroker_purge_unmounted_total";
    /// List or unmount calls that failed during the sweep
    pub const FAILURES_TOTAL: &str = "volbroker_purge_failures_total";
}

/// Front-end HTTP metrics
pub mod http {
    /// Requests served, labelled by `endpoint`, `method` and `status`
    pub const REQUESTS_TOTAL: &str = "volbroker_http_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "volbroker_http_request_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const PROTOCOL: &str = "protocol";
    pub const REASON: &str = "reason";
    pub const RESULT: &str = "result";
    pub const STATUS: &str = "status";
}

#[cfg(feature = "prometheus")]
pub(crate) mod buckets {
    /// Discovery cycles include network probes with retry, so the tail is long.
    pub const CYCLE_DURATION: [f64; 10] =
        [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 60.0];
}
