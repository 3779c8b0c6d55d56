// Metric names and descriptions for the lock manager
// Recorded through the `metrics` facade; installing an exporter is up to the application.

use metrics::{describe_counter, describe_gauge};

pub const LOCK_ATTEMPTS_TOTAL: &str = "dlm_lock_attempts_total";
pub const LOCK_ACQUIRED_TOTAL: &str = "dlm_lock_acquired_total";
pub const LOCK_FAILED_TOTAL: &str = "dlm_lock_failed_total";
pub const RENEW_TOTAL: &str = "dlm_renew_total";
pub const CONNECTED_NODES: &str = "dlm_connected_nodes";

/// Register metric descriptions. Call once at startup.
pub fn describe_metrics() {
    describe_counter!(
        LOCK_ATTEMPTS_TOTAL,
        "Total number of quorum acquisition rounds"
    );
    describe_counter!(LOCK_ACQUIRED_TOTAL, "Total number of locks granted");
    describe_counter!(
        LOCK_FAILED_TOTAL,
        "Total number of lock calls that exhausted their retries"
    );
    describe_counter!(
        RENEW_TOTAL,
        "Total number of renewal rounds, labelled by result"
    );
    describe_gauge!(
        CONNECTED_NODES,
        "Number of nodes connected after the last connect()"
    );
}
