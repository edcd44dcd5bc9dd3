//! Metrics collection
//!
//! Thin wrappers around the `metrics` facade. Nothing is recorded unless the
//! host process installs a recorder.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Counter of runner item outcomes, labelled by `outcome`.
pub const RUNNER_OUTCOMES: &str = "benchdb_runner_outcomes_total";
/// Counter of executed queries.
pub const QUERIES_TOTAL: &str = "benchdb_queries_total";
/// Histogram of query execution time.
pub const QUERY_DURATION: &str = "benchdb_query_duration_seconds";
/// Counter of attribute writes, labelled by `op`.
pub const ATTRIBUTE_WRITES: &str = "benchdb_attribute_writes_total";

/// Register descriptions for every metric the crate emits.
pub fn describe() {
    describe_counter!(RUNNER_OUTCOMES, "Runner work items by outcome");
    describe_counter!(QUERIES_TOTAL, "Compiled queries executed");
    describe_histogram!(QUERY_DURATION, "Query execution time in seconds");
    describe_counter!(ATTRIBUTE_WRITES, "Attribute updates written by the runner");
}

/// Record one runner outcome (`completed`, `failed`, `worker_lost`, `timed_out`, `skipped`).
pub fn record_outcome(outcome: &'static str, count: usize) {
    counter!(RUNNER_OUTCOMES, "outcome" => outcome).increment(count as u64);
}

/// Record one executed query.
pub fn record_query(duration: Duration, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(QUERIES_TOTAL, "status" => status).increment(1);
    histogram!(QUERY_DURATION).record(duration.as_secs_f64());
}

/// Record attribute writes of one result record.
pub fn record_writes(op: &'static str, count: usize) {
    counter!(ATTRIBUTE_WRITES, "op" => op).increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe();
        record_outcome("completed", 3);
        record_query(Duration::from_millis(5), true);
        record_writes("insert", 2);
    }
}
