//! Custom assertions for common verification patterns

use sluice_storage::JobExecution;

/// Assert an execution's status string.
#[track_caller]
pub fn assert_status(execution: &JobExecution, expected: &str) {
    assert_eq!(
        execution.status, expected,
        "execution {} has status {:?}, expected {:?}",
        execution.id, execution.status, expected
    );
}

/// Assert an execution carries no throughput metrics.
#[track_caller]
pub fn assert_no_metrics(execution: &JobExecution) {
    assert_eq!(execution.records_processed, None, "records_processed should be null");
    assert_eq!(execution.bytes_transferred, None, "bytes_transferred should be null");
}

/// Assert an execution carries exactly the given metrics.
#[track_caller]
pub fn assert_metrics(execution: &JobExecution, records: i64, bytes: i64) {
    assert_eq!(execution.records_processed, Some(records));
    assert_eq!(execution.bytes_transferred, Some(bytes));
}

/// Assert the merged logs stored on the row contain a fragment.
#[track_caller]
pub fn assert_logs_contain(execution: &JobExecution, fragment: &str) {
    let logs = execution.logs.as_deref().unwrap_or_default();
    assert!(
        logs.contains(fragment),
        "logs {logs:?} do not contain {fragment:?}"
    );
}
