//! Exit status and output classification.

use q4d_core::TransferOutcome;

/// Output fragments meaning a retry cannot succeed.
const PERMANENT_MARKERS: &[&str] = &[
    "no such file or directory",
    "permission denied",
    "login incorrect",
    "read-only file system",
    "no space left on device",
];

/// Output fragments meaning the failure is likely to clear on its own.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection timed out",
    "connection reset",
    "network is unreachable",
    "no route to host",
    "temporary failure in name resolution",
    "max-retries exceeded",
    "broken pipe",
];

/// Classify a finished run from its exit code and captured output tail.
pub(crate) fn classify(exit_code: Option<i32>, tail: &[String]) -> TransferOutcome {
    if exit_code == Some(0) {
        return TransferOutcome::Success;
    }
    let status = exit_code.map_or_else(
        || "terminated by signal".to_string(),
        |code| format!("exit status {code}"),
    );

    if let Some(line) = find_marker(tail, PERMANENT_MARKERS) {
        return TransferOutcome::PermanentFailure(format!("{status}: {line}"));
    }
    if let Some(line) = find_marker(tail, TRANSIENT_MARKERS) {
        return TransferOutcome::TransientFailure(format!("{status}: {line}"));
    }
    match tail.last() {
        Some(line) => TransferOutcome::TransientFailure(format!("{status}: {line}")),
        None => TransferOutcome::TransientFailure(status),
    }
}

fn find_marker<'a>(tail: &'a [String], markers: &[&str]) -> Option<&'a str> {
    tail.iter()
        .rev()
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            markers.iter().any(|marker| lower.contains(marker))
        })
        .map(String::as_str)
}
