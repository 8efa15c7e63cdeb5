//! Failure propagation rules.
//!
//! A failing step cancels the remaining steps of its own job and fails that
//! job. Jobs never affect each other; the run only aggregates their results.

use forgeci_store::Status;

/// Final status of a run from the statuses of its jobs.
///
/// `Success` only if every job succeeded. A run without jobs succeeds.
pub fn aggregate_status<I>(jobs: I) -> Status
where
  I: IntoIterator<Item = Status>,
{
  if jobs.into_iter().all(|status| status == Status::Success) {
    Status::Success
  } else {
    Status::Failure
  }
}

/// Line appended to the output of a step that exited non-zero.
pub fn exit_marker(exit_code: i64) -> String {
  format!("Process exited with code {exit_code}")
}

/// Output recorded for a failed step: the captured output followed by the
/// exit marker on its own line.
pub fn failure_output(output: &str, exit_code: i64) -> String {
  let marker = exit_marker(exit_code);
  if output.is_empty() {
    marker
  } else if output.ends_with('\n') {
    format!("{output}{marker}")
  } else {
    format!("{output}\n{marker}")
  }
}
