//! Finalization of runs that can no longer make progress.

use chrono::Utc;
use forgeci_store::{Run, Status, Store};
use tracing::{info, warn};

use crate::error::EngineError;

/// Output given to a step that was running when the engine stopped.
pub const INTERRUPTED_OUTPUT: &str = "interrupted: engine restarted";

/// Drive every non-terminal part of an in-progress run to a terminal status.
///
/// In-progress steps fail with `reason` appended to their output, queued
/// steps and jobs are cancelled, in-progress jobs fail and the run fails.
pub async fn abandon_run(store: &dyn Store, run: &Run, reason: &str) -> Result<(), EngineError> {
  let now = Utc::now();
  for job in &run.jobs {
    match job.status {
      Status::Queued => store.cancel_job(&job.id, now).await?,
      Status::InProgress => {
        for step in job.steps.iter().filter(|s| s.status == Status::InProgress) {
          let output = if step.output.is_empty() {
            reason.to_string()
          } else {
            format!("{}\n{reason}", step.output.trim_end_matches('\n'))
          };
          store
            .record_step_result(&step.id, Status::Failure, &output, now)
            .await?;
        }
        store.cancel_remaining_steps(&job.id, now).await?;
        store.finish_job(&job.id, Status::Failure, now).await?;
      }
      _ => {}
    }
  }

  if run.status == Status::InProgress {
    store.finish_run(&run.id, Status::Failure, now).await?;
  }
  warn!(run_id = %run.id, reason = %reason, "run_abandoned");
  Ok(())
}

/// Fail every run left in progress by a previous process. Returns how many
/// runs were recovered.
pub async fn recover_interrupted(store: &dyn Store) -> Result<usize, EngineError> {
  let interrupted = store.list_runs_with_status(Status::InProgress).await?;
  for run in &interrupted {
    abandon_run(store, run, INTERRUPTED_OUTPUT).await?;
  }
  if !interrupted.is_empty() {
    info!(runs = interrupted.len(), "recovered interrupted runs");
  }
  Ok(interrupted.len())
}
