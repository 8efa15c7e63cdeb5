//! Error types for run execution.

use forgeci_container::ContainerError;
use forgeci_store::StoreError;
use thiserror::Error;

/// Errors that escape job or run execution.
///
/// Step failures are not errors: they are recorded as statuses. These
/// variants cover the cases where the executor could not make progress at all.
#[derive(Debug, Error)]
pub enum ExecutorError {
  /// Reading or writing run state failed.
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  /// Shutdown was requested before the run started. The run is left queued.
  #[error("run execution cancelled before start")]
  Cancelled,

  /// Provisioning the job container failed.
  #[error("container provisioning failed: {0}")]
  Container(#[from] ContainerError),
}
