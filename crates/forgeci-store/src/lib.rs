//! forgeci Store
//!
//! This crate provides the storage trait and implementations for runs, jobs
//! and steps. A run owns its jobs and a job owns its steps; deleting a run
//! deletes both.
//!
//! The [`Store`] trait exposes small named commands instead of free-form
//! updates. Each command validates the current status before writing, so a
//! terminal status can never be revisited:
//! - [`Store::start_run`] / [`Store::finish_run`]
//! - [`Store::start_job`] / [`Store::finish_job`] / [`Store::cancel_job`]
//! - [`Store::start_step`] / [`Store::record_step_result`] / [`Store::cancel_remaining_steps`]
//!
//! Every write is durable when the call returns, so readers observe partial
//! progress of an executing run.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{Job, Run, Status, Step};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Kind of record a store error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
  Run,
  Job,
  Step,
}

impl std::fmt::Display for Entity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Entity::Run => "run",
      Entity::Job => "job",
      Entity::Step => "step",
    })
  }
}

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The requested record was not found.
  #[error("{entity} not found: {id}")]
  NotFound { entity: Entity, id: String },

  /// The record is not in a status that allows the requested change.
  #[error("{entity} {id} cannot move from {from} to {to}")]
  InvalidTransition {
    entity: Entity,
    id: String,
    from: Status,
    to: Status,
  },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
  pub(crate) fn not_found(entity: Entity, id: &str) -> Self {
    Self::NotFound {
      entity,
      id: id.to_string(),
    }
  }
}

/// Check a transition and produce the matching error when it is illegal.
pub(crate) fn check_transition(
  entity: Entity,
  id: &str,
  from: Status,
  to: Status,
) -> Result<(), StoreError> {
  if from.can_transition_to(to) {
    Ok(())
  } else {
    Err(StoreError::InvalidTransition {
      entity,
      id: id.to_string(),
      from,
      to,
    })
  }
}

/// Check that an in-progress record may finish with `to`.
pub(crate) fn check_finish(
  entity: Entity,
  id: &str,
  from: Status,
  to: Status,
) -> Result<(), StoreError> {
  if from == Status::InProgress && to.is_terminal() {
    Ok(())
  } else {
    Err(StoreError::InvalidTransition {
      entity,
      id: id.to_string(),
      from,
      to,
    })
  }
}

/// Storage trait for runs, jobs and steps.
#[async_trait]
pub trait Store: Send + Sync {
  /// Persist a new run together with its jobs and steps.
  async fn create_run(&self, run: &Run) -> Result<(), StoreError>;

  /// Get a run with its jobs and steps.
  async fn get_run(&self, run_id: &str) -> Result<Run, StoreError>;

  /// List runs of a repository, newest first.
  async fn list_runs(&self, repo: &str) -> Result<Vec<Run>, StoreError>;

  /// List runs in the given status, oldest first.
  async fn list_runs_with_status(&self, status: Status) -> Result<Vec<Run>, StoreError>;

  /// List queued runs, oldest first.
  async fn list_queued_runs(&self) -> Result<Vec<Run>, StoreError> {
    self.list_runs_with_status(Status::Queued).await
  }

  /// Delete a run and everything it owns.
  async fn delete_run(&self, run_id: &str) -> Result<(), StoreError>;

  /// Move a queued run to in progress.
  async fn start_run(&self, run_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

  /// Move an in-progress run to a terminal status.
  async fn finish_run(
    &self,
    run_id: &str,
    status: Status,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError>;

  /// Move a queued job to in progress.
  async fn start_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

  /// Move an in-progress job to a terminal status.
  async fn finish_job(
    &self,
    job_id: &str,
    status: Status,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError>;

  /// Cancel a job that never started, along with all of its steps.
  async fn cancel_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

  /// Move a queued step to in progress.
  async fn start_step(&self, step_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

  /// Record the outcome and output of an in-progress step.
  async fn record_step_result(
    &self,
    step_id: &str,
    status: Status,
    output: &str,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError>;

  /// Cancel every still-queued step of a job. Returns how many were cancelled.
  async fn cancel_remaining_steps(
    &self,
    job_id: &str,
    at: DateTime<Utc>,
  ) -> Result<u64, StoreError>;
}
