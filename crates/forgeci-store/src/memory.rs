use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{Entity, Job, Run, Status, Step, Store, StoreError, check_finish, check_transition};

/// In-memory store.
///
/// Holds full run aggregates behind a lock. Useful for tests and for running
/// the engine without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
  runs: RwLock<Vec<Run>>,
}

impl MemoryStore {
  /// Create an empty store.
  pub fn new() -> Self {
    Self::default()
  }
}

fn find_run<'a>(runs: &'a mut [Run], run_id: &str) -> Result<&'a mut Run, StoreError> {
  runs
    .iter_mut()
    .find(|r| r.id == run_id)
    .ok_or_else(|| StoreError::not_found(Entity::Run, run_id))
}

fn find_job<'a>(runs: &'a mut [Run], job_id: &str) -> Result<&'a mut Job, StoreError> {
  runs
    .iter_mut()
    .flat_map(|r| r.jobs.iter_mut())
    .find(|j| j.id == job_id)
    .ok_or_else(|| StoreError::not_found(Entity::Job, job_id))
}

fn find_step<'a>(runs: &'a mut [Run], step_id: &str) -> Result<&'a mut Step, StoreError> {
  runs
    .iter_mut()
    .flat_map(|r| r.jobs.iter_mut())
    .flat_map(|j| j.steps.iter_mut())
    .find(|s| s.id == step_id)
    .ok_or_else(|| StoreError::not_found(Entity::Step, step_id))
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_run(&self, run: &Run) -> Result<(), StoreError> {
    self.runs.write().await.push(run.clone());
    Ok(())
  }

  async fn get_run(&self, run_id: &str) -> Result<Run, StoreError> {
    self
      .runs
      .read()
      .await
      .iter()
      .find(|r| r.id == run_id)
      .cloned()
      .ok_or_else(|| StoreError::not_found(Entity::Run, run_id))
  }

  async fn list_runs(&self, repo: &str) -> Result<Vec<Run>, StoreError> {
    let runs = self.runs.read().await;
    let mut matching: Vec<(usize, Run)> = runs
      .iter()
      .enumerate()
      .filter(|(_, r)| r.repo == repo)
      .map(|(i, r)| (i, r.clone()))
      .collect();
    matching.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
    Ok(matching.into_iter().map(|(_, r)| r).collect())
  }

  async fn list_runs_with_status(&self, status: Status) -> Result<Vec<Run>, StoreError> {
    let runs = self.runs.read().await;
    let mut matching: Vec<Run> = runs.iter().filter(|r| r.status == status).cloned().collect();
    // Stable sort keeps insertion order for equal timestamps.
    matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(matching)
  }

  async fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let before = runs.len();
    runs.retain(|r| r.id != run_id);
    if runs.len() == before {
      return Err(StoreError::not_found(Entity::Run, run_id));
    }
    Ok(())
  }

  async fn start_run(&self, run_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let run = find_run(&mut runs, run_id)?;
    check_transition(Entity::Run, run_id, run.status, Status::InProgress)?;
    run.status = Status::InProgress;
    run.started_at = Some(at);
    Ok(())
  }

  async fn finish_run(
    &self,
    run_id: &str,
    status: Status,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let run = find_run(&mut runs, run_id)?;
    check_finish(Entity::Run, run_id, run.status, status)?;
    run.status = status;
    run.completed_at = Some(at);
    Ok(())
  }

  async fn start_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let job = find_job(&mut runs, job_id)?;
    check_transition(Entity::Job, job_id, job.status, Status::InProgress)?;
    job.status = Status::InProgress;
    job.started_at = Some(at);
    Ok(())
  }

  async fn finish_job(
    &self,
    job_id: &str,
    status: Status,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let job = find_job(&mut runs, job_id)?;
    check_finish(Entity::Job, job_id, job.status, status)?;
    job.status = status;
    job.completed_at = Some(at);
    Ok(())
  }

  async fn cancel_job(&self, job_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let job = find_job(&mut runs, job_id)?;
    if job.status != Status::Queued {
      return Err(StoreError::InvalidTransition {
        entity: Entity::Job,
        id: job_id.to_string(),
        from: job.status,
        to: Status::Cancelled,
      });
    }
    job.status = Status::Cancelled;
    job.completed_at = Some(at);
    for step in job.steps.iter_mut().filter(|s| s.status == Status::Queued) {
      step.status = Status::Cancelled;
      step.completed_at = Some(at);
    }
    Ok(())
  }

  async fn start_step(&self, step_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let step = find_step(&mut runs, step_id)?;
    check_transition(Entity::Step, step_id, step.status, Status::InProgress)?;
    step.status = Status::InProgress;
    step.started_at = Some(at);
    Ok(())
  }

  async fn record_step_result(
    &self,
    step_id: &str,
    status: Status,
    output: &str,
    at: DateTime<Utc>,
  ) -> Result<(), StoreError> {
    let mut runs = self.runs.write().await;
    let step = find_step(&mut runs, step_id)?;
    check_finish(Entity::Step, step_id, step.status, status)?;
    step.status = status;
    step.output = output.to_string();
    step.completed_at = Some(at);
    Ok(())
  }

  async fn cancel_remaining_steps(
    &self,
    job_id: &str,
    at: DateTime<Utc>,
  ) -> Result<u64, StoreError> {
    let mut runs = self.runs.write().await;
    let job = find_job(&mut runs, job_id)?;
    let mut cancelled = 0;
    for step in job.steps.iter_mut().filter(|s| s.status == Status::Queued) {
      step.status = Status::Cancelled;
      step.completed_at = Some(at);
      cancelled += 1;
    }
    Ok(cancelled)
  }
}
