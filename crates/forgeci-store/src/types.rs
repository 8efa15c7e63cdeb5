use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status shared by runs, jobs and steps.
///
/// Transitions only move forward: `queued -> in_progress -> {success, failure, cancelled}`,
/// plus `queued -> cancelled` for work that is never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Status {
  Queued,
  InProgress,
  Success,
  Failure,
  Cancelled,
}

impl Status {
  /// Whether this status is final.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Success | Self::Failure | Self::Cancelled)
  }

  /// Whether moving from `self` to `next` is a legal transition.
  pub fn can_transition_to(self, next: Status) -> bool {
    match (self, next) {
      (Self::Queued, Self::InProgress) | (Self::Queued, Self::Cancelled) => true,
      (Self::InProgress, next) => next.is_terminal(),
      _ => false,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::InProgress => "in_progress",
      Self::Success => "success",
      Self::Failure => "failure",
      Self::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One execution attempt of a workflow, with its jobs in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub id: String,
  pub repo: String,
  pub workflow_name: String,
  pub branch: String,
  pub commit_sha: String,
  pub commit_message: String,
  pub triggered_by: String,
  pub status: Status,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub jobs: Vec<Job>,
}

/// A unit of work inside a run, executed in one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub id: String,
  pub run_id: String,
  pub position: i64,
  pub name: String,
  pub runs_on: String,
  pub status: Status,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub steps: Vec<Step>,
}

/// One command inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub id: String,
  pub job_id: String,
  pub position: i64,
  pub name: String,
  /// Shell command to run, if any.
  pub command: Option<String>,
  /// Reusable action reference. Stored but never executed.
  pub uses: Option<String>,
  pub status: Status,
  pub output: String,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
  /// Build a queued run with no jobs. Jobs are pushed with [`Run::push_job`].
  #[allow(clippy::too_many_arguments)]
  pub fn queued(
    repo: impl Into<String>,
    workflow_name: impl Into<String>,
    branch: impl Into<String>,
    commit_sha: impl Into<String>,
    commit_message: impl Into<String>,
    triggered_by: impl Into<String>,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      repo: repo.into(),
      workflow_name: workflow_name.into(),
      branch: branch.into(),
      commit_sha: commit_sha.into(),
      commit_message: commit_message.into(),
      triggered_by: triggered_by.into(),
      status: Status::Queued,
      created_at,
      started_at: None,
      completed_at: None,
      jobs: Vec::new(),
    }
  }

  /// Append a queued job and return it for adding steps.
  pub fn push_job(&mut self, name: impl Into<String>, runs_on: impl Into<String>) -> &mut Job {
    let position = self.jobs.len() as i64;
    self.jobs.push(Job {
      id: uuid::Uuid::new_v4().to_string(),
      run_id: self.id.clone(),
      position,
      name: name.into(),
      runs_on: runs_on.into(),
      status: Status::Queued,
      started_at: None,
      completed_at: None,
      steps: Vec::new(),
    });
    let last = self.jobs.len() - 1;
    &mut self.jobs[last]
  }

  /// Look up a job by ID.
  pub fn job(&self, job_id: &str) -> Option<&Job> {
    self.jobs.iter().find(|j| j.id == job_id)
  }
}

impl Job {
  /// Append a queued step.
  pub fn push_step(
    &mut self,
    name: impl Into<String>,
    command: Option<String>,
    uses: Option<String>,
  ) -> &mut Step {
    let position = self.steps.len() as i64;
    self.steps.push(Step {
      id: uuid::Uuid::new_v4().to_string(),
      job_id: self.id.clone(),
      position,
      name: name.into(),
      command,
      uses,
      status: Status::Queued,
      output: String::new(),
      started_at: None,
      completed_at: None,
    });
    let last = self.steps.len() - 1;
    &mut self.steps[last]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_forward_only_transitions() {
    assert!(Status::Queued.can_transition_to(Status::InProgress));
    assert!(Status::Queued.can_transition_to(Status::Cancelled));
    assert!(!Status::Queued.can_transition_to(Status::Success));
    assert!(Status::InProgress.can_transition_to(Status::Failure));
    assert!(!Status::InProgress.can_transition_to(Status::Queued));
    for terminal in [Status::Success, Status::Failure, Status::Cancelled] {
      assert!(terminal.is_terminal());
      for next in [
        Status::Queued,
        Status::InProgress,
        Status::Success,
        Status::Failure,
        Status::Cancelled,
      ] {
        assert!(!terminal.can_transition_to(next));
      }
    }
  }

  #[test]
  fn test_push_job_and_step_positions() {
    let mut run = Run::queued("acme/app", "CI", "main", "abc", "msg", "alice", Utc::now());
    let job = run.push_job("build", "node");
    job.push_step("one", Some("true".to_string()), None);
    job.push_step("two", None, Some("actions/checkout@v4".to_string()));
    run.push_job("test", "python");

    assert_eq!(run.jobs[0].position, 0);
    assert_eq!(run.jobs[1].position, 1);
    assert_eq!(run.jobs[0].run_id, run.id);
    assert_eq!(run.jobs[0].steps[1].position, 1);
    assert_eq!(run.jobs[0].steps[1].job_id, run.jobs[0].id);
    assert!(run.job(&run.jobs[1].id).is_some());
  }
}
