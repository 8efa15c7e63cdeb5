//! Expansion of workflow definitions into persisted runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use forgeci_config::WorkflowDefinition;
use forgeci_source::{LoaderConfig, SourceProvider, load_definitions};
use forgeci_store::{Run, Store};
use tracing::info;

use crate::error::EngineError;

/// What caused a run: the pushed branch and commit and who pushed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerContext {
  pub branch: String,
  pub commit_sha: String,
  pub commit_message: String,
  pub triggered_by: String,
}

/// Build the queued run for `definition` without persisting it.
///
/// Jobs follow the definition's declaration order and steps keep their
/// document order.
pub fn build_run(
  repo: &str,
  definition: &WorkflowDefinition,
  context: &TriggerContext,
  created_at: DateTime<Utc>,
) -> Run {
  let mut run = queued_run(repo, &definition.name, context, created_at);
  for (name, job_definition) in &definition.jobs {
    let job = run.push_job(name.as_str(), job_definition.runs_on.as_str());
    for step in &job_definition.steps {
      job.push_step(
        step.display_name(),
        step.command(),
        step.action_reference().map(str::to_string),
      );
    }
  }
  run
}

fn queued_run(
  repo: &str,
  workflow_name: &str,
  context: &TriggerContext,
  created_at: DateTime<Utc>,
) -> Run {
  Run::queued(
    repo,
    workflow_name,
    context.branch.as_str(),
    context.commit_sha.as_str(),
    context.commit_message.as_str(),
    context.triggered_by.as_str(),
    created_at,
  )
}

/// Persists queued runs. It never touches a run after creating it.
pub struct Materializer {
  store: Arc<dyn Store>,
  source: Arc<dyn SourceProvider>,
  loader: LoaderConfig,
}

impl Materializer {
  pub fn new(store: Arc<dyn Store>, source: Arc<dyn SourceProvider>) -> Self {
    Self::with_loader_config(store, source, LoaderConfig::default())
  }

  pub fn with_loader_config(
    store: Arc<dyn Store>,
    source: Arc<dyn SourceProvider>,
    loader: LoaderConfig,
  ) -> Self {
    Self {
      store,
      source,
      loader,
    }
  }

  /// Persist a queued run mirroring `definition`.
  pub async fn materialize(
    &self,
    repo: &str,
    definition: &WorkflowDefinition,
    context: &TriggerContext,
  ) -> Result<Run, EngineError> {
    let run = build_run(repo, definition, context, Utc::now());
    self.store.create_run(&run).await?;
    info!(
      run_id = %run.id,
      repo = %repo,
      workflow = %run.workflow_name,
      jobs = run.jobs.len(),
      "run_queued"
    );
    Ok(run)
  }

  /// Record a run with no jobs, for triggers that are not backed by a
  /// workflow document.
  pub async fn record_bare_run(
    &self,
    repo: &str,
    workflow_name: &str,
    context: &TriggerContext,
  ) -> Result<Run, EngineError> {
    let run = queued_run(repo, workflow_name, context, Utc::now());
    self.store.create_run(&run).await?;
    info!(run_id = %run.id, repo = %repo, workflow = %workflow_name, "bare_run_recorded");
    Ok(run)
  }

  /// Queue one run for every workflow definition of `repo` at `reference`.
  pub async fn trigger(
    &self,
    repo: &str,
    reference: &str,
    context: &TriggerContext,
  ) -> Result<Vec<Run>, EngineError> {
    let definitions = load_definitions(self.source.as_ref(), repo, reference, &self.loader).await?;
    let mut runs = Vec::with_capacity(definitions.len());
    for definition in &definitions {
      runs.push(self.materialize(repo, definition, context).await?);
    }
    info!(repo = %repo, reference = %reference, runs = runs.len(), "workflows_triggered");
    Ok(runs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use forgeci_config::parse_workflow;
  use forgeci_source::MemorySourceProvider;
  use forgeci_store::{MemoryStore, Status};

  fn context() -> TriggerContext {
    TriggerContext {
      branch: "main".to_string(),
      commit_sha: "abc123".to_string(),
      commit_message: "add feature".to_string(),
      triggered_by: "alice".to_string(),
    }
  }

  const WORKFLOW: &str = r#"
name: CI
on: push
jobs:
  test:
    runs-on: node
    steps:
      - name: Install
        run: npm ci
      - uses: actions/cache@v4
      - name: Announce
  build:
    steps:
      - run: make
"#;

  #[test]
  fn test_build_run_mirrors_definition() {
    let definition = parse_workflow("ci.yml", WORKFLOW.as_bytes()).unwrap();
    let run = build_run("acme/app", &definition, &context(), Utc::now());

    assert_eq!(run.status, Status::Queued);
    assert_eq!(run.workflow_name, "CI");
    assert_eq!(run.commit_sha, "abc123");
    assert_eq!(run.triggered_by, "alice");

    let names: Vec<&str> = run.jobs.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, vec!["test", "build"]);
    assert_eq!(run.jobs[0].runs_on, "node");
    assert_eq!(run.jobs[1].runs_on, "ubuntu-latest");

    let steps = &run.jobs[0].steps;
    assert_eq!(steps[0].name, "Install");
    assert_eq!(steps[0].command.as_deref(), Some("npm ci"));
    assert_eq!(steps[1].name, "actions/cache@v4");
    assert_eq!(steps[1].command, None);
    assert_eq!(steps[1].uses.as_deref(), Some("actions/cache@v4"));
    assert_eq!(steps[2].command.as_deref(), Some("Announce"));
    assert!(
      run
        .jobs
        .iter()
        .flat_map(|j| &j.steps)
        .all(|s| s.status == Status::Queued)
    );
  }

  #[tokio::test]
  async fn test_trigger_queues_run_per_definition() {
    let store = Arc::new(MemoryStore::new());
    let source = MemorySourceProvider::new()
      .with_file("acme/app", "main", ".github/workflows/ci.yml", WORKFLOW)
      .with_file("acme/app", "main", ".github/workflows/lint.yaml", "jobs:\n  lint:\n    steps:\n      - run: ruff\n")
      .with_file("acme/app", "main", ".github/workflows/broken.yml", "jobs: [");
    let materializer = Materializer::new(store.clone(), Arc::new(source));

    let runs = materializer.trigger("acme/app", "main", &context()).await.unwrap();
    assert_eq!(runs.len(), 2);

    let queued = store.list_queued_runs().await.unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].workflow_name, "CI");
    assert_eq!(queued[1].workflow_name, "lint.yaml");
  }

  #[tokio::test]
  async fn test_record_bare_run() {
    let store = Arc::new(MemoryStore::new());
    let materializer = Materializer::new(store.clone(), Arc::new(MemorySourceProvider::new()));

    let run = materializer
      .record_bare_run("acme/app", "push", &context())
      .await
      .unwrap();
    let stored = store.get_run(&run.id).await.unwrap();
    assert!(stored.jobs.is_empty());
    assert_eq!(stored.status, Status::Queued);
  }
}
