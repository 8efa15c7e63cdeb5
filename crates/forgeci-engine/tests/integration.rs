//! End-to-end tests from workflow documents to terminal run status.

use std::sync::Arc;
use std::time::Duration;

use forgeci_container::{FakeRuntime, Operation};
use forgeci_engine::{Materializer, Scheduler, SchedulerConfig, SchedulerExit, TriggerContext};
use forgeci_executor::ExecutorConfig;
use forgeci_source::MemorySourceProvider;
use forgeci_store::{MemoryStore, Run, Status, Store};
use tokio_util::sync::CancellationToken;

const REPO: &str = "acme/app";

const BUILD_WORKFLOW: &str = r#"
name: Build
on: push
jobs:
  build:
    runs-on: node
    steps:
      - run: npm ci
      - run: npm test
      - run: npm run deploy
"#;

const FAN_OUT_WORKFLOW: &str = r#"
name: Fan out
jobs:
  build:
    runs-on: node
    steps:
      - run: npm ci
      - run: npm test
      - run: npm run deploy
  docs:
    runs-on: weird-tag
    steps:
      - run: echo ok
"#;

const BARE_STEP_WORKFLOW: &str = r#"
jobs:
  noop:
    steps:
      - {}
"#;

struct Harness {
  store: Arc<MemoryStore>,
  runtime: Arc<FakeRuntime>,
  materializer: Materializer,
  scheduler: Scheduler,
}

fn harness(runtime: FakeRuntime, source: MemorySourceProvider) -> Harness {
  let store = Arc::new(MemoryStore::new());
  let runtime = Arc::new(runtime);
  let source = Arc::new(source);
  Harness {
    materializer: Materializer::new(store.clone(), source.clone()),
    scheduler: Scheduler::new(
      store.clone(),
      runtime.clone(),
      source,
      ExecutorConfig::default(),
      SchedulerConfig {
        poll_interval: Duration::from_millis(10),
      },
    ),
    store,
    runtime,
  }
}

fn source_with(files: &[(&str, &str)]) -> MemorySourceProvider {
  files
    .iter()
    .fold(MemorySourceProvider::new(), |source, (name, content)| {
      source.with_file(REPO, "main", &format!(".github/workflows/{name}"), *content)
    })
}

fn context() -> TriggerContext {
  TriggerContext {
    branch: "main".to_string(),
    commit_sha: "0123abcd".to_string(),
    commit_message: "ship it".to_string(),
    triggered_by: "alice".to_string(),
  }
}

async fn trigger_one(h: &Harness) -> Run {
  let mut runs = h.materializer.trigger(REPO, "main", &context()).await.unwrap();
  assert_eq!(runs.len(), 1);
  runs.remove(0)
}

#[tokio::test]
async fn test_failing_step_cascades_within_job() {
  let h = harness(
    FakeRuntime::new().script("npm test", 1, "1 failing\n"),
    source_with(&[("build.yml", BUILD_WORKFLOW)]),
  );
  let run = trigger_one(&h).await;

  let processed = h.scheduler.tick(&CancellationToken::new()).await.unwrap();
  assert_eq!(processed.as_deref(), Some(run.id.as_str()));

  let run = h.store.get_run(&run.id).await.unwrap();
  let job = &run.jobs[0];
  assert_eq!(job.steps[0].status, Status::Success);
  assert_eq!(job.steps[1].status, Status::Failure);
  assert!(job.steps[1].output.ends_with("Process exited with code 1"));
  assert_eq!(job.steps[2].status, Status::Cancelled);
  assert_eq!(job.status, Status::Failure);
  assert_eq!(run.status, Status::Failure);
  assert!(!h.runtime.executed_commands().contains(&"npm run deploy".to_string()));
}

#[tokio::test]
async fn test_every_job_attempted_after_failure() {
  let h = harness(
    FakeRuntime::new().script("npm test", 1, ""),
    source_with(&[("fan-out.yml", FAN_OUT_WORKFLOW)]),
  );
  let run = trigger_one(&h).await;
  h.scheduler.tick(&CancellationToken::new()).await.unwrap();

  let run = h.store.get_run(&run.id).await.unwrap();
  assert_eq!(run.jobs[0].name, "build");
  assert_eq!(run.jobs[0].status, Status::Failure);
  assert_eq!(run.jobs[1].name, "docs");
  assert_eq!(run.jobs[1].status, Status::Success);
  assert_eq!(run.status, Status::Failure);
  assert_eq!(h.runtime.containers_created(), 2);
}

#[tokio::test]
async fn test_unknown_label_uses_default_image() {
  let h = harness(
    FakeRuntime::new(),
    source_with(&[("fan-out.yml", FAN_OUT_WORKFLOW)]),
  );
  trigger_one(&h).await;
  h.scheduler.tick(&CancellationToken::new()).await.unwrap();

  let images: Vec<String> = h
    .runtime
    .calls()
    .into_iter()
    .filter_map(|call| match call {
      forgeci_container::Call::Create { spec } => Some(spec.image),
      _ => None,
    })
    .collect();
  assert_eq!(images, vec!["node:20", "ubuntu:22.04"]);
}

#[tokio::test]
async fn test_invalid_document_does_not_block_valid_one() {
  let h = harness(
    FakeRuntime::new(),
    source_with(&[("broken.yml", "jobs:\n  - [unclosed"), ("build.yml", BUILD_WORKFLOW)]),
  );
  let run = trigger_one(&h).await;
  assert_eq!(run.workflow_name, "Build");
}

#[tokio::test]
async fn test_bare_step_echoes_no_command() {
  let h = harness(
    FakeRuntime::new().script("echo 'No command'", 0, "No command\n"),
    source_with(&[("noop.yml", BARE_STEP_WORKFLOW)]),
  );
  let run = trigger_one(&h).await;
  assert_eq!(run.workflow_name, "noop.yml");
  h.scheduler.tick(&CancellationToken::new()).await.unwrap();

  let run = h.store.get_run(&run.id).await.unwrap();
  let step = &run.jobs[0].steps[0];
  assert_eq!(step.name, "Step");
  assert_eq!(step.status, Status::Success);
  assert_eq!(step.output, "No command\n");
  assert_eq!(h.runtime.executed_commands(), vec!["echo 'No command'"]);
  assert_eq!(run.status, Status::Success);
}

#[tokio::test]
async fn test_tick_without_queued_runs_changes_nothing() {
  let h = harness(FakeRuntime::new(), MemorySourceProvider::new());
  let processed = h.scheduler.tick(&CancellationToken::new()).await.unwrap();
  assert!(processed.is_none());
  assert!(h.runtime.calls().is_empty());
  assert!(h.store.list_runs(REPO).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tick_runs_oldest_first_one_at_a_time() {
  let h = harness(
    FakeRuntime::new(),
    source_with(&[("build.yml", BUILD_WORKFLOW)]),
  );
  let first = trigger_one(&h).await;
  tokio::time::sleep(Duration::from_millis(5)).await;
  let second = trigger_one(&h).await;

  let processed = h.scheduler.tick(&CancellationToken::new()).await.unwrap();
  assert_eq!(processed.as_deref(), Some(first.id.as_str()));
  assert_eq!(h.store.get_run(&second.id).await.unwrap().status, Status::Queued);

  let processed = h.scheduler.tick(&CancellationToken::new()).await.unwrap();
  assert_eq!(processed.as_deref(), Some(second.id.as_str()));
  assert_eq!(h.store.get_run(&second.id).await.unwrap().status, Status::Success);
}

#[tokio::test]
async fn test_bare_run_completes_successfully() {
  let h = harness(FakeRuntime::new(), MemorySourceProvider::new());
  let run = h
    .materializer
    .record_bare_run(REPO, "tag pushed", &context())
    .await
    .unwrap();
  h.scheduler.tick(&CancellationToken::new()).await.unwrap();

  let run = h.store.get_run(&run.id).await.unwrap();
  assert_eq!(run.status, Status::Success);
  assert_eq!(h.runtime.containers_created(), 0);
}

#[tokio::test]
async fn test_timestamps_are_ordered() {
  let h = harness(
    FakeRuntime::new().script("npm test", 1, ""),
    source_with(&[("fan-out.yml", FAN_OUT_WORKFLOW)]),
  );
  let run = trigger_one(&h).await;
  h.scheduler.tick(&CancellationToken::new()).await.unwrap();

  let run = h.store.get_run(&run.id).await.unwrap();
  let run_started = run.started_at.unwrap();
  let run_completed = run.completed_at.unwrap();
  assert!(run.created_at <= run_started && run_started <= run_completed);

  for job in &run.jobs {
    let (started, completed) = (job.started_at.unwrap(), job.completed_at.unwrap());
    assert!(run_started <= started && started <= completed && completed <= run_completed);
    for step in &job.steps {
      if let (Some(started), Some(completed)) = (step.started_at, step.completed_at) {
        assert!(started <= completed);
      }
    }
  }
}

#[tokio::test]
async fn test_scheduler_disabled_when_runtime_unreachable() {
  let h = harness(
    FakeRuntime::new().fail(Operation::Ping),
    source_with(&[("build.yml", BUILD_WORKFLOW)]),
  );
  let run = trigger_one(&h).await;

  let exit = h.scheduler.run(CancellationToken::new()).await;
  assert_eq!(exit, SchedulerExit::Disabled);
  assert_eq!(h.store.get_run(&run.id).await.unwrap().status, Status::Queued);
}

#[tokio::test]
async fn test_scheduler_loop_drains_queue_until_cancelled() {
  let h = harness(
    FakeRuntime::new(),
    source_with(&[("build.yml", BUILD_WORKFLOW), ("fan-out.yml", FAN_OUT_WORKFLOW)]),
  );
  let runs = h.materializer.trigger(REPO, "main", &context()).await.unwrap();
  assert_eq!(runs.len(), 2);

  let cancel = CancellationToken::new();
  let loop_cancel = cancel.clone();
  let store = h.store.clone();
  let watcher = async move {
    loop {
      if store.list_queued_runs().await.unwrap().is_empty() {
        loop_cancel.cancel();
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  };

  let (exit, ()) = tokio::join!(h.scheduler.run(cancel), watcher);
  assert_eq!(exit, SchedulerExit::Cancelled);
  for run in runs {
    assert!(h.store.get_run(&run.id).await.unwrap().status.is_terminal());
  }
}

#[tokio::test]
async fn test_tick_after_shutdown_leaves_run_queued() {
  let h = harness(
    FakeRuntime::new(),
    source_with(&[("fan-out.yml", FAN_OUT_WORKFLOW)]),
  );
  let run = trigger_one(&h).await;

  let cancel = CancellationToken::new();
  cancel.cancel();
  let processed = h.scheduler.tick(&cancel).await.unwrap();
  assert!(processed.is_none());

  let run = h.store.get_run(&run.id).await.unwrap();
  assert_eq!(run.status, Status::Queued);
  assert!(run.started_at.is_none());
  assert!(run.jobs.iter().all(|j| j.status == Status::Queued));
  assert!(h.runtime.calls().is_empty());
}

const SLOW_WORKFLOW: &str = r#"
name: Slow
jobs:
  build:
    steps:
      - run: make
"#;

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_run_never_starts_next_run() {
  let h = harness(
    FakeRuntime::new().delay("make", Duration::from_millis(30)),
    source_with(&[("slow.yml", SLOW_WORKFLOW)]),
  );
  let first = trigger_one(&h).await;
  let second = trigger_one(&h).await;

  let cancel = CancellationToken::new();
  let shutdown = async {
    tokio::time::sleep(Duration::from_millis(15)).await;
    cancel.cancel();
  };
  let (exit, ()) = tokio::join!(h.scheduler.run(cancel.clone()), shutdown);
  assert_eq!(exit, SchedulerExit::Cancelled);

  let first = h.store.get_run(&first.id).await.unwrap();
  assert_eq!(first.status, Status::Success);
  assert_eq!(first.jobs[0].steps[0].status, Status::Success);

  let second = h.store.get_run(&second.id).await.unwrap();
  assert_eq!(second.status, Status::Queued);
  assert!(second.started_at.is_none());
  assert_eq!(h.runtime.containers_created(), 1);
}
