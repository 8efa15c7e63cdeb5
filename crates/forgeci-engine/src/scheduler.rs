//! Background polling of queued runs.

use std::sync::Arc;
use std::time::Duration;

use forgeci_container::ContainerRuntime;
use forgeci_executor::{ExecutorConfig, ExecutorError, RunExecutor};
use forgeci_source::SourceProvider;
use forgeci_store::{Status, Store};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::EngineError;
use crate::recovery::{abandon_run, recover_interrupted};

/// Time between polls for queued runs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }
}

/// Why [`Scheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
  /// The cancellation token fired.
  Cancelled,
  /// The container runtime was unreachable at startup. The scheduler does
  /// not retry.
  Disabled,
}

/// Polls for queued runs and executes them one at a time, oldest first.
pub struct Scheduler {
  store: Arc<dyn Store>,
  runtime: Arc<dyn ContainerRuntime>,
  executor: RunExecutor,
  config: SchedulerConfig,
}

impl Scheduler {
  pub fn new(
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
    source: Arc<dyn SourceProvider>,
    executor_config: ExecutorConfig,
    config: SchedulerConfig,
  ) -> Self {
    Self {
      executor: RunExecutor::new(store.clone(), runtime.clone(), source, executor_config),
      store,
      runtime,
      config,
    }
  }

  /// Execute the oldest queued run, if any, and return its ID.
  ///
  /// Nothing is dequeued once `cancel` has fired. A run that fails to execute
  /// is abandoned as `Failure`; that error is logged and not returned.
  pub async fn tick(&self, cancel: &CancellationToken) -> Result<Option<String>, EngineError> {
    if cancel.is_cancelled() {
      return Ok(None);
    }
    let Some(run) = self.store.list_queued_runs().await?.into_iter().next() else {
      debug!("no queued runs");
      return Ok(None);
    };

    match self.executor.execute(&run.id, cancel).await {
      Ok(_) => {}
      Err(ExecutorError::Cancelled) => {
        debug!(run_id = %run.id, "shutdown requested, run left queued");
        return Ok(None);
      }
      Err(e) => self.abandon_after_error(&run.id, e).await?,
    }
    Ok(Some(run.id))
  }

  async fn abandon_after_error(&self, run_id: &str, e: ExecutorError) -> Result<(), EngineError> {
    error!(run_id = %run_id, error = %e, "run execution aborted");
    let current = self.store.get_run(run_id).await?;
    if current.status == Status::InProgress {
      abandon_run(self.store.as_ref(), &current, &format!("execution aborted: {e}")).await?;
    }
    Ok(())
  }

  /// Run the polling loop until `cancel` fires.
  ///
  /// The runtime is pinged once up front; if it cannot be reached the
  /// scheduler returns [`SchedulerExit::Disabled`] without polling.
  pub async fn run(&self, cancel: CancellationToken) -> SchedulerExit {
    if let Err(e) = self.runtime.ping().await {
      error!(error = %e, "container runtime unreachable, scheduler disabled");
      return SchedulerExit::Disabled;
    }

    if let Err(e) = recover_interrupted(self.store.as_ref()).await {
      error!(error = %e, "failed to recover interrupted runs");
    }

    info!(poll_interval = ?self.config.poll_interval, "scheduler started");

    let mut interval = tokio::time::interval(self.config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!("scheduler cancelled");
          return SchedulerExit::Cancelled;
        }
        _ = interval.tick() => {}
      }

      match self.tick(&cancel).await {
        Ok(Some(run_id)) => debug!(run_id = %run_id, "tick processed run"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "scheduler tick failed"),
      }
    }
  }
}
