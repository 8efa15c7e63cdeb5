use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{ContainerError, ContainerRuntime, ContainerSpec, ExecOutput};

/// Runtime operation, used to inject failures into [`FakeRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  Ping,
  Pull,
  Create,
  Start,
  Exec,
  Stop,
  Remove,
}

impl Operation {
  fn name(self) -> &'static str {
    match self {
      Operation::Ping => "ping",
      Operation::Pull => "pull",
      Operation::Create => "create",
      Operation::Start => "start",
      Operation::Exec => "exec",
      Operation::Stop => "stop",
      Operation::Remove => "remove",
    }
  }
}

/// A call observed by [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
  Ping,
  Pull { image: String },
  Create { spec: ContainerSpec },
  Start { id: String },
  Exec { id: String, argv: Vec<String> },
  Stop { id: String, grace: Duration },
  Remove { id: String, force: bool },
}

/// In-memory container runtime for tests.
///
/// Every call is recorded. Execs are matched by their last argument (the
/// command passed to `sh -c`) against scripted results; unscripted commands
/// exit 0 with no output.
#[derive(Debug, Default)]
pub struct FakeRuntime {
  calls: Mutex<Vec<Call>>,
  scripts: HashMap<String, ExecOutput>,
  delays: HashMap<String, Duration>,
  failing: HashSet<Operation>,
  failing_commands: HashSet<String>,
  next_id: AtomicUsize,
}

impl FakeRuntime {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reply to `command` with the given exit code and output.
  pub fn script(mut self, command: impl Into<String>, exit_code: i64, output: impl Into<String>) -> Self {
    self
      .scripts
      .insert(command.into(), ExecOutput::new(exit_code, output));
    self
  }

  /// Make `command` take `delay` before it returns.
  pub fn delay(mut self, command: impl Into<String>, delay: Duration) -> Self {
    self.delays.insert(command.into(), delay);
    self
  }

  /// Make every call of `operation` fail.
  pub fn fail(mut self, operation: Operation) -> Self {
    self.failing.insert(operation);
    self
  }

  /// Make exec of `command` fail with a transport error.
  pub fn fail_command(mut self, command: impl Into<String>) -> Self {
    self.failing_commands.insert(command.into());
    self
  }

  /// All calls seen so far, in order.
  pub fn calls(&self) -> Vec<Call> {
    self.lock().clone()
  }

  /// The commands passed to exec, in order.
  pub fn executed_commands(&self) -> Vec<String> {
    self
      .lock()
      .iter()
      .filter_map(|call| match call {
        Call::Exec { argv, .. } => argv.last().cloned(),
        _ => None,
      })
      .collect()
  }

  /// How many containers were created.
  pub fn containers_created(&self) -> usize {
    self
      .lock()
      .iter()
      .filter(|call| matches!(call, Call::Create { .. }))
      .count()
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Call>> {
    self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn record(&self, call: Call, operation: Operation) -> Result<(), ContainerError> {
    self.lock().push(call);
    if self.failing.contains(&operation) {
      return Err(ContainerError::Operation {
        operation: operation.name(),
        message: "injected failure".to_string(),
      });
    }
    Ok(())
  }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
  async fn ping(&self) -> Result<(), ContainerError> {
    self.record(Call::Ping, Operation::Ping)
  }

  async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
    self.record(
      Call::Pull {
        image: image.to_string(),
      },
      Operation::Pull,
    )
  }

  async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
    self.record(Call::Create { spec: spec.clone() }, Operation::Create)?;
    let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(format!("fake-{n}"))
  }

  async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
    self.record(Call::Start { id: id.to_string() }, Operation::Start)
  }

  async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, ContainerError> {
    self.record(
      Call::Exec {
        id: id.to_string(),
        argv: argv.to_vec(),
      },
      Operation::Exec,
    )?;

    let command = argv.last().map(String::as_str).unwrap_or_default();
    if let Some(delay) = self.delays.get(command) {
      tokio::time::sleep(*delay).await;
    }
    if self.failing_commands.contains(command) {
      return Err(ContainerError::Operation {
        operation: "exec",
        message: format!("connection lost while running '{command}'"),
      });
    }

    Ok(self.scripts.get(command).cloned().unwrap_or_default())
  }

  async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), ContainerError> {
    self.record(
      Call::Stop {
        id: id.to_string(),
        grace,
      },
      Operation::Stop,
    )
  }

  async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError> {
    self.record(
      Call::Remove {
        id: id.to_string(),
        force,
      },
      Operation::Remove,
    )
  }
}
