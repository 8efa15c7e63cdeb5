//! forgeci Container
//!
//! The narrow capability interface the job executor needs from a container
//! runtime, plus two implementations:
//! - [`DockerCliRuntime`] drives the `docker` binary.
//! - [`FakeRuntime`] records calls and replays scripted exec results.
//!
//! A container is created per job, started, used for a sequence of execs and
//! then stopped and removed. Container IDs are never reused.

mod docker;
mod fake;

pub use docker::DockerCliRuntime;
pub use fake::{Call, FakeRuntime, Operation};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Errors returned by a container runtime.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
  /// The runtime binary could not be launched.
  #[error("failed to launch container runtime: {0}")]
  Spawn(#[from] std::io::Error),

  /// A runtime command exited unsuccessfully.
  #[error("`{command}` failed ({status}): {stderr}")]
  Command {
    command: String,
    status: String,
    stderr: String,
  },

  /// The runtime rejected or could not complete an operation.
  #[error("{operation} failed: {message}")]
  Operation {
    operation: &'static str,
    message: String,
  },
}

/// A host path bound into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
  pub source: PathBuf,
  pub target: String,
  pub read_only: bool,
}

/// Everything needed to create a job container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
  pub image: String,
  /// Memory ceiling in bytes.
  pub memory_bytes: u64,
  /// CPU ceiling in billionths of a CPU.
  pub nano_cpus: u64,
  pub mounts: Vec<Mount>,
  pub working_dir: String,
}

/// Exit status and combined output of an exec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
  pub exit_code: i64,
  pub output: String,
}

impl ExecOutput {
  pub fn new(exit_code: i64, output: impl Into<String>) -> Self {
    Self {
      exit_code,
      output: output.into(),
    }
  }

  pub fn success(&self) -> bool {
    self.exit_code == 0
  }
}

/// Capabilities the executor requires from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
  /// Check that the runtime is reachable.
  async fn ping(&self) -> Result<(), ContainerError>;

  /// Pull an image so it is available locally.
  async fn pull_image(&self, image: &str) -> Result<(), ContainerError>;

  /// Create a container and return its ID.
  async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

  /// Start a created container.
  async fn start_container(&self, id: &str) -> Result<(), ContainerError>;

  /// Run a command inside a running container and wait for it.
  async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, ContainerError>;

  /// Stop a container, killing it after `grace`.
  async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), ContainerError>;

  /// Remove a container.
  async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError>;
}
