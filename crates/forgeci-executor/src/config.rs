use std::time::Duration;

/// Memory ceiling of a job container: 512 MiB.
pub const DEFAULT_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// CPU ceiling of a job container: one virtual CPU.
pub const DEFAULT_NANO_CPUS: u64 = 1_000_000_000;

/// Working directory inside the job container.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Where the repository is mounted read-only.
pub const REPO_MOUNT: &str = "/repo";

/// Populates the workspace from the mounted repository. Never fails.
pub const BOOTSTRAP_COMMAND: &str = "git clone /repo /workspace 2>&1 || true";

/// Executed for a step that names no command at all.
pub const FALLBACK_COMMAND: &str = "echo 'No command'";

/// Configuration for job execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
  pub memory_bytes: u64,
  pub nano_cpus: u64,
  pub working_dir: String,
  pub repo_mount: String,
  /// How long a container gets to stop before it is killed.
  pub stop_grace: Duration,
  /// Upper bound for a single step. `None` lets a step run indefinitely.
  pub step_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
  fn default() -> Self {
    Self {
      memory_bytes: DEFAULT_MEMORY_BYTES,
      nano_cpus: DEFAULT_NANO_CPUS,
      working_dir: WORKSPACE_DIR.to_string(),
      repo_mount: REPO_MOUNT.to_string(),
      stop_grace: Duration::from_secs(10),
      step_timeout: None,
    }
  }
}
