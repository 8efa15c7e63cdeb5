use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{ContainerError, ContainerRuntime, ContainerSpec, ExecOutput};

/// Command keeping a job container alive between execs.
const IDLE_COMMAND: [&str; 2] = ["sleep", "infinity"];

/// Container runtime backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
  binary: PathBuf,
}

impl Default for DockerCliRuntime {
  fn default() -> Self {
    Self::new("docker")
  }
}

impl DockerCliRuntime {
  /// Use the given docker-compatible binary (`docker`, `podman`, ...).
  pub fn new(binary: impl Into<PathBuf>) -> Self {
    Self {
      binary: binary.into(),
    }
  }

  async fn output(&self, args: &[OsString]) -> Result<Output, ContainerError> {
    debug!(binary = %self.binary.display(), args = ?args, "invoking container runtime");

    let output = Command::new(&self.binary)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .output()
      .await?;
    Ok(output)
  }

  /// Run a docker subcommand that must succeed, returning its stdout.
  async fn run(&self, args: &[OsString]) -> Result<String, ContainerError> {
    let output = self.output(args).await?;
    if !output.status.success() {
      return Err(ContainerError::Command {
        command: describe(args),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

fn describe(args: &[OsString]) -> String {
  let mut parts = vec!["docker".to_string()];
  parts.extend(args.iter().take(2).map(|a| a.to_string_lossy().into_owned()));
  parts.join(" ")
}

fn args<I, S>(items: I) -> Vec<OsString>
where
  I: IntoIterator<Item = S>,
  S: Into<OsString>,
{
  items.into_iter().map(Into::into).collect()
}

/// Format nano-CPUs as the decimal `--cpus` value.
fn cpus_flag(nano_cpus: u64) -> String {
  let whole = nano_cpus / 1_000_000_000;
  let frac = nano_cpus % 1_000_000_000;
  if frac == 0 {
    whole.to_string()
  } else {
    let frac = format!("{frac:09}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
  }
}

fn create_args(spec: &ContainerSpec) -> Vec<OsString> {
  let mut out = args([
    "create".to_string(),
    "--memory".to_string(),
    spec.memory_bytes.to_string(),
    "--cpus".to_string(),
    cpus_flag(spec.nano_cpus),
    "--workdir".to_string(),
    spec.working_dir.clone(),
  ]);

  for mount in &spec.mounts {
    let mut volume = OsString::from(mount.source.as_os_str());
    volume.push(":");
    volume.push(&mount.target);
    if mount.read_only {
      volume.push(":ro");
    }
    out.push("--volume".into());
    out.push(volume);
  }

  out.push(spec.image.clone().into());
  out.extend(IDLE_COMMAND.into_iter().map(OsString::from));
  out
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
  async fn ping(&self) -> Result<(), ContainerError> {
    self
      .run(&args(["version", "--format", "{{.Server.Version}}"]))
      .await
      .map(|_| ())
  }

  async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
    self.run(&args(["pull", "--quiet", image])).await.map(|_| ())
  }

  async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
    let id = self.run(&create_args(spec)).await?;
    if id.is_empty() {
      return Err(ContainerError::Operation {
        operation: "create",
        message: "runtime returned no container id".to_string(),
      });
    }
    Ok(id)
  }

  async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
    self.run(&args(["start", id])).await.map(|_| ())
  }

  async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, ContainerError> {
    let mut exec_args = args(["exec", id]);
    exec_args.extend(argv.iter().map(OsString::from));

    let output = self.output(&exec_args).await?;
    let exit_code = output.status.code().ok_or_else(|| ContainerError::Operation {
      operation: "exec",
      message: format!("exec client terminated by signal ({})", output.status),
    })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ExecOutput::new(exit_code.into(), combined))
  }

  async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), ContainerError> {
    let seconds = grace.as_secs().to_string();
    self.run(&args(["stop", "--time", seconds.as_str(), id])).await.map(|_| ())
  }

  async fn remove_container(&self, id: &str, force: bool) -> Result<(), ContainerError> {
    let mut rm_args = args(["rm"]);
    if force {
      rm_args.push("--force".into());
    }
    rm_args.push(id.into());
    self.run(&rm_args).await.map(|_| ())
  }
}
