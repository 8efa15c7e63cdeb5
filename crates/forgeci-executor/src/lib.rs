//! Job execution for forgeci.
//!
//! This crate provides the [`RunExecutor`] which handles:
//! - Starting a run and attempting every job in order
//! - Provisioning one resource-bounded container per job
//! - Executing steps sequentially with intra-job cascade cancellation
//! - Unconditional container teardown
//!
//! A failed job never stops later jobs of the same run. The run's final
//! status is aggregated from its jobs once they have all been attempted.

mod config;
mod error;
mod executor;
mod image;
mod job;
mod propagate;

pub use config::{
  BOOTSTRAP_COMMAND, DEFAULT_MEMORY_BYTES, DEFAULT_NANO_CPUS, ExecutorConfig, FALLBACK_COMMAND,
  REPO_MOUNT, WORKSPACE_DIR,
};
pub use error::ExecutorError;
pub use executor::RunExecutor;
pub use image::{DEFAULT_IMAGE, resolve_image};
pub use job::JobExecutor;
pub use propagate::{aggregate_status, exit_marker, failure_output};
