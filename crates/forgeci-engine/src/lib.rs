//! forgeci Engine
//!
//! Turns workflow definitions into queued runs and drives them to completion:
//! - [`Materializer`] persists a queued run per definition and trigger.
//! - [`Scheduler`] polls for queued runs and executes them one at a time.
//!
//! Runs left in progress by a previous process are finalized by
//! [`recover_interrupted`] before the scheduler starts polling.

mod error;
mod materialize;
mod recovery;
mod scheduler;

pub use error::EngineError;
pub use materialize::{Materializer, TriggerContext, build_run};
pub use recovery::{INTERRUPTED_OUTPUT, abandon_run, recover_interrupted};
pub use scheduler::{DEFAULT_POLL_INTERVAL, Scheduler, SchedulerConfig, SchedulerExit};
