//! forgeci Config
//!
//! This crate contains the typed workflow definition for forgeci. A definition
//! is the parsed form of one workflow document found in a repository tree,
//! before it is materialized into a persisted run.
//!
//! Only `name`, `on`, `jobs`, `runs-on` and `steps[name|run|uses|with|env]`
//! carry meaning. Every other field in a document is ignored.
//!
//! ```yaml
//! name: CI
//! on: push
//! jobs:
//!   build:
//!     runs-on: node
//!     steps:
//!       - run: npm ci
//!       - name: Test
//!         run: npm test
//!       - uses: actions/cache@v4
//! ```

mod error;
mod job;
mod step;
mod workflow;

pub use error::DefinitionError;
pub use job::{DEFAULT_RUNS_ON, JobDefinition};
pub use step::{StepDefinition, StepKind};
pub use workflow::{WorkflowDefinition, parse_workflow};
