//! forgeci Source
//!
//! Read-only access to repository trees and the loader that turns the
//! workflow documents of a repository into [`WorkflowDefinition`]s.
//!
//! [`WorkflowDefinition`]: forgeci_config::WorkflowDefinition

mod error;
mod git;
mod loader;
mod memory;
mod provider;

pub use error::SourceError;
pub use git::GitSourceProvider;
pub use loader::{DEFAULT_WORKFLOW_DIR, LoaderConfig, load_definitions};
pub use memory::MemorySourceProvider;
pub use provider::{EntryKind, SourceProvider, TreeEntry};
