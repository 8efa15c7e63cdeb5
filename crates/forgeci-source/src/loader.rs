//! Workflow definition loading.

use forgeci_config::{WorkflowDefinition, parse_workflow};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::provider::{EntryKind, SourceProvider};

/// Directory searched for workflow documents by default.
pub const DEFAULT_WORKFLOW_DIR: &str = ".github/workflows";

const WORKFLOW_EXTENSIONS: [&str; 2] = [".yml", ".yaml"];

/// Configuration for [`load_definitions`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
  /// Directory, relative to the repository root, holding workflow documents.
  pub workflow_dir: String,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      workflow_dir: DEFAULT_WORKFLOW_DIR.to_string(),
    }
  }
}

fn is_workflow_file(name: &str) -> bool {
  let lower = name.to_ascii_lowercase();
  WORKFLOW_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Load every workflow document directly under the workflow directory.
///
/// Subdirectories are not searched. A document that cannot be read or parsed
/// is skipped with a warning; it never fails the load. Definitions are
/// returned ordered by file name.
pub async fn load_definitions(
  source: &dyn SourceProvider,
  repo: &str,
  reference: &str,
  config: &LoaderConfig,
) -> Result<Vec<WorkflowDefinition>, SourceError> {
  let mut entries: Vec<_> = source
    .list_directory(repo, reference, &config.workflow_dir)
    .await?
    .into_iter()
    .filter(|e| e.kind == EntryKind::File && is_workflow_file(&e.name))
    .collect();
  entries.sort_by(|a, b| a.name.cmp(&b.name));

  let mut definitions = Vec::with_capacity(entries.len());
  for entry in entries {
    let content = match source.read_file(repo, reference, &entry.path).await {
      Ok(content) => content,
      Err(e) => {
        warn!(repo = %repo, file = %entry.path, error = %e, "skipping unreadable workflow");
        continue;
      }
    };

    match parse_workflow(&entry.name, &content) {
      Ok(definition) => {
        debug!(repo = %repo, file = %entry.path, workflow = %definition.name, "loaded workflow");
        definitions.push(definition);
      }
      Err(e) => {
        warn!(repo = %repo, file = %entry.path, error = %e, "skipping invalid workflow");
      }
    }
  }

  Ok(definitions)
}
