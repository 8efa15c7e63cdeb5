use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  File,
  Directory,
}

/// A direct child of a directory in a repository tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
  /// Base name, e.g. `ci.yml`.
  pub name: String,
  /// Path from the repository root, e.g. `.github/workflows/ci.yml`.
  pub path: String,
  pub kind: EntryKind,
}

/// Read-only view of hosted repositories.
#[async_trait]
pub trait SourceProvider: Send + Sync {
  /// List the direct children of `path` at `reference`.
  ///
  /// A path that does not exist at the reference yields an empty list.
  async fn list_directory(
    &self,
    repo: &str,
    reference: &str,
    path: &str,
  ) -> Result<Vec<TreeEntry>, SourceError>;

  /// Read a file's content at `reference`.
  async fn read_file(&self, repo: &str, reference: &str, path: &str)
  -> Result<Vec<u8>, SourceError>;

  /// Local path of the repository named exactly `name`, if one exists.
  ///
  /// The path is mounted read-only into job containers.
  async fn repository_path(&self, name: &str) -> Result<Option<PathBuf>, SourceError>;
}

/// Join a directory and a child name into a repository path.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
  let dir = dir.trim_matches('/');
  if dir.is_empty() {
    name.to_string()
  } else {
    format!("{dir}/{name}")
  }
}
