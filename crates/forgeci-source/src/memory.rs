use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::provider::{EntryKind, SourceProvider, TreeEntry, join_path};

#[derive(Debug, Default, Clone)]
struct MemoryRepo {
  /// reference -> (path -> content)
  refs: HashMap<String, BTreeMap<String, Vec<u8>>>,
}

/// Source provider holding repository trees in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySourceProvider {
  repos: HashMap<String, MemoryRepo>,
  paths: HashMap<String, PathBuf>,
}

impl MemorySourceProvider {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a file at `path` in `repo` at `reference`.
  pub fn with_file(
    mut self,
    repo: &str,
    reference: &str,
    path: &str,
    content: impl Into<Vec<u8>>,
  ) -> Self {
    self
      .repos
      .entry(repo.to_string())
      .or_default()
      .refs
      .entry(reference.to_string())
      .or_default()
      .insert(path.trim_matches('/').to_string(), content.into());
    self
  }

  /// Register the local path returned by [`SourceProvider::repository_path`] for `name`.
  pub fn with_repository_path(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
    self.paths.insert(name.to_string(), path.into());
    self
  }

  fn tree(
    &self,
    repo: &str,
    reference: &str,
  ) -> Result<&BTreeMap<String, Vec<u8>>, SourceError> {
    let memory_repo = self
      .repos
      .get(repo)
      .ok_or_else(|| SourceError::RepositoryNotFound(repo.to_string()))?;
    memory_repo
      .refs
      .get(reference)
      .ok_or_else(|| SourceError::ReferenceNotFound {
        repo: repo.to_string(),
        reference: reference.to_string(),
      })
  }
}

#[async_trait]
impl SourceProvider for MemorySourceProvider {
  async fn list_directory(
    &self,
    repo: &str,
    reference: &str,
    path: &str,
  ) -> Result<Vec<TreeEntry>, SourceError> {
    let tree = self.tree(repo, reference)?;
    let prefix = join_path(path, "");

    let mut files = Vec::new();
    let mut dirs = BTreeSet::new();
    for file_path in tree.keys() {
      let Some(rest) = file_path.strip_prefix(&prefix) else {
        continue;
      };
      match rest.split_once('/') {
        Some((dir, _)) => {
          dirs.insert(dir.to_string());
        }
        None => files.push(TreeEntry {
          name: rest.to_string(),
          path: file_path.clone(),
          kind: EntryKind::File,
        }),
      }
    }

    files.extend(dirs.into_iter().map(|dir| TreeEntry {
      path: join_path(&prefix, &dir),
      name: dir,
      kind: EntryKind::Directory,
    }));
    Ok(files)
  }

  async fn read_file(
    &self,
    repo: &str,
    reference: &str,
    path: &str,
  ) -> Result<Vec<u8>, SourceError> {
    self
      .tree(repo, reference)?
      .get(path.trim_matches('/'))
      .cloned()
      .ok_or_else(|| SourceError::FileNotFound {
        repo: repo.to_string(),
        reference: reference.to_string(),
        path: path.to_string(),
      })
  }

  async fn repository_path(&self, name: &str) -> Result<Option<PathBuf>, SourceError> {
    Ok(self.paths.get(name).cloned())
  }
}
