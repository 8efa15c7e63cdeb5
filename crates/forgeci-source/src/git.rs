use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::SourceError;
use crate::provider::{EntryKind, SourceProvider, TreeEntry, join_path};

/// Source provider over a directory of git repositories, read through the `git` binary.
///
/// ```text
/// {repos_root}/
/// ├── acme/app.git/     (bare)
/// └── acme/tools/       (bare or checked out)
/// ```
#[derive(Debug, Clone)]
pub struct GitSourceProvider {
  repos_root: PathBuf,
  git_binary: PathBuf,
}

impl GitSourceProvider {
  pub fn new(repos_root: impl Into<PathBuf>) -> Self {
    Self {
      repos_root: repos_root.into(),
      git_binary: PathBuf::from("git"),
    }
  }

  /// Use a specific git binary.
  pub fn with_git_binary(mut self, git_binary: impl Into<PathBuf>) -> Self {
    self.git_binary = git_binary.into();
    self
  }

  pub fn repos_root(&self) -> &Path {
    &self.repos_root
  }

  /// Find the on-disk repository for `repo`, trying `repo` then `repo.git`.
  async fn locate(&self, repo: &str) -> Result<PathBuf, SourceError> {
    for candidate in [repo.to_string(), format!("{repo}.git")] {
      if let Some(path) = self.repository_path(&candidate).await? {
        return Ok(path);
      }
    }
    Err(SourceError::RepositoryNotFound(repo.to_string()))
  }

  async fn git(
    &self,
    repo: &str,
    command: &'static str,
    args: &[&str],
  ) -> Result<Vec<u8>, SourceError> {
    let dir = self.locate(repo).await?;
    debug!(repo = %repo, command = command, args = ?args, "running git");

    let output = Command::new(&self.git_binary)
      .arg("-C")
      .arg(&dir)
      .arg(command)
      .args(args)
      .stdin(Stdio::null())
      .kill_on_drop(true)
      .output()
      .await?;

    if !output.status.success() {
      return Err(SourceError::Git {
        repo: repo.to_string(),
        command,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(output.stdout)
  }

  async fn ensure_reference(&self, repo: &str, reference: &str) -> Result<(), SourceError> {
    let spec = format!("{reference}^{{commit}}");
    match self.git(repo, "rev-parse", &["--verify", "--quiet", spec.as_str()]).await {
      Ok(_) => Ok(()),
      Err(SourceError::Git { .. }) => Err(SourceError::ReferenceNotFound {
        repo: repo.to_string(),
        reference: reference.to_string(),
      }),
      Err(e) => Err(e),
    }
  }

  /// Resolve a reference to its commit SHA.
  pub async fn resolve_commit(&self, repo: &str, reference: &str) -> Result<String, SourceError> {
    self.ensure_reference(repo, reference).await?;
    let spec = format!("{reference}^{{commit}}");
    let out = self.git(repo, "rev-parse", &[spec.as_str()]).await?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
  }

  /// Full message of the commit a reference points to.
  pub async fn commit_message(&self, repo: &str, reference: &str) -> Result<String, SourceError> {
    self.ensure_reference(repo, reference).await?;
    let out = self
      .git(repo, "log", &["-1", "--format=%B", reference, "--"])
      .await?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
  }
}

/// Parse `git ls-tree -z` output: `<mode> SP <type> SP <object> TAB <path> NUL`.
fn parse_ls_tree(output: &[u8]) -> Vec<TreeEntry> {
  output
    .split(|b| *b == 0)
    .filter(|record| !record.is_empty())
    .filter_map(|record| {
      let record = String::from_utf8_lossy(record);
      let (meta, path) = record.split_once('\t')?;
      let kind = match meta.split(' ').nth(1)? {
        "blob" => EntryKind::File,
        "tree" => EntryKind::Directory,
        _ => return None,
      };
      let name = path.rsplit('/').next().unwrap_or(path).to_string();
      Some(TreeEntry {
        name,
        path: path.to_string(),
        kind,
      })
    })
    .collect()
}

#[async_trait]
impl SourceProvider for GitSourceProvider {
  async fn list_directory(
    &self,
    repo: &str,
    reference: &str,
    path: &str,
  ) -> Result<Vec<TreeEntry>, SourceError> {
    self.ensure_reference(repo, reference).await?;
    let dir = join_path(path, "");
    let mut args = vec!["-z", "--full-tree", reference];
    if !dir.is_empty() {
      args.extend(["--", dir.as_str()]);
    }
    let out = self.git(repo, "ls-tree", &args).await?;
    Ok(parse_ls_tree(&out))
  }

  async fn read_file(
    &self,
    repo: &str,
    reference: &str,
    path: &str,
  ) -> Result<Vec<u8>, SourceError> {
    self.ensure_reference(repo, reference).await?;
    let object = format!("{reference}:{}", path.trim_start_matches('/'));
    match self.git(repo, "cat-file", &["blob", object.as_str()]).await {
      Err(SourceError::Git { .. }) => Err(SourceError::FileNotFound {
        repo: repo.to_string(),
        reference: reference.to_string(),
        path: path.to_string(),
      }),
      other => other,
    }
  }

  async fn repository_path(&self, name: &str) -> Result<Option<PathBuf>, SourceError> {
    if name.is_empty() || name.split('/').any(|part| part == ".." || part.is_empty()) {
      return Ok(None);
    }
    let path = self.repos_root.join(name);
    match tokio::fs::metadata(&path).await {
      Ok(meta) if meta.is_dir() => Ok(Some(path)),
      Ok(_) => Ok(None),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_ls_tree() {
    let out = b"100644 blob aaaa\t.github/workflows/ci.yml\x00040000 tree bbbb\t.github/workflows/shared\x00160000 commit cccc\t.github/workflows/sub\x00";
    let entries = parse_ls_tree(out);
    assert_eq!(
      entries,
      vec![
        TreeEntry {
          name: "ci.yml".to_string(),
          path: ".github/workflows/ci.yml".to_string(),
          kind: EntryKind::File,
        },
        TreeEntry {
          name: "shared".to_string(),
          path: ".github/workflows/shared".to_string(),
          kind: EntryKind::Directory,
        },
      ]
    );
  }

  #[tokio::test]
  async fn test_repository_path_requires_directory() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("acme/app.git")).unwrap();
    std::fs::write(root.path().join("acme/notes"), b"not a repo").unwrap();

    let provider = GitSourceProvider::new(root.path());
    assert_eq!(provider.repository_path("acme/app").await.unwrap(), None);
    assert_eq!(
      provider.repository_path("acme/app.git").await.unwrap(),
      Some(root.path().join("acme/app.git"))
    );
    assert_eq!(provider.repository_path("acme/notes").await.unwrap(), None);
    assert_eq!(provider.repository_path("../etc").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_unknown_repository() {
    let root = tempfile::tempdir().unwrap();
    let provider = GitSourceProvider::new(root.path());
    let err = provider
      .list_directory("acme/missing", "main", ".github/workflows")
      .await
      .unwrap_err();
    assert!(matches!(err, SourceError::RepositoryNotFound(_)));
  }
}
