use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("repository not found: {0}")]
  RepositoryNotFound(String),

  #[error("reference '{reference}' not found in {repo}")]
  ReferenceNotFound { repo: String, reference: String },

  #[error("file '{path}' not found in {repo}@{reference}")]
  FileNotFound {
    repo: String,
    reference: String,
    path: String,
  },

  #[error("git {command} failed for {repo}: {stderr}")]
  Git {
    repo: String,
    command: &'static str,
    stderr: String,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}
