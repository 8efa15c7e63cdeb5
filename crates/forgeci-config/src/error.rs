use thiserror::Error;

/// Errors raised while parsing a workflow document.
#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("failed to parse workflow '{file_name}': {source}")]
  Parse {
    file_name: String,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("workflow '{file_name}' is not valid UTF-8")]
  Encoding { file_name: String },
}
