use forgeci_executor::ExecutorError;
use forgeci_source::SourceError;
use forgeci_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("source error: {0}")]
  Source(#[from] SourceError),

  #[error("execution error: {0}")]
  Executor(#[from] ExecutorError),
}
