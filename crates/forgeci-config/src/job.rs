use serde::{Deserialize, Deserializer};

use crate::step::StepDefinition;

/// Label used when a job does not declare `runs-on`.
pub const DEFAULT_RUNS_ON: &str = "ubuntu-latest";

/// A job as declared in a workflow document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobDefinition {
  /// Execution environment label, mapped to a container image at run time.
  #[serde(
    rename = "runs-on",
    default = "default_runs_on",
    deserialize_with = "runs_on_label"
  )]
  pub runs_on: String,

  #[serde(default, deserialize_with = "null_as_empty")]
  pub steps: Vec<StepDefinition>,
}

impl Default for JobDefinition {
  fn default() -> Self {
    Self {
      runs_on: default_runs_on(),
      steps: Vec::new(),
    }
  }
}

fn default_runs_on() -> String {
  DEFAULT_RUNS_ON.to_string()
}

/// Accepts `runs-on: node` as well as `runs-on: [node, self-hosted]`, in which
/// case the first label is used.
fn runs_on_label<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Label {
    One(String),
    Many(Vec<String>),
  }

  let label = match Option::<Label>::deserialize(deserializer)? {
    Some(Label::One(label)) => label,
    Some(Label::Many(labels)) => labels.into_iter().next().unwrap_or_default(),
    None => String::new(),
  };

  if label.trim().is_empty() {
    Ok(default_runs_on())
  } else {
    Ok(label)
  }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
  D: Deserializer<'de>,
  T: Deserialize<'de>,
{
  Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
