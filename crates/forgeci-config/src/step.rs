use std::collections::BTreeMap;

use serde::Deserialize;

/// What a step does when executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
  /// A shell command (`run`).
  Shell { command: String },
  /// A reusable action reference (`uses`). Recognized and stored, never executed.
  Action { reference: String },
  /// Neither `run` nor `uses` was given.
  Bare,
}

/// A step as declared in a workflow document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawStep")]
pub struct StepDefinition {
  /// Explicit `name`, if the document gave one.
  pub name: Option<String>,
  pub kind: StepKind,
  pub with: BTreeMap<String, String>,
  pub env: BTreeMap<String, String>,
}

impl StepDefinition {
  /// Create a shell step.
  pub fn shell(command: impl Into<String>) -> Self {
    Self::from_kind(StepKind::Shell {
      command: command.into(),
    })
  }

  /// Create an action step.
  pub fn action(reference: impl Into<String>) -> Self {
    Self::from_kind(StepKind::Action {
      reference: reference.into(),
    })
  }

  /// Set the display name.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  fn from_kind(kind: StepKind) -> Self {
    Self {
      name: None,
      kind,
      with: BTreeMap::new(),
      env: BTreeMap::new(),
    }
  }

  /// Name shown for the step: `name`, then `run`, then `uses`, then `"Step"`.
  pub fn display_name(&self) -> String {
    if let Some(name) = &self.name {
      return name.clone();
    }
    match &self.kind {
      StepKind::Shell { command } => command.clone(),
      StepKind::Action { reference } => reference.clone(),
      StepKind::Bare => "Step".to_string(),
    }
  }

  /// Shell command to execute: `run`, else the explicit `name` of a bare step.
  ///
  /// Action steps and unnamed bare steps have no command.
  pub fn command(&self) -> Option<String> {
    match &self.kind {
      StepKind::Shell { command } => Some(command.clone()),
      StepKind::Bare => self.name.clone(),
      StepKind::Action { .. } => None,
    }
  }

  /// The `uses` reference of an action step.
  pub fn action_reference(&self) -> Option<&str> {
    match &self.kind {
      StepKind::Action { reference } => Some(reference),
      _ => None,
    }
  }
}

#[derive(Debug, Default, Deserialize)]
struct RawStep {
  name: Option<String>,
  run: Option<String>,
  uses: Option<String>,
  #[serde(default)]
  with: Option<BTreeMap<String, serde_yaml::Value>>,
  #[serde(default)]
  env: Option<BTreeMap<String, serde_yaml::Value>>,
}

impl From<RawStep> for StepDefinition {
  fn from(raw: RawStep) -> Self {
    let kind = match (raw.run, raw.uses) {
      (Some(command), _) => StepKind::Shell { command },
      (None, Some(reference)) => StepKind::Action { reference },
      (None, None) => StepKind::Bare,
    };

    Self {
      name: raw.name,
      kind,
      with: scalar_map(raw.with),
      env: scalar_map(raw.env),
    }
  }
}

/// Flatten a YAML mapping into strings. Nested sequences and mappings are dropped.
fn scalar_map(map: Option<BTreeMap<String, serde_yaml::Value>>) -> BTreeMap<String, String> {
  map
    .unwrap_or_default()
    .into_iter()
    .filter_map(|(key, value)| {
      let value = match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        _ => return None,
      };
      Some((key, value))
    })
    .collect()
}
