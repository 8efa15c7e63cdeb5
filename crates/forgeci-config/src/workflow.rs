use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::DefinitionError;
use crate::job::JobDefinition;

/// A parsed workflow document.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
  /// Workflow `name`, or the file name when the document has none.
  pub name: String,
  /// File name of the document inside the workflow directory.
  pub file_name: String,
  /// The `on:` block, kept opaque.
  pub trigger: serde_yaml::Value,
  /// Jobs in declaration order.
  pub jobs: IndexMap<String, JobDefinition>,
}

#[derive(Debug, Deserialize)]
struct RawWorkflow {
  name: Option<String>,
  #[serde(rename = "on", default)]
  trigger: serde_yaml::Value,
  #[serde(default)]
  jobs: Option<IndexMap<String, Option<JobDefinition>>>,
}

/// Parse one workflow document.
pub fn parse_workflow(file_name: &str, content: &[u8]) -> Result<WorkflowDefinition, DefinitionError> {
  let text = std::str::from_utf8(content).map_err(|_| DefinitionError::Encoding {
    file_name: file_name.to_string(),
  })?;

  let raw: RawWorkflow = serde_yaml::from_str(text).map_err(|source| DefinitionError::Parse {
    file_name: file_name.to_string(),
    source,
  })?;

  let name = raw
    .name
    .filter(|n| !n.trim().is_empty())
    .unwrap_or_else(|| file_name.to_string());

  let jobs = raw
    .jobs
    .unwrap_or_default()
    .into_iter()
    .map(|(job_name, job)| (job_name, job.unwrap_or_default()))
    .collect();

  Ok(WorkflowDefinition {
    name,
    file_name: file_name.to_string(),
    trigger: raw.trigger,
    jobs,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::StepKind;

  const CI: &str = r#"
name: CI
on:
  push:
    branches: [main]
concurrency: ci
jobs:
  lint:
    runs-on: python
    timeout-minutes: 10
    steps:
      - run: ruff check .
  build:
    runs-on: node
    steps:
      - uses: actions/checkout@v4
      - name: Install
        run: npm ci
  deploy:
    steps:
      - name: Ship it
"#;

  #[test]
  fn test_parse_full_document() {
    let workflow = parse_workflow("ci.yml", CI.as_bytes()).unwrap();

    assert_eq!(workflow.name, "CI");
    assert_eq!(workflow.file_name, "ci.yml");
    assert!(workflow.trigger.get("push").is_some());

    let names: Vec<&str> = workflow.jobs.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["lint", "build", "deploy"]);

    let build = &workflow.jobs["build"];
    assert_eq!(build.runs_on, "node");
    assert_eq!(build.steps.len(), 2);
    assert_eq!(build.steps[0].action_reference(), Some("actions/checkout@v4"));
    assert_eq!(build.steps[1].display_name(), "Install");

    let deploy = &workflow.jobs["deploy"];
    assert_eq!(deploy.runs_on, "ubuntu-latest");
    assert_eq!(deploy.steps[0].kind, StepKind::Bare);
  }

  #[test]
  fn test_name_falls_back_to_file_name() {
    let workflow = parse_workflow("release.yaml", b"jobs: {}").unwrap();
    assert_eq!(workflow.name, "release.yaml");
    assert!(workflow.jobs.is_empty());
    assert!(workflow.trigger.is_null());
  }

  #[test]
  fn test_job_without_body_gets_defaults() {
    let workflow = parse_workflow("a.yml", b"jobs:\n  empty:\n").unwrap();
    assert_eq!(workflow.jobs["empty"].runs_on, "ubuntu-latest");
    assert!(workflow.jobs["empty"].steps.is_empty());
  }

  #[test]
  fn test_invalid_document_is_an_error() {
    let result = parse_workflow("broken.yml", b"jobs: [unclosed");
    assert!(matches!(result, Err(DefinitionError::Parse { .. })));
  }

  #[test]
  fn test_non_utf8_is_an_error() {
    let result = parse_workflow("bin.yml", &[0xff, 0xfe, 0x00]);
    assert!(matches!(result, Err(DefinitionError::Encoding { .. })));
  }

  #[test]
  fn test_job_order_is_stable_across_parses() {
    let first = parse_workflow("ci.yml", CI.as_bytes()).unwrap();
    for _ in 0..10 {
      let again = parse_workflow("ci.yml", CI.as_bytes()).unwrap();
      assert!(first.jobs.keys().eq(again.jobs.keys()));
    }
  }
}
