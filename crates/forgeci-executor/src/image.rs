//! Mapping from `runs-on` labels to container images.

/// Image used for any label not in the table.
pub const DEFAULT_IMAGE: &str = "ubuntu:22.04";

const IMAGE_TABLE: &[(&[&str], &str)] = &[
  (&["ubuntu-latest", "ubuntu-22.04"], "ubuntu:22.04"),
  (&["ubuntu-20.04"], "ubuntu:20.04"),
  (&["node", "node-latest", "node-20"], "node:20"),
  (&["node-18"], "node:18"),
  (&["python", "python-latest", "python-3.12"], "python:3.12"),
  (&["python-3.11"], "python:3.11"),
];

/// Resolve the image for a `runs-on` label. Matching ignores case and
/// surrounding whitespace; unknown labels fall back to [`DEFAULT_IMAGE`].
pub fn resolve_image(label: &str) -> &'static str {
  let label = label.trim();
  IMAGE_TABLE
    .iter()
    .find(|(labels, _)| labels.iter().any(|l| l.eq_ignore_ascii_case(label)))
    .map(|(_, image)| *image)
    .unwrap_or(DEFAULT_IMAGE)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_known_labels() {
    assert_eq!(resolve_image("ubuntu-latest"), "ubuntu:22.04");
    assert_eq!(resolve_image("ubuntu-20.04"), "ubuntu:20.04");
    assert_eq!(resolve_image("node"), "node:20");
    assert_eq!(resolve_image("node-18"), "node:18");
    assert_eq!(resolve_image("python-latest"), "python:3.12");
    assert_eq!(resolve_image("python-3.11"), "python:3.11");
  }

  #[test]
  fn test_case_insensitive() {
    assert_eq!(resolve_image("Node-18"), "node:18");
    assert_eq!(resolve_image("UBUNTU-20.04"), "ubuntu:20.04");
  }

  #[test]
  fn test_unknown_label_falls_back() {
    assert_eq!(resolve_image("weird-tag"), DEFAULT_IMAGE);
    assert_eq!(resolve_image(""), DEFAULT_IMAGE);
  }

  #[test]
  fn test_resolution_is_stable() {
    for label in ["node", "weird-tag", "python-3.12"] {
      assert_eq!(resolve_image(label), resolve_image(label));
    }
  }
}
