use crate::workflow::models::{Matrix, Workflow};
use crate::{ServiceError, ServiceResult};

use std::fs;
use std::path::Path;

/// Parser for matrix workflow YAML files.
pub struct WorkflowParser;

impl WorkflowParser {
    /// Parse a workflow from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Workflow> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a workflow from a YAML string.
    pub fn parse(content: &str) -> ServiceResult<Workflow> {
        let workflow: Workflow = serde_yaml::from_str(content)?;
        Ok(workflow)
    }

    /// Parse and validate a workflow from a YAML string.
    ///
    /// This performs additional validation beyond basic YAML parsing.
    pub fn parse_and_validate(content: &str) -> ServiceResult<Workflow> {
        let workflow = Self::parse(content)?;
        Self::validate(&workflow)?;
        Ok(workflow)
    }

    /// Validate a parsed workflow for semantic correctness.
    pub fn validate(workflow: &Workflow) -> ServiceResult<()> {
        // Validate job dependencies exist
        for (job_id, job) in &workflow.jobs {
            for needed_job in job.needs.to_vec() {
                if !workflow.jobs.contains_key(&needed_job) {
                    return Err(ServiceError::InvalidWorkflow(format!(
                        "Job '{}' depends on non-existent job '{}'",
                        job_id, needed_job
                    )));
                }
            }
        }

        // Validate no circular dependencies
        Self::check_circular_dependencies(workflow)?;

        // Validate each job has at least one step
        for (job_id, job) in &workflow.jobs {
            if job.steps.is_empty() {
                return Err(ServiceError::InvalidWorkflow(format!(
                    "Job '{}' has no steps",
                    job_id
                )));
            }
        }

        // Validate steps have either 'run' or 'uses' (not both, not neither)
        for (job_id, job) in &workflow.jobs {
            for (step_idx, step) in job.steps.iter().enumerate() {
                let has_run = step.run.is_some();
                let has_uses = step.uses.is_some();

                if !has_run && !has_uses {
                    let step_name = step.name.as_deref().unwrap_or("unnamed");
                    return Err(ServiceError::InvalidWorkflow(format!(
                        "Step {} '{}' in job '{}' must have either 'run' or 'uses'",
                        step_idx, step_name, job_id
                    )));
                }

                if has_run && has_uses {
                    let step_name = step.name.as_deref().unwrap_or("unnamed");
                    return Err(ServiceError::InvalidWorkflow(format!(
                        "Step {} '{}' in job '{}' cannot have both 'run' and 'uses'",
                        step_idx, step_name, job_id
                    )));
                }
            }
        }

        for (job_id, job) in &workflow.jobs {
            if let Some(matrix) = job.matrix() {
                Self::validate_matrix(job_id, matrix)?;
            }
        }

        Ok(())
    }

    /// Every axis must be a non-empty list and the matrix must yield at
    /// least one combination.
    fn validate_matrix(job_id: &str, matrix: &Matrix) -> ServiceResult<()> {
        for (axis, values) in &matrix.dimensions {
            match values {
                serde_json::Value::Array(items) if !items.is_empty() => {}
                serde_json::Value::Array(_) => {
                    return Err(ServiceError::InvalidWorkflow(format!(
                        "Matrix axis '{}' in job '{}' is empty",
                        axis, job_id
                    )));
                }
                _ => {
                    return Err(ServiceError::InvalidWorkflow(format!(
                        "Matrix axis '{}' in job '{}' must be a list",
                        axis, job_id
                    )));
                }
            }
        }

        if matrix.dimensions.is_empty() && matrix.include.is_empty() {
            return Err(ServiceError::InvalidWorkflow(format!(
                "Matrix in job '{}' has no axes and no include entries",
                job_id
            )));
        }

        Ok(())
    }

    /// Check for circular dependencies in job `needs`.
    fn check_circular_dependencies(workflow: &Workflow) -> ServiceResult<()> {
        use std::collections::HashSet;

        fn has_cycle(
            job_id: &str,
            workflow: &Workflow,
            visited: &mut HashSet<String>,
            rec_stack: &mut HashSet<String>,
        ) -> Option<String> {
            visited.insert(job_id.to_string());
            rec_stack.insert(job_id.to_string());

            if let Some(job) = workflow.jobs.get(job_id) {
                for needed_job in job.needs.to_vec() {
                    if !visited.contains(&needed_job) {
                        if let Some(cycle) = has_cycle(&needed_job, workflow, visited, rec_stack) {
                            return Some(cycle);
                        }
                    } else if rec_stack.contains(&needed_job) {
                        return Some(format!("{} -> {}", job_id, needed_job));
                    }
                }
            }

            rec_stack.remove(job_id);
            None
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for job_id in workflow.jobs.keys() {
            if !visited.contains(job_id) {
                if let Some(cycle) = has_cycle(job_id, workflow, &mut visited, &mut rec_stack) {
                    return Err(ServiceError::InvalidWorkflow(format!(
                        "Circular dependency detected: {}",
                        cycle
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
on: push
jobs:
  build:
    steps:
      - run: ./build.sh
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        assert!(workflow.name.is_none());
        assert!(workflow.jobs.contains_key("build"));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = WorkflowParser::parse("on: [push\njobs: {");
        assert!(matches!(result, Err(ServiceError::Yaml(_))));
    }

    #[test]
    fn test_validate_missing_dependency() {
        let yaml = r#"
on: push
jobs:
  flash:
    needs: build
    steps:
      - run: echo flashing
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert!(err.to_string().contains("non-existent job"));
    }

    #[test]
    fn test_validate_circular_dependency() {
        let yaml = r#"
on: push
jobs:
  a:
    needs: c
    steps:
      - run: echo a
  b:
    needs: a
    steps:
      - run: echo b
  c:
    needs: b
    steps:
      - run: echo c
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert!(err.to_string().contains("Circular dependency"));
    }

    #[test]
    fn test_validate_empty_job() {
        let yaml = r#"
on: push
jobs:
  empty:
    steps: []
"#;
        let workflow = WorkflowParser::parse(yaml).unwrap();
        let err = WorkflowParser::validate(&workflow).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_validate_step_needs_run_or_uses() {
        let neither = r#"
on: push
jobs:
  build:
    steps:
      - name: Invalid step
        env:
          FOO: bar
"#;
        let err = WorkflowParser::parse_and_validate(neither).unwrap_err();
        assert!(err.to_string().contains("must have either 'run' or 'uses'"));

        let both = r#"
on: push
jobs:
  build:
    steps:
      - name: Invalid step
        run: ./build.sh
        uses: actions/checkout@v2
"#;
        let err = WorkflowParser::parse_and_validate(both).unwrap_err();
        assert!(err.to_string().contains("cannot have both 'run' and 'uses'"));
    }

    #[test]
    fn test_validate_matrix_axis_must_be_list() {
        let yaml = r#"
on: push
jobs:
  ci:
    strategy:
      matrix:
        rust: stable
    steps:
      - run: ./build.sh
"#;
        let err = WorkflowParser::parse_and_validate(yaml).unwrap_err();
        assert!(err.to_string().contains("must be a list"));
    }

    #[test]
    fn test_validate_empty_matrix_axis() {
        let yaml = r#"
on: push
jobs:
  ci:
    strategy:
      matrix:
        rust: []
    steps:
      - run: ./build.sh
"#;
        let err = WorkflowParser::parse_and_validate(yaml).unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn test_validate_include_only_matrix() {
        let yaml = r#"
on: push
jobs:
  ci:
    strategy:
      matrix:
        include:
          - rust: nightly
            experimental: true
    steps:
      - run: ./build.sh
"#;
        assert!(WorkflowParser::parse_and_validate(yaml).is_ok());
    }

    #[test]
    fn test_parse_and_validate_embedded_ci() {
        let yaml = r#"
on:
  push:
    branches: [ master ]
  pull_request:

name: Continuous integration

jobs:
  ci:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        rust: [stable]
        experimental: [false]
        include:
          - rust: nightly
            experimental: true
    continue-on-error: ${{ matrix.experimental }}
    steps:
      - uses: actions/checkout@v2
      - uses: actions-rs/toolchain@v1
        with:
          profile: minimal
          toolchain: ${{ matrix.rust }}
          target: thumbv6m-none-eabi
          override: true
      - run: ./build.sh
"#;
        let workflow = WorkflowParser::parse_and_validate(yaml).unwrap();
        assert_eq!(workflow.name.as_deref(), Some("Continuous integration"));
        assert_eq!(workflow.jobs.len(), 1);
        assert_eq!(workflow.on.event_names(), vec!["pull_request", "push"]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci.yml");
        std::fs::write(&path, "on: push\njobs:\n  a:\n    steps:\n      - run: 'true'\n").unwrap();

        let workflow = WorkflowParser::from_file(&path).unwrap();
        assert!(workflow.jobs.contains_key("a"));

        let missing = WorkflowParser::from_file(dir.path().join("nope.yml"));
        assert!(matches!(missing, Err(ServiceError::Io(_))));
    }
}
