// Matrix Expansion
// Expands a job matrix into the concrete cells of a run

use crate::error::{ServiceError, ServiceResult};
use crate::expression::{contains_expression, ExpressionContext, ExpressionEngine, ValueExt};
use crate::runners::actions::{resolve_inputs, BuiltinAction, ToolchainRequest};
use crate::workflow::{ContinueOnError, Job, Matrix};

use serde::Serialize;
use serde_json::{json, Map, Value};

/// One assignment of values to matrix keys
pub type Combination = Map<String, Value>;

/// Matrix keys consulted for the channel when no toolchain step names one
const CHANNEL_KEYS: [&str; 3] = ["rust", "toolchain", "channel"];

/// A single matrix cell: one job instance with its own values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobCell {
    /// Id of the job this cell belongs to
    pub job_id: String,
    /// Display name, e.g. `ci (nightly, true)`
    pub name: String,
    /// Position in the expansion order
    pub index: usize,
    /// Matrix values for this cell
    pub values: Combination,
    /// Toolchain channel the cell pins to
    pub channel: Option<String>,
    /// Compilation target installed for the cell
    pub target: Option<String>,
    /// Failures of this cell do not fail the run
    pub experimental: bool,
}

impl JobCell {
    /// Matrix values in declaration order: `nightly, true`
    pub fn label(&self) -> String {
        label(&self.values)
    }
}

/// Matrix expander for job strategies
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix into its combinations.
    ///
    /// The cross-product varies the first declared axis slowest. `exclude`
    /// entries remove every combination they partially match. Each `include`
    /// entry is merged into every original combination whose axis values it
    /// does not contradict; an entry that merges nowhere becomes a new
    /// combination at the end.
    pub fn expand(matrix: &Matrix) -> Vec<Combination> {
        let mut combinations: Vec<Combination> = Self::cross_product(&matrix.dimensions)
            .into_iter()
            .filter(|combination| {
                !matrix
                    .exclude
                    .iter()
                    .any(|entry| Self::matches(combination, entry))
            })
            .collect();

        Self::apply_includes(&mut combinations, &matrix.dimensions, &matrix.include);
        combinations
    }

    fn cross_product(dimensions: &Map<String, Value>) -> Vec<Combination> {
        if dimensions.is_empty() {
            return Vec::new();
        }

        let mut combinations = vec![Combination::new()];
        for (axis, values) in dimensions {
            let values = match values {
                Value::Array(items) => items.clone(),
                scalar => vec![scalar.clone()],
            };

            let mut next = Vec::with_capacity(combinations.len() * values.len());
            for base in &combinations {
                for value in &values {
                    let mut combination = base.clone();
                    combination.insert(axis.clone(), value.clone());
                    next.push(combination);
                }
            }
            combinations = next;
        }
        combinations
    }

    /// Partial match: every key of `entry` is present with an equal value
    fn matches(combination: &Combination, entry: &Map<String, Value>) -> bool {
        entry
            .iter()
            .all(|(key, value)| combination.get(key).is_some_and(|v| same_value(v, value)))
    }

    fn apply_includes(
        combinations: &mut Vec<Combination>,
        dimensions: &Map<String, Value>,
        includes: &[Map<String, Value>],
    ) {
        let original = combinations.len();

        for entry in includes {
            let mut merged = false;

            for combination in combinations.iter_mut().take(original) {
                // Original axis values are never overwritten; added keys may be
                let compatible = entry.iter().all(|(key, value)| {
                    !dimensions.contains_key(key)
                        || combination.get(key).is_some_and(|v| same_value(v, value))
                });
                if compatible {
                    for (key, value) in entry {
                        combination.insert(key.clone(), value.clone());
                    }
                    merged = true;
                }
            }

            let duplicate = combinations
                .iter()
                .any(|c| c.len() == entry.len() && Self::matches(c, entry));
            if !merged && !duplicate {
                combinations.push(entry.clone());
            }
        }
    }

    /// Build the cells of a job.
    ///
    /// A job without a matrix has exactly one cell with no values. `base`
    /// supplies the github and env contexts; the matrix and strategy contexts
    /// are filled in per cell.
    pub fn cells(job_id: &str, job: &Job, base: &ExpressionContext) -> ServiceResult<Vec<JobCell>> {
        let combinations = match job.matrix() {
            Some(matrix) => {
                let combinations = Self::expand(matrix);
                if combinations.is_empty() {
                    return Err(ServiceError::InvalidWorkflow(format!(
                        "job '{}': matrix expands to no combinations",
                        job_id
                    )));
                }
                combinations
            }
            None => vec![Combination::new()],
        };

        let total = combinations.len();
        combinations
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                let mut context = base.clone().with_matrix(values.clone());
                context.strategy = strategy_context(job, index, total);
                Self::build_cell(job_id, job, index, values, &ExpressionEngine::new(context))
            })
            .collect()
    }

    fn build_cell(
        job_id: &str,
        job: &Job,
        index: usize,
        values: Combination,
        engine: &ExpressionEngine,
    ) -> ServiceResult<JobCell> {
        let experimental = match &job.continue_on_error {
            ContinueOnError::Bool(flag) => *flag,
            ContinueOnError::Expression(expr) => engine.evaluate_value(expr)?.is_truthy(),
        };

        let label = label(&values);
        let name = match &job.name {
            Some(name) if contains_expression(name) => engine.interpolate(name)?,
            Some(name) if !label.is_empty() => format!("{} ({})", name, label),
            Some(name) => name.clone(),
            None if !label.is_empty() => format!("{} ({})", job_id, label),
            None => job_id.to_string(),
        };

        let request = toolchain_request(job, engine)?;
        let channel = request
            .as_ref()
            .map(|r| r.channel.clone())
            .or_else(|| matrix_channel(&values));
        let target = request.and_then(|r| r.targets.into_iter().next());

        Ok(JobCell {
            job_id: job_id.to_string(),
            name,
            index,
            values,
            channel,
            target,
            experimental,
        })
    }
}

/// Matrix values compare strictly except that numbers compare by value
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// The request of the first toolchain step that names a channel
fn toolchain_request(job: &Job, engine: &ExpressionEngine) -> ServiceResult<Option<ToolchainRequest>> {
    for step in &job.steps {
        let Some(action) = step.uses.as_deref().and_then(BuiltinAction::parse) else {
            continue;
        };
        if !action.is_toolchain() {
            continue;
        }
        let inputs = resolve_inputs(engine, &step.with)?;
        if let Ok(request) = ToolchainRequest::from_inputs(&action, &inputs) {
            return Ok(Some(request));
        }
    }
    Ok(None)
}

fn matrix_channel(values: &Combination) -> Option<String> {
    CHANNEL_KEYS
        .iter()
        .find_map(|key| values.get(*key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn strategy_context(job: &Job, index: usize, total: usize) -> Map<String, Value> {
    let (fail_fast, max_parallel) = job
        .strategy
        .as_ref()
        .map(|s| (s.fail_fast, s.max_parallel))
        .unwrap_or((true, None));

    let mut strategy = Map::new();
    strategy.insert("fail-fast".to_string(), json!(fail_fast));
    strategy.insert(
        "max-parallel".to_string(),
        json!(max_parallel.map(|m| m as usize).unwrap_or(total)),
    );
    strategy.insert("job-index".to_string(), json!(index));
    strategy.insert("job-total".to_string(), json!(total));
    strategy
}

fn label(values: &Combination) -> String {
    values
        .values()
        .map(|v| v.to_display_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::fixtures::EMBEDDED_CI;
    use crate::workflow::Workflow;

    fn matrix(yaml: &str) -> Matrix {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn combo(value: Value) -> Combination {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_embedded_matrix_expansion() {
        let workflow: Workflow = serde_yaml::from_str(EMBEDDED_CI).unwrap();
        let combinations = MatrixExpander::expand(workflow.jobs["ci"].matrix().unwrap());

        assert_eq!(
            combinations,
            vec![
                combo(json!({ "rust": "stable", "experimental": false })),
                combo(json!({ "rust": "nightly", "experimental": true })),
            ]
        );
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let m = matrix(
            r#"
rust: [stable, beta, nightly]
target: [thumbv6m-none-eabi, thumbv7em-none-eabihf]
"#,
        );
        let first = MatrixExpander::expand(&m);
        assert_eq!(first, MatrixExpander::expand(&m));
        assert_eq!(first.len(), 6);
        // First axis varies slowest
        assert_eq!(first[0]["rust"], json!("stable"));
        assert_eq!(first[1]["rust"], json!("stable"));
        assert_eq!(first[1]["target"], json!("thumbv7em-none-eabihf"));
        assert_eq!(first[2]["rust"], json!("beta"));
    }

    #[test]
    fn test_exclude_partial_match() {
        let m = matrix(
            r#"
rust: [stable, nightly]
target: [thumbv6m-none-eabi, thumbv7em-none-eabihf]
exclude:
  - rust: nightly
    target: thumbv7em-none-eabihf
  - target: nonexistent
"#,
        );
        let combinations = MatrixExpander::expand(&m);
        assert_eq!(combinations.len(), 3);
        assert!(!combinations.contains(&combo(json!({
            "rust": "nightly",
            "target": "thumbv7em-none-eabihf"
        }))));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let m = matrix(
            r#"
opt-level: [1, 2]
exclude:
  - opt-level: 2.0
"#,
        );
        assert_eq!(
            MatrixExpander::expand(&m),
            vec![combo(json!({ "opt-level": 1 }))]
        );
    }

    #[test]
    fn test_include_merges_extra_keys() {
        let m = matrix(
            r#"
rust: [stable, nightly]
include:
  - rust: nightly
    experimental: true
  - features: defmt
"#,
        );
        let combinations = MatrixExpander::expand(&m);
        assert_eq!(
            combinations,
            vec![
                combo(json!({ "rust": "stable", "features": "defmt" })),
                combo(json!({ "rust": "nightly", "experimental": true, "features": "defmt" })),
            ]
        );
    }

    #[test]
    fn test_include_may_overwrite_added_keys() {
        let m = matrix(
            r#"
rust: [stable]
include:
  - experimental: false
  - rust: stable
    experimental: true
"#,
        );
        let combinations = MatrixExpander::expand(&m);
        assert_eq!(
            combinations,
            vec![combo(json!({ "rust": "stable", "experimental": true }))]
        );
    }

    #[test]
    fn test_duplicate_include_adds_nothing() {
        let m = matrix(
            r#"
rust: [stable]
experimental: [false]
include:
  - rust: stable
    experimental: false
"#,
        );
        assert_eq!(MatrixExpander::expand(&m).len(), 1);
    }

    #[test]
    fn test_include_only_matrix() {
        let m = matrix(
            r#"
include:
  - rust: stable
  - rust: nightly
  - rust: stable
"#,
        );
        let combinations = MatrixExpander::expand(&m);
        assert_eq!(
            combinations,
            vec![
                combo(json!({ "rust": "stable" })),
                combo(json!({ "rust": "nightly" })),
            ]
        );
    }

    #[test]
    fn test_embedded_cells() {
        let workflow: Workflow = serde_yaml::from_str(EMBEDDED_CI).unwrap();
        let cells =
            MatrixExpander::cells("ci", &workflow.jobs["ci"], &ExpressionContext::default())
                .unwrap();

        assert_eq!(cells.len(), 2);

        assert_eq!(cells[0].name, "ci (stable, false)");
        assert_eq!(cells[0].channel.as_deref(), Some("stable"));
        assert_eq!(cells[0].target.as_deref(), Some("thumbv6m-none-eabi"));
        assert!(!cells[0].experimental);

        assert_eq!(cells[1].name, "ci (nightly, true)");
        assert_eq!(cells[1].channel.as_deref(), Some("nightly"));
        assert_eq!(cells[1].target.as_deref(), Some("thumbv6m-none-eabi"));
        assert!(cells[1].experimental);
        assert_eq!(cells[1].index, 1);
    }

    #[test]
    fn test_job_without_matrix_is_one_cell() {
        let workflow: Workflow = serde_yaml::from_str(
            r#"
on: push
jobs:
  lint:
    name: Lint
    steps:
      - run: cargo fmt --check
"#,
        )
        .unwrap();
        let cells =
            MatrixExpander::cells("lint", &workflow.jobs["lint"], &ExpressionContext::default())
                .unwrap();

        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].name, "Lint");
        assert!(cells[0].values.is_empty());
        assert_eq!(cells[0].channel, None);
        assert!(!cells[0].experimental);
    }

    #[test]
    fn test_templated_name_and_matrix_channel() {
        let workflow: Workflow = serde_yaml::from_str(
            r#"
on: push
jobs:
  test:
    name: test on ${{ matrix.toolchain }}
    continue-on-error: true
    strategy:
      matrix:
        toolchain: [beta]
    steps:
      - run: cargo test
"#,
        )
        .unwrap();
        let cells =
            MatrixExpander::cells("test", &workflow.jobs["test"], &ExpressionContext::default())
                .unwrap();

        assert_eq!(cells[0].name, "test on beta");
        assert_eq!(cells[0].channel.as_deref(), Some("beta"));
        assert!(cells[0].experimental);
    }

    #[test]
    fn test_fully_excluded_matrix_is_an_error() {
        let workflow: Workflow = serde_yaml::from_str(
            r#"
on: push
jobs:
  ci:
    strategy:
      matrix:
        rust: [stable]
        exclude:
          - rust: stable
    steps:
      - run: ./build.sh
"#,
        )
        .unwrap();
        let result =
            MatrixExpander::cells("ci", &workflow.jobs["ci"], &ExpressionContext::default());
        assert!(matches!(result, Err(ServiceError::InvalidWorkflow(_))));
    }
}
