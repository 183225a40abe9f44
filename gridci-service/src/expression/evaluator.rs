// Expression Evaluator
// Evaluates AST expressions against matrix, github, env, runner and steps contexts

use crate::expression::functions::BuiltinFunctions;
use crate::expression::lexer::{extract_segments, Segment};
use crate::expression::parser::{BinaryOp, Expr, ExprParser};
use crate::expression::value::ValueExt;

use serde_json::{Map, Value};

use std::cmp::Ordering;
use std::fmt;

/// Evaluation error
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Job status seen by `success()`, `failure()` and `cancelled()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusContext {
    pub failed: bool,
    pub cancelled: bool,
}

/// Context for expression evaluation
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    /// Values of the current matrix combination
    pub matrix: Map<String, Value>,

    /// github.* (event_name, ref, sha, workspace, ...)
    pub github: Map<String, Value>,

    /// Environment visible to the current job or step
    pub env: Map<String, Value>,

    /// runner.* (os, arch, temp)
    pub runner: Map<String, Value>,

    /// strategy.* (fail-fast, max-parallel, job-index, job-total)
    pub strategy: Map<String, Value>,

    /// steps.<id>.outcome / conclusion / outputs
    pub steps: Map<String, Value>,

    /// Job status for status functions
    pub status: StatusContext,
}

impl ExpressionContext {
    pub fn with_matrix(mut self, matrix: Map<String, Value>) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_github(mut self, github: Map<String, Value>) -> Self {
        self.github = github;
        self
    }
}

/// Evaluates parsed expressions
pub struct Evaluator<'a> {
    context: &'a ExpressionContext,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a ExpressionContext) -> Self {
        Self { context }
    }

    /// Evaluate an expression
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(crate::expression::value::number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Context(name) => self.lookup_context(name),

            Expr::Member { object, property } => {
                let obj = self.eval(object)?;
                Ok(member(&obj, property))
            }

            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                Ok(index_value(&obj, &idx))
            }

            Expr::Filter { object } => {
                let obj = self.eval(object)?;
                Ok(match obj {
                    Value::Object(map) => Value::Array(map.into_iter().map(|(_, v)| v).collect()),
                    Value::Array(items) => Value::Array(items),
                    _ => Value::Array(Vec::new()),
                })
            }

            Expr::FunctionCall { name, args } => self.eval_function(name, args),

            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),

            Expr::Binary { op, left, right } => {
                // && and || short-circuit and return the deciding operand
                match op {
                    BinaryOp::And => {
                        let left_val = self.eval(left)?;
                        if !left_val.is_truthy() {
                            return Ok(left_val);
                        }
                        self.eval(right)
                    }
                    BinaryOp::Or => {
                        let left_val = self.eval(left)?;
                        if left_val.is_truthy() {
                            return Ok(left_val);
                        }
                        self.eval(right)
                    }
                    _ => {
                        let left_val = self.eval(left)?;
                        let right_val = self.eval(right)?;
                        Ok(Value::Bool(compare(*op, &left_val, &right_val)))
                    }
                }
            }
        }
    }

    fn lookup_context(&self, name: &str) -> Result<Value, EvalError> {
        let map = match name.to_lowercase().as_str() {
            "matrix" => &self.context.matrix,
            "github" => &self.context.github,
            "env" => &self.context.env,
            "runner" => &self.context.runner,
            "strategy" => &self.context.strategy,
            "steps" => &self.context.steps,
            _ => {
                return Err(EvalError::new(format!(
                    "unrecognized named-value: '{}'",
                    name
                )))
            }
        };
        Ok(Value::Object(map.clone()))
    }

    fn eval_function(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        let status = self.context.status;
        match name.to_lowercase().as_str() {
            "success" => Ok(Value::Bool(!status.failed && !status.cancelled)),
            "failure" => Ok(Value::Bool(status.failed)),
            "cancelled" => Ok(Value::Bool(status.cancelled)),
            "always" => Ok(Value::Bool(true)),
            _ => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                BuiltinFunctions::call(name, values)
            }
        }
    }
}

/// Case-insensitive property lookup; arrays map the lookup over their items
fn member(object: &Value, property: &str) -> Value {
    match object {
        Value::Object(map) => map
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(property))
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| member(item, property))
                .filter(|v| !v.is_null())
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn index_value(object: &Value, index: &Value) -> Value {
    match (object, index) {
        (Value::Array(items), Value::Number(_)) => {
            let position = index.to_number();
            if position < 0.0 || position.fract() != 0.0 {
                return Value::Null;
            }
            items.get(position as usize).cloned().unwrap_or(Value::Null)
        }
        (Value::Object(_), _) => member(object, &index.to_display_string()),
        _ => Value::Null,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::Eq => left.loose_eq(right),
        BinaryOp::Ne => !left.loose_eq(right),
        BinaryOp::Lt => left.loose_cmp(right) == Some(Ordering::Less),
        BinaryOp::Le => matches!(
            left.loose_cmp(right),
            Some(Ordering::Less | Ordering::Equal)
        ),
        BinaryOp::Gt => left.loose_cmp(right) == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(
            left.loose_cmp(right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit"),
    }
}

/// Whether an expression calls one of the job status functions
fn uses_status_function(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, args } => {
            matches!(
                name.to_lowercase().as_str(),
                "success" | "failure" | "cancelled" | "always"
            ) || args.iter().any(uses_status_function)
        }
        Expr::Member { object, .. } | Expr::Filter { object } => uses_status_function(object),
        Expr::Index { object, index } => {
            uses_status_function(object) || uses_status_function(index)
        }
        Expr::Not(inner) => uses_status_function(inner),
        Expr::Binary { left, right, .. } => {
            uses_status_function(left) || uses_status_function(right)
        }
        _ => false,
    }
}

/// High-level expression engine
pub struct ExpressionEngine {
    context: ExpressionContext,
}

impl ExpressionEngine {
    pub fn new(context: ExpressionContext) -> Self {
        Self { context }
    }

    /// Evaluate a bare expression (the body of `${{ }}`)
    pub fn evaluate(&self, expr: &str) -> Result<Value, EvalError> {
        let ast = ExprParser::parse_str(expr)
            .map_err(|e| EvalError::new(format!("'{}': {}", expr, e)))?;
        Evaluator::new(&self.context).eval(&ast)
    }

    /// Replace every `${{ }}` in `text` with its string value
    pub fn interpolate(&self, text: &str) -> Result<String, EvalError> {
        let mut result = String::new();

        for segment in extract_segments(text) {
            match segment {
                Segment::Text(s) => result.push_str(&s),
                Segment::Expression(expr) => {
                    result.push_str(&self.evaluate(&expr)?.to_display_string())
                }
            }
        }

        Ok(result)
    }

    /// Evaluate a field value; a lone `${{ }}` keeps its type, anything else
    /// is interpolated into a string
    pub fn evaluate_value(&self, text: &str) -> Result<Value, EvalError> {
        let segments = extract_segments(text.trim());
        if let [Segment::Expression(expr)] = segments.as_slice() {
            return self.evaluate(expr);
        }
        Ok(Value::String(self.interpolate(text)?))
    }

    /// Evaluate an `if:` condition
    ///
    /// The `${{ }}` wrapper is optional. Conditions that do not call a status
    /// function are implicitly combined with `success()`.
    pub fn evaluate_condition(&self, condition: &str) -> Result<bool, EvalError> {
        let trimmed = condition.trim();
        let body = match extract_segments(trimmed).as_slice() {
            [Segment::Expression(expr)] => expr.clone(),
            _ => trimmed.to_string(),
        };

        if body.is_empty() {
            return Ok(!self.context.status.failed && !self.context.status.cancelled);
        }

        let ast = ExprParser::parse_str(&body)
            .map_err(|e| EvalError::new(format!("'{}': {}", body, e)))?;
        let evaluator = Evaluator::new(&self.context);

        if uses_status_function(&ast) {
            Ok(evaluator.eval(&ast)?.is_truthy())
        } else {
            let succeeded = !self.context.status.failed && !self.context.status.cancelled;
            Ok(succeeded && evaluator.eval(&ast)?.is_truthy())
        }
    }

    /// Get the context for modification
    pub fn context_mut(&mut self) -> &mut ExpressionContext {
        &mut self.context
    }

    pub fn context(&self) -> &ExpressionContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> ExpressionEngine {
        let mut matrix = Map::new();
        matrix.insert("rust".to_string(), json!("nightly"));
        matrix.insert("experimental".to_string(), json!(true));

        let mut github = Map::new();
        github.insert("event_name".to_string(), json!("push"));
        github.insert("ref".to_string(), json!("refs/heads/master"));
        github.insert(
            "event".to_string(),
            json!({ "commits": [{ "id": "a1" }, { "id": "b2" }] }),
        );

        ExpressionEngine::new(
            ExpressionContext::default()
                .with_matrix(matrix)
                .with_github(github),
        )
    }

    #[test]
    fn test_matrix_reference_keeps_type() {
        let engine = engine();
        assert_eq!(
            engine.evaluate_value("${{ matrix.experimental }}").unwrap(),
            json!(true)
        );
        assert_eq!(engine.evaluate("matrix.rust").unwrap(), json!("nightly"));
    }

    #[test]
    fn test_interpolation() {
        let engine = engine();
        assert_eq!(
            engine
                .interpolate("build (${{ matrix.rust }}, ${{ matrix.experimental }})")
                .unwrap(),
            "build (nightly, true)"
        );
        assert_eq!(
            engine.evaluate_value("toolchain-${{ matrix.rust }}").unwrap(),
            json!("toolchain-nightly")
        );
    }

    #[test]
    fn test_missing_property_is_null() {
        let engine = engine();
        assert_eq!(engine.evaluate("matrix.target").unwrap(), json!(null));
        assert_eq!(engine.interpolate("[${{ matrix.target }}]").unwrap(), "[]");
    }

    #[test]
    fn test_unknown_context_errors() {
        let engine = engine();
        let err = engine.evaluate("secrets.TOKEN").unwrap_err();
        assert!(err.message.contains("unrecognized named-value"));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let engine = engine();
        assert_eq!(
            engine
                .evaluate("github.ref == 'refs/heads/master' && matrix.rust != 'stable'")
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            engine.evaluate("matrix.missing || 'fallback'").unwrap(),
            json!("fallback")
        );
        assert_eq!(engine.evaluate("1 < 2").unwrap(), json!(true));
    }

    #[test]
    fn test_filter_and_index() {
        let engine = engine();
        assert_eq!(
            engine.evaluate("github.event.commits.*.id").unwrap(),
            json!(["a1", "b2"])
        );
        assert_eq!(
            engine.evaluate("github.event.commits[1].id").unwrap(),
            json!("b2")
        );
        assert_eq!(engine.evaluate("matrix['RUST']").unwrap(), json!("nightly"));
    }

    #[test]
    fn test_condition_implicit_success() {
        let mut engine = engine();
        assert!(engine.evaluate_condition("matrix.experimental").unwrap());
        assert!(engine
            .evaluate_condition("${{ github.event_name == 'push' }}")
            .unwrap());

        engine.context_mut().status.failed = true;
        assert!(!engine.evaluate_condition("matrix.experimental").unwrap());
        assert!(!engine.evaluate_condition("").unwrap());
        assert!(engine.evaluate_condition("always()").unwrap());
        assert!(engine.evaluate_condition("${{ failure() }}").unwrap());
        assert!(!engine.evaluate_condition("success()").unwrap());
    }

    #[test]
    fn test_condition_parse_error() {
        let engine = engine();
        assert!(engine.evaluate_condition("matrix.rust ==").is_err());
    }
}
