// Built-in Actions
// The `uses:` actions that run natively instead of through an action runtime

use crate::error::{ServiceError, ServiceResult};
use crate::expression::{EvalError, ExpressionEngine, ValueExt};

use serde::Serialize;
use serde_json::{Map, Value};

/// An action reference gridci knows how to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinAction {
    /// `actions/checkout`
    Checkout,
    /// `actions-rs/toolchain`
    ActionsRsToolchain,
    /// `dtolnay/rust-toolchain`; the ref may name the channel (`@nightly`)
    DtolnayToolchain { git_ref: Option<String> },
}

impl BuiltinAction {
    /// Parse a `uses:` reference; `None` for actions without a native runner
    pub fn parse(uses: &str) -> Option<Self> {
        let (name, git_ref) = match uses.trim().split_once('@') {
            Some((name, git_ref)) => (name, Some(git_ref.to_string())),
            None => (uses.trim(), None),
        };

        match name.to_lowercase().as_str() {
            "actions/checkout" => Some(BuiltinAction::Checkout),
            "actions-rs/toolchain" => Some(BuiltinAction::ActionsRsToolchain),
            "dtolnay/rust-toolchain" => Some(BuiltinAction::DtolnayToolchain { git_ref }),
            _ => None,
        }
    }

    pub fn is_toolchain(&self) -> bool {
        !matches!(self, BuiltinAction::Checkout)
    }
}

/// What a toolchain step asks to be installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainRequest {
    /// Release channel or version: `stable`, `nightly-2024-01-01`, `1.75.0`
    pub channel: String,
    pub profile: Option<String>,
    pub targets: Vec<String>,
    pub components: Vec<String>,
    /// Pin the rest of the cell to this toolchain
    pub pin: bool,
}

impl ToolchainRequest {
    /// Build a request from the interpolated `with:` inputs of a toolchain step
    pub fn from_inputs(action: &BuiltinAction, inputs: &Map<String, Value>) -> ServiceResult<Self> {
        match action {
            BuiltinAction::Checkout => Err(ServiceError::InvalidWorkflow(
                "actions/checkout does not install a toolchain".to_string(),
            )),
            BuiltinAction::ActionsRsToolchain => {
                let channel = input_str(inputs, "toolchain").ok_or_else(|| {
                    ServiceError::InvalidWorkflow(
                        "actions-rs/toolchain requires a 'toolchain' input".to_string(),
                    )
                })?;
                Ok(Self {
                    channel,
                    profile: input_str(inputs, "profile"),
                    targets: input_list(inputs, "target"),
                    components: input_list(inputs, "components"),
                    pin: input_bool(inputs, "override") || input_bool(inputs, "default"),
                })
            }
            BuiltinAction::DtolnayToolchain { git_ref } => {
                let channel = input_str(inputs, "toolchain")
                    .or_else(|| git_ref.clone().filter(|r| is_channel_ref(r)))
                    .ok_or_else(|| {
                        ServiceError::InvalidWorkflow(
                            "dtolnay/rust-toolchain requires a 'toolchain' input or a channel ref"
                                .to_string(),
                        )
                    })?;
                let mut targets = input_list(inputs, "targets");
                targets.extend(input_list(inputs, "target"));
                Ok(Self {
                    channel,
                    profile: Some("minimal".to_string()),
                    targets,
                    components: input_list(inputs, "components"),
                    pin: true,
                })
            }
        }
    }
}

/// Interpolate every string input against the cell context
pub fn resolve_inputs(
    engine: &ExpressionEngine,
    with: &Map<String, Value>,
) -> Result<Map<String, Value>, EvalError> {
    let mut resolved = Map::new();
    for (key, value) in with {
        let value = match value {
            Value::String(text) => engine.evaluate_value(text)?,
            other => other.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

/// `@stable`, `@nightly-2024-05-01`, `@1.75.0`; not `@v1` or `@master`
fn is_channel_ref(git_ref: &str) -> bool {
    let channel = ["stable", "beta", "nightly"]
        .iter()
        .any(|c| git_ref == *c || git_ref.starts_with(&format!("{}-", c)));
    channel || git_ref.starts_with(|c: char| c.is_ascii_digit())
}

fn input_str(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    inputs
        .get(key)
        .filter(|v| !v.is_null())
        .map(|v| v.to_display_string().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn input_list(inputs: &Map<String, Value>, key: &str) -> Vec<String> {
    match inputs.get(key) {
        Some(Value::Array(items)) => items.iter().map(|v| v.to_display_string()).collect(),
        Some(value) if !value.is_null() => value
            .to_display_string()
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn input_bool(inputs: &Map<String, Value>, key: &str) -> bool {
    match inputs.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
