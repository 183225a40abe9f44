// Built-in Functions
// Pure expression functions; job status functions live in the evaluator

use crate::expression::evaluator::EvalError;
use crate::expression::value::ValueExt;

use serde_json::Value;

/// Registry of built-in functions
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    /// Call a built-in function; names are case-insensitive
    pub fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name.to_lowercase().as_str() {
            "contains" => Self::fn_contains(args),
            "startswith" => Self::fn_starts_with(args),
            "endswith" => Self::fn_ends_with(args),
            "format" => Self::fn_format(args),
            "join" => Self::fn_join(args),
            "tojson" => Self::fn_to_json(args),
            "fromjson" => Self::fn_from_json(args),
            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    fn fn_contains(args: Vec<Value>) -> Result<Value, EvalError> {
        require_args(&args, 2, "contains")?;
        let found = match &args[0] {
            Value::Array(items) => items.iter().any(|item| item.loose_eq(&args[1])),
            haystack => haystack
                .to_display_string()
                .to_lowercase()
                .contains(&args[1].to_display_string().to_lowercase()),
        };
        Ok(Value::Bool(found))
    }

    fn fn_starts_with(args: Vec<Value>) -> Result<Value, EvalError> {
        require_args(&args, 2, "startsWith")?;
        let text = args[0].to_display_string().to_lowercase();
        let prefix = args[1].to_display_string().to_lowercase();
        Ok(Value::Bool(text.starts_with(&prefix)))
    }

    fn fn_ends_with(args: Vec<Value>) -> Result<Value, EvalError> {
        require_args(&args, 2, "endsWith")?;
        let text = args[0].to_display_string().to_lowercase();
        let suffix = args[1].to_display_string().to_lowercase();
        Ok(Value::Bool(text.ends_with(&suffix)))
    }

    /// format('{0} on {1}', a, b) with `{{` and `}}` as escaped braces
    fn fn_format(args: Vec<Value>) -> Result<Value, EvalError> {
        let Some((template, rest)) = args.split_first() else {
            return Err(EvalError::new("format requires at least 1 argument"));
        };
        let template = template.to_display_string();
        let mut output = String::new();
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    output.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    output.push('}');
                }
                '{' => {
                    let mut index = String::new();
                    for c in chars.by_ref() {
                        if c == '}' {
                            break;
                        }
                        index.push(c);
                    }
                    let position: usize = index.trim().parse().map_err(|_| {
                        EvalError::new(format!("format: invalid placeholder '{{{}}}'", index))
                    })?;
                    let value = rest.get(position).ok_or_else(|| {
                        EvalError::new(format!("format: missing argument {}", position))
                    })?;
                    output.push_str(&value.to_display_string());
                }
                _ => output.push(ch),
            }
        }

        Ok(Value::String(output))
    }

    fn fn_join(args: Vec<Value>) -> Result<Value, EvalError> {
        if args.is_empty() || args.len() > 2 {
            return Err(EvalError::new("join requires 1 or 2 arguments"));
        }
        let separator = args
            .get(1)
            .map(|s| s.to_display_string())
            .unwrap_or_else(|| ",".to_string());
        let joined = match &args[0] {
            Value::Array(items) => items
                .iter()
                .map(|item| item.to_display_string())
                .collect::<Vec<_>>()
                .join(&separator),
            other => other.to_display_string(),
        };
        Ok(Value::String(joined))
    }

    fn fn_to_json(args: Vec<Value>) -> Result<Value, EvalError> {
        require_args(&args, 1, "toJSON")?;
        serde_json::to_string_pretty(&args[0])
            .map(Value::String)
            .map_err(|e| EvalError::new(format!("toJSON: {}", e)))
    }

    fn fn_from_json(args: Vec<Value>) -> Result<Value, EvalError> {
        require_args(&args, 1, "fromJSON")?;
        let text = args[0].to_display_string();
        serde_json::from_str(&text).map_err(|e| EvalError::new(format!("fromJSON: {}", e)))
    }
}

fn require_args(args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
    if args.len() != count {
        return Err(EvalError::new(format!(
            "{} requires {} argument(s), got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contains_string_and_array() {
        assert_eq!(
            BuiltinFunctions::call("contains", vec![json!("Nightly-2024"), json!("nightly")])
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            BuiltinFunctions::call("contains", vec![json!(["stable", "beta"]), json!("nightly")])
                .unwrap(),
            json!(false)
        );
    }

    #[test]
    fn test_starts_and_ends_with() {
        assert_eq!(
            BuiltinFunctions::call("startsWith", vec![json!("refs/heads/master"), json!("refs/heads/")])
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            BuiltinFunctions::call("endsWith", vec![json!("thumbv6m-none-eabi"), json!("-EABI")])
                .unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_format() {
        let result = BuiltinFunctions::call(
            "format",
            vec![json!("{0} on {1} {{literal}}"), json!("nightly"), json!(true)],
        )
        .unwrap();
        assert_eq!(result, json!("nightly on true {literal}"));
    }

    #[test]
    fn test_format_missing_argument() {
        let err = BuiltinFunctions::call("format", vec![json!("{1}"), json!("a")]).unwrap_err();
        assert!(err.message.contains("missing argument 1"));
    }

    #[test]
    fn test_join() {
        assert_eq!(
            BuiltinFunctions::call("join", vec![json!(["a", "b"]), json!(" + ")]).unwrap(),
            json!("a + b")
        );
        assert_eq!(
            BuiltinFunctions::call("join", vec![json!(["a", "b"])]).unwrap(),
            json!("a,b")
        );
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            BuiltinFunctions::call("fromJSON", vec![json!("[\"stable\", \"nightly\"]")]).unwrap(),
            json!(["stable", "nightly"])
        );
    }

    #[test]
    fn test_unknown_function() {
        assert!(BuiltinFunctions::call("hashFiles", vec![]).is_err());
    }
}
