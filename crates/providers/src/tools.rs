//! Builtin functions callable by delta-chat models.
//!
//! Tool calls complete out-of-band: when a provider finishes streaming a
//! call, the adapter executes the named function here and feeds the result
//! back into the event stream.

use serde_json::{json, Value};

use crate::traits::ToolDefinition;
use mm_domain::error::{Error, Result};

/// Definitions advertised to providers that support function calling.
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_current_time".into(),
            description: "Get the current date and time (UTC, ISO 8601).".into(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: "calculate".into(),
            description: "Apply a basic arithmetic operation to two numbers.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"},
                    "op": {
                        "type": "string",
                        "enum": ["add", "subtract", "multiply", "divide"]
                    }
                },
                "required": ["a", "b", "op"]
            }),
        },
    ]
}

/// Execute a builtin function by name. Unknown names are a request error so
/// a hallucinated tool call surfaces clearly instead of hanging the stream.
pub fn execute(name: &str, arguments: &Value) -> Result<String> {
    match name {
        "get_current_time" => Ok(chrono::Utc::now().to_rfc3339()),
        "calculate" => calculate(arguments),
        other => Err(Error::Request(format!("unknown tool: {other}"))),
    }
}

fn calculate(arguments: &Value) -> Result<String> {
    let a = number_arg(arguments, "a")?;
    let b = number_arg(arguments, "b")?;
    let op = arguments
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Request("calculate: missing 'op'".into()))?;

    let result = match op {
        "add" => a + b,
        "subtract" => a - b,
        "multiply" => a * b,
        "divide" => {
            if b == 0.0 {
                return Err(Error::Request("calculate: division by zero".into()));
            }
            a / b
        }
        other => {
            return Err(Error::Request(format!("calculate: unknown op '{other}'")));
        }
    };

    Ok(format!("{result}"))
}

fn number_arg(arguments: &Value, key: &str) -> Result<f64> {
    arguments
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::Request(format!("calculate: missing number '{key}'")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculate_basic_ops() {
        assert_eq!(
            execute("calculate", &json!({"a": 6, "b": 7, "op": "multiply"})).unwrap(),
            "42"
        );
        assert_eq!(
            execute("calculate", &json!({"a": 1, "b": 2, "op": "add"})).unwrap(),
            "3"
        );
    }

    #[test]
    fn calculate_division_by_zero_rejected() {
        let err = execute("calculate", &json!({"a": 1, "b": 0, "op": "divide"})).unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[test]
    fn unknown_tool_is_a_request_error() {
        let err = execute("launch_rockets", &json!({})).unwrap_err();
        assert!(matches!(err, Error::Request(_)));
    }

    #[test]
    fn current_time_returns_rfc3339() {
        let ts = execute("get_current_time", &json!({})).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn definitions_cover_all_executable_tools() {
        let names: Vec<String> = definitions().into_iter().map(|d| d.name).collect();
        assert!(names.contains(&"get_current_time".to_string()));
        assert!(names.contains(&"calculate".to_string()));
    }
}
