//! Command execution.

use crate::Commands;
use colored::Colorize;
use jrpc_client::{Client, ClientError};
use serde_json::Value;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, ClientError> {
    match cmd {
        Commands::Call { method, params } => {
            let params = parse_params(&params);
            let result = client.call(&method, params).join_value().await?;
            Ok(format_json(&result))
        }

        Commands::Notify { method, params } => {
            let params = parse_params(&params);
            client.notify(&method, params).await?;
            Ok(format!("{} {}", "Sent".green(), method.cyan()))
        }
    }
}

/// Parses each argument as JSON, falling back to a plain string.
pub fn parse_params(args: &[String]) -> Vec<Value> {
    args.iter().map(|arg| parse_param(arg)).collect()
}

fn parse_param(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Formats an error for display, with the server's code when there is one.
pub fn format_error(err: &ClientError) -> String {
    match err.error_object() {
        Some(obj) => {
            let mut out = format!(
                "{} {}: {}",
                "Error".red(),
                obj.code.code().to_string().yellow(),
                obj.message
            );
            if let Some(data) = &obj.data {
                out.push('\n');
                out.push_str(&format_json(data));
            }
            out
        }
        None => format!("{}: {}", "Error".red(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jrpc_protocol::ErrorObject;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        let args: Vec<String> = ["42", "\"quoted\"", "plain", "[1,2]", "{\"a\":true}", "null"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            parse_params(&args),
            vec![
                json!(42),
                json!("quoted"),
                json!("plain"),
                json!([1, 2]),
                json!({"a": true}),
                Value::Null,
            ]
        );
    }

    #[test]
    fn test_format_error_includes_code() {
        colored::control::set_override(false);
        let err = ClientError::Rpc(ErrorObject::method_not_found("Missing"));
        assert_eq!(format_error(&err), "Error -32601: method not found: Missing");

        let err = ClientError::Timeout { id: 3 };
        assert_eq!(format_error(&err), "Error: request 3 timed out");
    }

    #[test]
    fn test_format_json_pretty() {
        assert_eq!(format_json(&json!({"k": 1})), "{\n  \"k\": 1\n}");
    }
}
