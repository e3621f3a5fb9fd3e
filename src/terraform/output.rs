//! Terraform output value retrieval.

use crate::terraform::service::{TerraformError, TerraformResult, TerraformService};
use serde::{Deserialize, Serialize};

/// A single output value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputValue {
    pub name: String,
    pub value: serde_json::Value,
    pub value_type: String,
    pub sensitive: bool,
}

impl OutputValue {
    /// The value as it should appear in a `KEY=VALUE` file. `None` for null.
    pub fn as_plain_string(&self) -> Option<String> {
        match &self.value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Display form with sensitive values masked.
    pub fn display_value(&self, show_sensitive: bool) -> String {
        if self.sensitive && !show_sensitive {
            return "(sensitive)".to_string();
        }
        self.as_plain_string().unwrap_or_else(|| "null".to_string())
    }
}

impl TerraformService {
    /// `terraform output -json`
    pub async fn outputs(&self) -> TerraformResult<Vec<OutputValue>> {
        let cmd = self.command().args(["output", "-json"]);
        let output = self.runner().run(&cmd).await?;

        if !output.success() {
            if output.stderr.contains("No outputs found") {
                return Ok(Vec::new());
            }
            if output.stderr.contains("terraform init") {
                return Err(TerraformError::InitRequired(output.stderr.trim().to_string()));
            }
        }

        let output = output.ensure_success(&cmd)?;
        parse_outputs(&output.stdout)
    }
}

/// Parse the map printed by `terraform output -json`. Outputs are returned sorted by name.
pub fn parse_outputs(stdout: &str) -> TerraformResult<Vec<OutputValue>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(Vec::new());
    }

    let parsed: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|source| TerraformError::JsonParseError {
            command: "output",
            source,
        })?;

    let serde_json::Value::Object(map) = parsed else {
        return Err(TerraformError::UnexpectedOutput {
            command: "output",
            detail: "expected a JSON object of outputs".to_string(),
        });
    };

    let mut outputs: Vec<OutputValue> = map
        .into_iter()
        .map(|(name, output_obj)| {
            let value = output_obj
                .get("value")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let sensitive = output_obj
                .get("sensitive")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let value_type = output_obj
                .get("type")
                .map(describe_type)
                .unwrap_or_else(|| get_value_type(&value));
            OutputValue {
                name,
                value,
                value_type,
                sensitive,
            }
        })
        .collect();
    outputs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(outputs)
}

/// Render the type annotation terraform emits (`"string"` or `["map","string"]`).
fn describe_type(type_value: &serde_json::Value) -> String {
    match type_value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) if parts.len() == 2 => {
            format!("{}({})", describe_type(&parts[0]), describe_type(&parts[1]))
        }
        other => other.to_string(),
    }
}

/// Determine the type of a JSON value
fn get_value_type(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(_) => "bool".to_string(),
        serde_json::Value::Number(_) => "number".to_string(),
        serde_json::Value::String(_) => "string".to_string(),
        serde_json::Value::Array(arr) => match arr.first() {
            Some(first) => format!("list({})", get_value_type(first)),
            None => "list".to_string(),
        },
        serde_json::Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_value_type() {
        assert_eq!(get_value_type(&serde_json::Value::Null), "null");
        assert_eq!(get_value_type(&json!(true)), "bool");
        assert_eq!(get_value_type(&json!([1, 2, 3])), "list(number)");
        assert_eq!(get_value_type(&json!({})), "object");
    }

    #[test]
    fn test_parse_outputs() {
        let stdout = r#"{
          "openai_endpoint": {"sensitive": false, "type": "string", "value": "https://oai-aoai-dev.openai.azure.com/"},
          "application_insights_connection_string": {"sensitive": true, "type": "string", "value": "InstrumentationKey=abc"},
          "tags": {"sensitive": false, "type": ["map", "string"], "value": {"environment": "dev"}}
        }"#;
        let outputs = parse_outputs(stdout).unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].name, "application_insights_connection_string");
        assert!(outputs[0].sensitive);
        assert_eq!(outputs[0].display_value(false), "(sensitive)");
        assert_eq!(outputs[0].display_value(true), "InstrumentationKey=abc");
        assert_eq!(outputs[1].name, "openai_endpoint");
        assert_eq!(outputs[2].value_type, "map(string)");
        assert_eq!(
            outputs[2].as_plain_string().as_deref(),
            Some(r#"{"environment":"dev"}"#)
        );
    }

    #[test]
    fn test_empty_outputs() {
        assert!(parse_outputs("{}\n").unwrap().is_empty());
        assert!(parse_outputs("").unwrap().is_empty());
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(
            parse_outputs("[1,2]"),
            Err(TerraformError::UnexpectedOutput { .. })
        ));
        assert!(matches!(
            parse_outputs("{not json"),
            Err(TerraformError::JsonParseError { .. })
        ));
    }

    #[test]
    fn test_null_value_has_no_plain_string() {
        let value = OutputValue {
            name: "app_service_url".to_string(),
            value: serde_json::Value::Null,
            value_type: "null".to_string(),
            sensitive: false,
        };
        assert_eq!(value.as_plain_string(), None);
        assert_eq!(value.display_value(false), "null");
    }
}
