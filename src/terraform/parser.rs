use crate::terraform::model::{
    TerraformOutput, TerraformResource, TerraformVariable, VariableReference,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static RESOURCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*resource\s+"([^"]+)"\s+"([^"]+)"\s*\{"#).expect("Invalid resource regex")
});

static VARIABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*variable\s+"([^"]+)"\s*\{"#).expect("Invalid variable regex")
});

static OUTPUT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*output\s+"([^"]+)"\s*\{"#).expect("Invalid output regex")
});

static VAR_REFERENCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bvar\.([A-Za-z_][A-Za-z0-9_-]*)"#).expect("Invalid var reference regex")
});

static TERRAFORM_BLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*terraform\s*\{"#).expect("Invalid terraform block regex"));

static BACKEND_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*backend\s+"azurerm"\s*\{"#).expect("Invalid backend block regex")
});

static DESCRIPTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*description\s*=\s*"((?:[^"\\]|\\.)*)""#).expect("Invalid description regex")
});

static TYPE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*type\s*=\s*(.+?)\s*$"#).expect("Invalid type regex"));

static DEFAULT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*default\s*="#).expect("Invalid default regex"));

static SENSITIVE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*sensitive\s*=\s*true\b"#).expect("Invalid sensitive regex")
});

/// Regex-based scanner for the subset of HCL the deployment tooling needs.
pub struct TerraformParser {
    content: String,
}

impl TerraformParser {
    pub fn new(content: String) -> Self {
        Self { content }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn parse_resources(&self) -> Vec<TerraformResource> {
        RESOURCE_REGEX
            .captures_iter(&self.content)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                Some(TerraformResource {
                    resource_type: captures[1].to_string(),
                    name: captures[2].to_string(),
                    line: self.line_of(whole.start()),
                })
            })
            .collect()
    }

    pub fn parse_variables(&self) -> Vec<TerraformVariable> {
        VARIABLE_REGEX
            .captures_iter(&self.content)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                let body = self.block_body(whole.end() - 1).unwrap_or_default();
                let top = top_level_lines(body);
                Some(TerraformVariable {
                    name: captures[1].to_string(),
                    description: DESCRIPTION_REGEX
                        .captures(&top)
                        .map(|c| c[1].to_string()),
                    type_: TYPE_REGEX.captures(&top).map(|c| c[1].to_string()),
                    has_default: DEFAULT_REGEX.is_match(&top),
                    line: self.line_of(whole.start()),
                })
            })
            .collect()
    }

    pub fn parse_outputs(&self) -> Vec<TerraformOutput> {
        OUTPUT_REGEX
            .captures_iter(&self.content)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                let body = self.block_body(whole.end() - 1).unwrap_or_default();
                let top = top_level_lines(body);
                Some(TerraformOutput {
                    name: captures[1].to_string(),
                    description: DESCRIPTION_REGEX
                        .captures(&top)
                        .map(|c| c[1].to_string()),
                    sensitive: SENSITIVE_REGEX.is_match(&top),
                    line: self.line_of(whole.start()),
                })
            })
            .collect()
    }

    /// Every `var.NAME` outside comments, with its 1-based line number.
    pub fn variable_references(&self) -> Vec<VariableReference> {
        let mut references = Vec::new();
        for (index, line) in self.content.lines().enumerate() {
            let code = strip_line_comment(line);
            for captures in VAR_REFERENCE_REGEX.captures_iter(code) {
                references.push(VariableReference {
                    name: captures[1].to_string(),
                    line: index + 1,
                });
            }
        }
        references
    }

    /// Byte range of the first `terraform { ... }` block, braces included.
    pub fn terraform_block_span(&self) -> Option<Range<usize>> {
        let found = TERRAFORM_BLOCK_REGEX.find(&self.content)?;
        let open = found.end() - 1;
        let close = self.matching_brace(open)?;
        Some(found.start()..close + 1)
    }

    /// Byte range of the `backend "azurerm" { ... }` block from the start of its line.
    pub fn backend_block_span(&self) -> Option<Range<usize>> {
        let found = BACKEND_BLOCK_REGEX.find(&self.content)?;
        let open = found.end() - 1;
        let close = self.matching_brace(open)?;
        Some(found.start()..close + 1)
    }

    fn block_body(&self, open: usize) -> Option<&str> {
        let close = self.matching_brace(open)?;
        Some(&self.content[open + 1..close])
    }

    /// Index of the `}` closing the `{` at `open`; quoted strings and comments are skipped.
    fn matching_brace(&self, open: usize) -> Option<usize> {
        let bytes = self.content.as_bytes();
        if bytes.get(open) != Some(&b'{') {
            return None;
        }

        let mut depth = 0usize;
        let mut i = open;
        let mut in_string = false;
        while i < bytes.len() {
            let b = bytes[i];
            if in_string {
                match b {
                    b'\\' => i += 1,
                    b'"' => in_string = false,
                    _ => {}
                }
            } else {
                match b {
                    b'"' => in_string = true,
                    b'#' => i = skip_to_line_end(bytes, i),
                    b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_to_line_end(bytes, i),
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Some(i);
                        }
                    }
                    _ => {}
                }
            }
            i += 1;
        }
        None
    }

    fn line_of(&self, offset: usize) -> usize {
        self.content[..offset].matches('\n').count() + 1
    }
}

fn skip_to_line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| from + p - 1)
        .unwrap_or(bytes.len())
}

/// Drop `#` and `//` comments that start outside a string literal.
pub fn strip_line_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'#' if !in_string => return &line[..i],
            b'/' if !in_string && bytes.get(i + 1) == Some(&b'/') => return &line[..i],
            _ => {}
        }
        i += 1;
    }
    line
}

/// Lines of a block body that are not inside a nested block, so attribute
/// lookups like `description` ignore nested `validation { }` blocks.
fn top_level_lines(body: &str) -> String {
    let mut depth: i32 = 0;
    let mut kept = Vec::new();
    for line in body.lines() {
        let code = strip_line_comment(line);
        if depth == 0 {
            kept.push(line);
        }
        let mut in_string = false;
        for b in code.bytes() {
            match b {
                b'"' => in_string = !in_string,
                b'{' | b'[' | b'(' if !in_string => depth += 1,
                b'}' | b']' | b')' if !in_string => depth -= 1,
                _ => {}
            }
        }
        depth = depth.max(0);
    }
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resources() {
        let content = r#"
resource "azurerm_resource_group" "main" {
  name     = "rg-${var.project_name}-${var.environment}"
  location = var.location
}

resource "azurerm_key_vault" "main" {
  name = "kv-example"
}
"#;
        let parser = TerraformParser::new(content.to_string());
        let resources = parser.parse_resources();

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].resource_type, "azurerm_resource_group");
        assert_eq!(resources[0].name, "main");
        assert_eq!(resources[0].line, 2);
        assert_eq!(resources[1].address(), "azurerm_key_vault.main");
    }

    #[test]
    fn test_parse_variables() {
        let content = r#"
variable "location" {
  description = "Azure region"
  type        = string
  default     = "eastus"
}

variable "environment" {
  type = string

  validation {
    condition     = contains(["dev", "prod"], var.environment)
    error_message = "Environment must be dev or prod."
  }
}

variable "tags" {
  type    = map(string)
  default = {}
}
"#;
        let parser = TerraformParser::new(content.to_string());
        let variables = parser.parse_variables();

        assert_eq!(variables.len(), 3);
        assert_eq!(variables[0].name, "location");
        assert_eq!(variables[0].description.as_deref(), Some("Azure region"));
        assert_eq!(variables[0].type_.as_deref(), Some("string"));
        assert!(variables[0].has_default);
        assert_eq!(variables[1].name, "environment");
        assert_eq!(variables[1].description, None);
        assert!(!variables[1].has_default);
        assert_eq!(variables[2].type_.as_deref(), Some("map(string)"));
    }

    #[test]
    fn test_parse_outputs_sensitive() {
        let content = r#"
output "openai_endpoint" {
  description = "Endpoint of the OpenAI account"
  value       = azurerm_cognitive_account.openai.endpoint
}

output "application_insights_connection_string" {
  value     = azurerm_application_insights.main.connection_string
  sensitive = true
}
"#;
        let parser = TerraformParser::new(content.to_string());
        let outputs = parser.parse_outputs();

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].name, "openai_endpoint");
        assert!(!outputs[0].sensitive);
        assert!(outputs[1].sensitive);
        assert_eq!(outputs[1].description, None);
    }

    #[test]
    fn test_variable_references_skip_comments() {
        let content = "name = \"kv-${var.project_name}\" # var.ignored\n// var.also_ignored\nsku = var.sku_name\n";
        let parser = TerraformParser::new(content.to_string());
        let refs = parser.variable_references();

        assert_eq!(
            refs,
            vec![
                VariableReference {
                    name: "project_name".to_string(),
                    line: 1
                },
                VariableReference {
                    name: "sku_name".to_string(),
                    line: 3
                },
            ]
        );
    }

    #[test]
    fn test_backend_block_span() {
        let content = r#"terraform {
  required_version = ">= 1.5.0"

  backend "azurerm" {
    resource_group_name = "rg" # {not a brace}
    key                 = "x.tfstate"
  }
}
"#;
        let parser = TerraformParser::new(content.to_string());
        let span = parser.backend_block_span().unwrap();
        let block = &content[span];
        assert!(block.starts_with("  backend \"azurerm\" {"));
        assert!(block.ends_with("  }"));

        let tf = parser.terraform_block_span().unwrap();
        assert_eq!(tf.start, 0);
        assert_eq!(&content[tf.end - 1..tf.end], "}");
        assert_eq!(tf.end, content.trim_end().len());
    }

    #[test]
    fn test_strip_line_comment_keeps_hash_in_strings() {
        assert_eq!(
            strip_line_comment(r##"color = "#fff" # note"##),
            r##"color = "#fff" "##
        );
        assert_eq!(strip_line_comment("url = \"https://x\""), "url = \"https://x\"");
    }
}
