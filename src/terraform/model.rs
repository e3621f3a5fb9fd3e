use serde::{Deserialize, Serialize};

/// Location of the remote state for the `azurerm` backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub resource_group_name: String,
    pub storage_account_name: String,
    pub container_name: String,
    pub key: String,
}

impl BackendConfig {
    /// Ordered `key=value` pairs, in the order Terraform documents them.
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("resource_group_name", self.resource_group_name.as_str()),
            ("storage_account_name", self.storage_account_name.as_str()),
            ("container_name", self.container_name.as_str()),
            ("key", self.key.as_str()),
        ]
    }

    /// `-backend-config=...` arguments for `terraform init`.
    pub fn init_args(&self) -> Vec<String> {
        self.pairs()
            .iter()
            .map(|(k, v)| format!("-backend-config={}={}", k, v))
            .collect()
    }

    /// HCL `backend "azurerm"` block indented for placement inside `terraform { }`.
    pub fn to_hcl_block(&self, indent: &str) -> String {
        let width = self.pairs().iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let mut block = format!("{}backend \"azurerm\" {{\n", indent);
        for (k, v) in self.pairs() {
            block.push_str(&format!("{}  {:<width$} = \"{}\"\n", indent, k, v, width = width));
        }
        block.push_str(&format!("{}}}", indent));
        block
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanOutcome {
    NoChanges,
    Changes,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TerraformValidateOutput {
    pub valid: bool,
    pub error_count: i32,
    pub warning_count: i32,
    #[serde(default)]
    pub diagnostics: Vec<TerraformDiagnostic>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TerraformDiagnostic {
    pub severity: String,
    pub summary: String,
    pub detail: Option<String>,
    pub range: Option<DiagnosticRange>,
}

impl TerraformDiagnostic {
    pub fn describe(&self) -> String {
        let location = self
            .range
            .as_ref()
            .map(|r| format!(" ({}:{})", r.filename, r.start.line))
            .unwrap_or_default();
        match &self.detail {
            Some(detail) if !detail.is_empty() => {
                format!("{}: {}{} - {}", self.severity, self.summary, location, detail)
            }
            _ => format!("{}: {}{}", self.severity, self.summary, location),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiagnosticRange {
    pub filename: String,
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Position {
    pub line: i32,
    pub column: i32,
    #[serde(default)]
    pub byte: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerraformVariable {
    pub name: String,
    pub description: Option<String>,
    pub type_: Option<String>,
    pub has_default: bool,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerraformOutput {
    pub name: String,
    pub description: Option<String>,
    pub sensitive: bool,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerraformResource {
    pub resource_type: String,
    pub name: String,
    pub line: usize,
}

impl TerraformResource {
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

/// A `var.NAME` occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariableReference {
    pub name: String,
    pub line: usize,
}
