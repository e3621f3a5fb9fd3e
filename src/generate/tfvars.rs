//! `.tfvars` generation for one environment.

use crate::config::{Environment, Settings};
use crate::shared::fsutil;
use chrono::{DateTime, Local};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum TfValue {
    String(String),
    Number(i64),
    Bool(bool),
    List(Vec<String>),
    Map(Vec<(String, String)>),
}

impl TfValue {
    fn is_multiline(&self) -> bool {
        matches!(self, TfValue::Map(entries) if !entries.is_empty())
    }

    fn render(&self) -> String {
        match self {
            TfValue::String(s) => quote(s),
            TfValue::Number(n) => n.to_string(),
            TfValue::Bool(b) => b.to_string(),
            TfValue::List(items) => format!(
                "[{}]",
                items.iter().map(|i| quote(i)).collect::<Vec<_>>().join(", ")
            ),
            TfValue::Map(entries) if entries.is_empty() => "{}".to_string(),
            TfValue::Map(entries) => {
                let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
                let body: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("  {:<width$} = {}", k, quote(v), width = width))
                    .collect();
                format!("{{\n{}\n}}", body.join("\n"))
            }
        }
    }
}

/// HCL string literal. Template sequences are escaped so values are taken literally.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct TfVars {
    environment: Environment,
    entries: Vec<(String, TfValue)>,
}

impl TfVars {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            entries: Vec::new(),
        }
    }

    pub fn from_settings(settings: &Settings, subscription_id: &str) -> Self {
        let mut vars = Self::new(settings.environment);
        vars.set("subscription_id", TfValue::String(subscription_id.to_string()));
        vars.set("environment", TfValue::String(settings.environment.to_string()));
        vars.set("location", TfValue::String(settings.location.clone()));
        vars.set("project_name", TfValue::String(settings.project_name.clone()));
        vars.set(
            "openai_model_name",
            TfValue::String(settings.openai_model_name.clone()),
        );
        vars.set(
            "openai_model_version",
            TfValue::String(settings.openai_model_version.clone()),
        );
        vars.set(
            "openai_deployment_capacity",
            TfValue::Number(i64::from(settings.openai_deployment_capacity)),
        );
        vars.set("enable_app_service", TfValue::Bool(settings.enable_app_service));
        vars.set(
            "tags",
            TfValue::Map(vec![
                ("environment".to_string(), settings.environment.to_string()),
                ("managed_by".to_string(), "terraform".to_string()),
                ("project".to_string(), settings.project_name.clone()),
            ]),
        );
        vars
    }

    /// Insert or replace `name`, keeping the original position on replace.
    pub fn set(&mut self, name: &str, value: TfValue) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TfValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Render in `terraform fmt` layout: single-line values first with aligned
    /// `=`, each multi-line value as its own paragraph.
    pub fn render(&self, generated_at: DateTime<Local>) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "# Generated by azinfra {} on {}\n",
            env!("CARGO_PKG_VERSION"),
            generated_at.format("%Y-%m-%d %H:%M:%S %z")
        ));
        out.push_str(&format!("# Environment: {}\n", self.environment));
        out.push_str("# Regenerated on every deploy; change azinfra.json instead of this file.\n\n");

        let (multi, single): (Vec<_>, Vec<_>) =
            self.entries.iter().partition(|(_, v)| v.is_multiline());

        let width = single.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        for (name, value) in &single {
            out.push_str(&format!("{:<width$} = {}\n", name, value.render(), width = width));
        }
        for (name, value) in &multi {
            out.push_str(&format!("\n{} = {}\n", name, value.render()));
        }
        out
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        fsutil::write_atomic(path, &self.render(Local::now()))
    }
}
