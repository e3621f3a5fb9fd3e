//! `.env` generation from Terraform outputs, and validation of the result.

use crate::config::Environment;
use crate::shared::fsutil;
use crate::terraform::output::OutputValue;
use chrono::{DateTime, Local};
use std::path::Path;

/// How one Terraform output becomes one environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMapping {
    pub key: &'static str,
    pub output: &'static str,
    /// The application cannot start without it.
    pub critical: bool,
}

const fn mapping(key: &'static str, output: &'static str, critical: bool) -> EnvMapping {
    EnvMapping {
        key,
        output,
        critical,
    }
}

pub const ENV_MAPPINGS: &[EnvMapping] = &[
    mapping("AZURE_OPENAI_ENDPOINT", "openai_endpoint", true),
    mapping("AZURE_OPENAI_DEPLOYMENT_NAME", "openai_deployment_name", true),
    mapping("AZURE_OPENAI_API_VERSION", "openai_api_version", false),
    mapping("AZURE_OPENAI_ACCOUNT_NAME", "openai_account_name", false),
    mapping("AZURE_KEY_VAULT_URL", "key_vault_uri", true),
    mapping("AZURE_KEY_VAULT_NAME", "key_vault_name", false),
    mapping(
        "AZURE_OPENAI_API_KEY_SECRET_NAME",
        "openai_key_secret_name",
        false,
    ),
    mapping("AZURE_STORAGE_ACCOUNT_NAME", "storage_account_name", false),
    mapping("AZURE_STORAGE_CONTAINER_NAME", "storage_container_name", false),
    mapping("AZURE_RESOURCE_GROUP", "resource_group_name", true),
    mapping("AZURE_LOCATION", "location", false),
    mapping(
        "AZURE_LOG_ANALYTICS_WORKSPACE_ID",
        "log_analytics_workspace_id",
        false,
    ),
    mapping(
        "APPLICATIONINSIGHTS_CONNECTION_STRING",
        "application_insights_connection_string",
        false,
    ),
    mapping("AZURE_APP_SERVICE_URL", "app_service_url", false),
    mapping("APP_ENVIRONMENT", "environment", false),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    header: Vec<String>,
    entries: Vec<(String, String)>,
}

/// Result of mapping outputs: the file plus the mappings that had no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedEnv {
    pub env: EnvFile,
    pub skipped: Vec<&'static str>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, environment: Environment, generated_at: DateTime<Local>) -> Self {
        self.header = vec![
            format!(
                "Generated by azinfra {} from Terraform outputs",
                env!("CARGO_PKG_VERSION")
            ),
            format!("Environment: {}", environment),
            format!("Generated at: {}", generated_at.format("%Y-%m-%d %H:%M:%S %z")),
            "Contains deployment details; do not commit this file.".to_string(),
        ];
        self
    }

    /// Map outputs through [`ENV_MAPPINGS`], then append `extras`.
    /// Null and missing outputs are left out and reported in `skipped`.
    pub fn from_outputs(outputs: &[OutputValue], extras: &[(String, String)]) -> MappedEnv {
        let mut env = EnvFile::new();
        let mut skipped = Vec::new();

        for mapping in ENV_MAPPINGS {
            let value = outputs
                .iter()
                .find(|o| o.name == mapping.output)
                .and_then(OutputValue::as_plain_string);
            match value {
                Some(value) => env.set(mapping.key, value),
                None => skipped.push(mapping.key),
            }
        }
        for (key, value) in extras {
            env.set(key, value.clone());
        }

        MappedEnv { env, skipped }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        if !self.header.is_empty() {
            out.push('\n');
        }
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_if_needed(value));
            out.push('\n');
        }
        out
    }

    /// Parse dotenv text. Malformed lines are an error.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Self::collect(dotenvy::from_read_iter(text.as_bytes()))
            .map_err(|e| anyhow::anyhow!("Invalid env file: {}", e))
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::collect(iter).map_err(|e| anyhow::anyhow!("Invalid env file {}: {}", path.display(), e))
    }

    fn collect<I>(iter: I) -> Result<Self, dotenvy::Error>
    where
        I: Iterator<Item = Result<(String, String), dotenvy::Error>>,
    {
        let mut env = EnvFile::new();
        for item in iter {
            let (key, value) = item?;
            env.set(&key, value);
        }
        Ok(env)
    }

    /// Back up an existing file to `<path>.backup`, then write.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        fsutil::backup_file(path, ".backup")?;
        fsutil::write_atomic(path, &self.render())
    }
}

/// Single quotes keep `$` literal for both dotenv readers; everything else
/// that needs quoting goes in double quotes.
fn quote_if_needed(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$' | '`'));
    if !needs_quotes {
        return value.to_string();
    }
    if value.contains('$') && !value.contains('\'') && !value.contains('\n') {
        return format!("'{}'", value);
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('$', "\\$");
    format!("\"{}\"", escaped)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvValidation {
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
}

impl EnvValidation {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }

    pub fn problems(&self) -> Vec<String> {
        self.missing
            .iter()
            .map(|k| format!("{} is missing or empty", k))
            .chain(self.invalid.iter().cloned())
            .collect()
    }
}

/// Every critical key must hold a real value; the endpoint must be https.
pub fn validate_env(env: &EnvFile) -> EnvValidation {
    let mut result = EnvValidation::default();

    for mapping in ENV_MAPPINGS.iter().filter(|m| m.critical) {
        match env.get(mapping.key).map(str::trim) {
            None | Some("") | Some("null") => result.missing.push(mapping.key.to_string()),
            Some(_) => {}
        }
    }

    if let Some(endpoint) = env.get("AZURE_OPENAI_ENDPOINT") {
        if !endpoint.is_empty() && endpoint != "null" && !endpoint.starts_with("https://") {
            result.invalid.push(format!(
                "AZURE_OPENAI_ENDPOINT must start with https:// (got '{}')",
                endpoint
            ));
        }
    }
    if let Some(url) = env.get("AZURE_KEY_VAULT_URL") {
        if !url.is_empty() && url != "null" && !url.starts_with("https://") {
            result
                .invalid
                .push(format!("AZURE_KEY_VAULT_URL must start with https:// (got '{}')", url));
        }
    }

    result
}
