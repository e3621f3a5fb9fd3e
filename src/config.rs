//! Settings for a deployment run.
//!
//! Resolution order: built-in defaults, then the JSON config file
//! (`azinfra.json` in the working directory or `--config`), then environment
//! variables, then command-line flags (applied by the caller).

use crate::terraform::model::BackendConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "azinfra.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown environment '{0}'. Valid environments: dev, test, staging, prod")]
    UnknownEnvironment(String),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }

    /// Protected environments get extra confirmation on apply and destroy.
    pub fn is_protected(&self) -> bool {
        matches!(self, Environment::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "test" | "testing" => Ok(Environment::Test),
            "staging" | "stage" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(ConfigError::UnknownEnvironment(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub project_name: String,
    pub environment: Environment,
    pub location: String,
    pub infra_dir: PathBuf,
    pub app_dir: PathBuf,
    pub env_file: PathBuf,
    pub openai_model_name: String,
    pub openai_model_version: String,
    /// Deployment capacity in thousands of tokens per minute.
    pub openai_deployment_capacity: u32,
    pub enable_app_service: bool,
    pub rbac_propagation_seconds: u64,
    pub health_check_command: Vec<String>,
    pub terraform_path: Option<PathBuf>,
    pub az_path: Option<PathBuf>,
    pub backend: Option<BackendConfig>,
    pub audit_log: Option<PathBuf>,
    // Set from the environment only, never from the config file
    #[serde(skip)]
    pub subscription_id: Option<String>,
    #[serde(skip)]
    pub tenant_id: Option<String>,
    #[serde(skip)]
    pub tf_workspace: Option<String>,
    #[serde(skip)]
    pub allow_prod_destroy: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: "aoai".to_string(),
            environment: Environment::Dev,
            location: "eastus".to_string(),
            infra_dir: PathBuf::from("infra"),
            app_dir: PathBuf::from("."),
            env_file: PathBuf::from(".env"),
            openai_model_name: "gpt-4o".to_string(),
            openai_model_version: "2024-08-06".to_string(),
            openai_deployment_capacity: 10,
            enable_app_service: false,
            rbac_propagation_seconds: 30,
            health_check_command: vec![
                "python".to_string(),
                "-m".to_string(),
                "aoai_cli".to_string(),
                "health".to_string(),
            ],
            terraform_path: None,
            az_path: None,
            backend: None,
            audit_log: None,
            subscription_id: None,
            tenant_id: None,
            tf_workspace: None,
            allow_prod_destroy: false,
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or from `azinfra.json` in `cwd` when present.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => {
                let path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    cwd.join(path)
                };
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                Some(path)
            }
            None => Some(cwd.join(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        let settings = match path {
            Some(path) => {
                tracing::info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_json(&content).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        Ok(settings)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Apply environment variable overrides through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = non_empty("AZINFRA_ENVIRONMENT") {
            self.environment = env.parse()?;
        }
        if let Some(location) = non_empty("AZINFRA_LOCATION") {
            self.location = location;
        }
        if let Some(project) = non_empty("AZINFRA_PROJECT") {
            self.project_name = project;
        }
        if let Some(dir) = non_empty("AZINFRA_INFRA_DIR") {
            self.infra_dir = PathBuf::from(dir);
        }
        if let Some(id) = non_empty("AZURE_SUBSCRIPTION_ID") {
            self.subscription_id = Some(id);
        }
        if let Some(id) = non_empty("AZURE_TENANT_ID") {
            self.tenant_id = Some(id);
        }
        if let Some(workspace) = non_empty("TF_WORKSPACE") {
            self.tf_workspace = Some(workspace);
        }
        if let Some(val) = non_empty("AZINFRA_ALLOW_PROD_DESTROY") {
            self.allow_prod_destroy = val.to_lowercase() == "true";
        }
        Ok(())
    }

    /// Make relative paths absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.infra_dir, &mut self.app_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if self.env_file.is_relative() {
            self.env_file = self.app_dir.join(&self.env_file);
        }
        if let Some(log) = &self.audit_log {
            if log.is_relative() {
                self.audit_log = Some(base.join(log));
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.is_empty()
            || !self
                .project_name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::Invalid {
                field: "project_name",
                reason: format!(
                    "'{}' must be lowercase letters, digits or hyphens",
                    self.project_name
                ),
            });
        }
        if self.location.trim().is_empty() || self.location.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "location",
                reason: format!("'{}' is not an Azure region name", self.location),
            });
        }
        if self.openai_deployment_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "openai_deployment_capacity",
                reason: "capacity must be at least 1 (thousand TPM)".to_string(),
            });
        }
        Ok(())
    }

    /// Terraform workspace for the selected environment.
    pub fn workspace_name(&self) -> String {
        self.tf_workspace
            .clone()
            .unwrap_or_else(|| self.environment.to_string())
    }

    pub fn tfvars_path(&self) -> PathBuf {
        self.infra_dir
            .join("environments")
            .join(format!("{}.tfvars", self.environment))
    }

    pub fn plan_path(&self) -> PathBuf {
        self.infra_dir.join(format!("{}.tfplan", self.environment))
    }

    pub fn audit_log_path(&self) -> Option<PathBuf> {
        self.audit_log
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".azinfra").join("audit.log")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_environment() {
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Dev);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Prod
        );
        assert_eq!("stage".parse::<Environment>().unwrap(), Environment::Staging);
        assert!("qa".parse::<Environment>().is_err());
        assert!(Environment::Prod.is_protected());
        assert!(!Environment::Staging.is_protected());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = Settings::from_json(
            r#"{"project_name": "chatops", "environment": "staging", "openai_deployment_capacity": 30}"#,
        )
        .unwrap();
        assert_eq!(settings.project_name, "chatops");
        assert_eq!(settings.environment, Environment::Staging);
        assert_eq!(settings.openai_deployment_capacity, 30);
        assert_eq!(settings.location, "eastus");
        assert_eq!(settings.rbac_propagation_seconds, 30);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("AZINFRA_ENVIRONMENT", "prod"),
            ("AZINFRA_LOCATION", "swedencentral"),
            ("AZURE_SUBSCRIPTION_ID", "11111111-2222-3333-4444-555555555555"),
            ("TF_WORKSPACE", "prod-blue"),
            ("AZURE_TENANT_ID", ""),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.environment, Environment::Prod);
        assert_eq!(settings.location, "swedencentral");
        assert_eq!(
            settings.subscription_id.as_deref(),
            Some("11111111-2222-3333-4444-555555555555")
        );
        assert_eq!(settings.tenant_id, None);
        assert_eq!(settings.workspace_name(), "prod-blue");
    }

    #[test]
    fn test_override_fields_ignored_in_config_file() {
        let mut settings = Settings::from_json(
            r#"{"environment": "prod", "allow_prod_destroy": true, "subscription_id": "from-file", "tf_workspace": "blue"}"#,
        )
        .unwrap();
        settings.apply_env_overrides(|_| None).unwrap();
        assert_eq!(settings.environment, Environment::Prod);
        assert!(!settings.allow_prod_destroy);
        assert_eq!(settings.subscription_id, None);
        assert_eq!(settings.workspace_name(), "prod");

        settings
            .apply_env_overrides(|k| {
                (k == "AZINFRA_ALLOW_PROD_DESTROY").then(|| "true".to_string())
            })
            .unwrap();
        assert!(settings.allow_prod_destroy);
    }

    #[test]
    fn test_overrides_from_dotenv_file() {
        let env = crate::generate::envfile::EnvFile::parse(
            "AZURE_SUBSCRIPTION_ID=22222222-0000-0000-0000-000000000000\nTF_WORKSPACE='dev-green'\n",
        )
        .unwrap();
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(|k| env.get(k).map(str::to_string))
            .unwrap();
        assert_eq!(
            settings.subscription_id.as_deref(),
            Some("22222222-0000-0000-0000-000000000000")
        );
        assert_eq!(settings.workspace_name(), "dev-green");
    }

    #[test]
    fn test_invalid_environment_override() {
        let mut settings = Settings::default();
        let result = settings.apply_env_overrides(|k| {
            (k == "AZINFRA_ENVIRONMENT").then(|| "qa".to_string())
        });
        assert!(matches!(result, Err(ConfigError::UnknownEnvironment(_))));
    }

    #[test]
    fn test_validate_rejects_bad_project_name() {
        let settings = Settings {
            project_name: "My Project".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_resolve_paths() {
        let mut settings = Settings {
            app_dir: PathBuf::from("app"),
            ..Settings::default()
        };
        settings.resolve_paths(Path::new("/work"));
        assert_eq!(settings.infra_dir, PathBuf::from("/work/infra"));
        assert_eq!(settings.env_file, PathBuf::from("/work/app/.env"));
        assert_eq!(
            settings.tfvars_path(),
            PathBuf::from("/work/infra/environments/dev.tfvars")
        );
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = Settings::load(Some(Path::new("nope.json")), dir.path());
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_default_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"{"location": "westeurope"}"#,
        )
        .unwrap();
        let settings = Settings::load(None, dir.path()).unwrap();
        assert_eq!(settings.location, "westeurope");
    }
}
