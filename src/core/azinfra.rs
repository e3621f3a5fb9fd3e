use crate::azure::cli::{AzureAccount, AzureCli};
use crate::config::Settings;
use crate::shared::audit::AuditLog;
use crate::shared::logging;
use crate::shared::process::{CommandRunner, DryRunRunner, SystemRunner};
use crate::shared::prompt::{Prompter, StdinPrompter};
use crate::terraform::service::TerraformService;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AzInfraError {
    #[error("Terraform binary '{0}' not found. Install Terraform >= 1.5 or set TERRAFORM_BINARY_NAME")]
    TerraformNotFound(String),

    #[error("Azure CLI '{0}' not found. Install it from https://aka.ms/azure-cli")]
    AzureCliNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Locations of the external binaries. A missing binary only fails the
/// commands that need it.
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    pub terraform: Option<PathBuf>,
    pub az: Option<PathBuf>,
}

impl Toolchain {
    /// Resolve binaries from the settings, falling back to `PATH`.
    pub fn discover(settings: &Settings) -> Self {
        let terraform_binary =
            std::env::var("TERRAFORM_BINARY_NAME").unwrap_or_else(|_| "terraform".to_string());
        Self {
            terraform: resolve_binary(settings.terraform_path.as_deref(), &terraform_binary),
            az: resolve_binary(settings.az_path.as_deref(), "az"),
        }
    }

    pub fn require_terraform(&self) -> Result<&Path, AzInfraError> {
        self.terraform.as_deref().ok_or_else(|| {
            AzInfraError::TerraformNotFound(
                std::env::var("TERRAFORM_BINARY_NAME").unwrap_or_else(|_| "terraform".to_string()),
            )
        })
    }

    pub fn require_az(&self) -> Result<&Path, AzInfraError> {
        self.az
            .as_deref()
            .ok_or_else(|| AzInfraError::AzureCliNotFound("az".to_string()))
    }
}

fn resolve_binary(configured: Option<&Path>, name: &str) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            tracing::debug!(path = %path.display(), "using configured binary");
            return Some(path.to_path_buf());
        }
        logging::warn(&format!(
            "Configured binary {} does not exist, searching PATH for '{}'",
            path.display(),
            name
        ));
    }
    match which::which(name) {
        Ok(path) => {
            tracing::debug!(binary = name, path = %path.display(), "found binary in PATH");
            Some(path)
        }
        Err(_) => None,
    }
}

/// Everything a command needs: settings, binaries, the runner every external
/// call goes through, the confirmation source and the audit log.
pub struct AzInfra {
    pub settings: Settings,
    pub tools: Toolchain,
    pub dry_run: bool,
    /// `TF_WORKSPACE` is set in the process environment; Terraform selects
    /// the workspace itself and `workspace select` would be refused.
    pub workspace_from_env: bool,
    runner: Arc<dyn CommandRunner>,
    prompter: Arc<dyn Prompter>,
    audit: AuditLog,
}

impl AzInfra {
    pub fn new(
        settings: Settings,
        tools: Toolchain,
        runner: Arc<dyn CommandRunner>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        let audit = AuditLog::new(settings.audit_log_path());
        Self {
            settings,
            tools,
            dry_run: false,
            workspace_from_env: false,
            runner,
            prompter,
            audit,
        }
    }

    /// Real binaries, real terminal. Under `dry_run`, mutating commands are
    /// printed instead of executed.
    pub fn from_system(settings: Settings, dry_run: bool) -> Self {
        let tools = Toolchain::discover(&settings);
        let runner: Arc<dyn CommandRunner> = if dry_run {
            Arc::new(DryRunRunner::new(SystemRunner))
        } else {
            Arc::new(SystemRunner)
        };
        let mut azinfra = Self::new(settings, tools, runner, Arc::new(StdinPrompter));
        azinfra.dry_run = dry_run;
        azinfra.workspace_from_env = std::env::var_os("TF_WORKSPACE").is_some();
        azinfra
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    pub fn prompter(&self) -> &dyn Prompter {
        self.prompter.as_ref()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn terraform(&self) -> Result<TerraformService, AzInfraError> {
        let path = self.tools.require_terraform()?;
        Ok(TerraformService::new(
            self.runner(),
            path.to_path_buf(),
            self.settings.infra_dir.clone(),
        ))
    }

    /// Terraform when it is installed; static validation works without it.
    pub fn terraform_if_available(&self) -> Option<TerraformService> {
        self.terraform().ok()
    }

    pub fn azure(&self) -> Result<AzureCli, AzInfraError> {
        let path = self.tools.require_az()?;
        Ok(AzureCli::new(self.runner(), path.to_path_buf()))
    }

    /// Check the Azure login and apply the subscription override.
    pub async fn azure_account(&self, azure: &AzureCli) -> anyhow::Result<AzureAccount> {
        let account = azure.account_show().await?;
        match &self.settings.subscription_id {
            Some(id) if *id != account.id => {
                logging::info(&format!("Switching to subscription {}", id));
                azure.set_subscription(id).await?;
                Ok(azure.account_show().await?)
            }
            _ => Ok(account),
        }
    }

    /// Select the environment's workspace for read-only commands. Unlike
    /// deploy, a missing workspace is an error rather than created.
    pub async fn select_existing_workspace(&self, terraform: &TerraformService) -> anyhow::Result<()> {
        if self.workspace_from_env {
            return Ok(());
        }
        let name = self.settings.workspace_name();
        let workspaces = terraform.list_workspaces().await?;
        match workspaces.iter().find(|w| w.name == name) {
            Some(w) if w.current => Ok(()),
            Some(_) => {
                terraform.ensure_workspace(&name).await?;
                Ok(())
            }
            None => Err(anyhow::anyhow!(
                "Terraform workspace '{}' does not exist; deploy the {} environment first",
                name,
                self.settings.environment
            )),
        }
    }

    /// Extra `.env` entries taken from the Azure account or the overrides.
    pub fn identity_entries(&self, account: Option<&AzureAccount>) -> Vec<(String, String)> {
        let subscription = self
            .settings
            .subscription_id
            .clone()
            .or_else(|| account.map(|a| a.id.clone()));
        let tenant = self
            .settings
            .tenant_id
            .clone()
            .or_else(|| account.map(|a| a.tenant_id.clone()));

        let mut entries = Vec::new();
        if let Some(id) = subscription {
            entries.push(("AZURE_SUBSCRIPTION_ID".to_string(), id));
        }
        if let Some(id) = tenant {
            entries.push(("AZURE_TENANT_ID".to_string(), id));
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::process::{ScriptedRunner, ToolOutput};
    use crate::shared::prompt::ScriptedPrompter;

    const ACCOUNT: &str = r#"{"id":"sub-a","tenantId":"tenant-a","name":"Dev","user":{"name":"me@example.com","type":"user"}}"#;

    fn azinfra(settings: Settings, runner: Arc<ScriptedRunner>) -> AzInfra {
        let tools = Toolchain {
            terraform: Some(PathBuf::from("terraform")),
            az: Some(PathBuf::from("az")),
        };
        AzInfra::new(
            settings,
            tools,
            runner,
            Arc::new(ScriptedPrompter::default()),
        )
        .with_audit_log(AuditLog::new(None))
    }

    #[test]
    fn test_missing_binaries_are_reported() {
        let tools = Toolchain::default();
        assert!(matches!(
            tools.require_az(),
            Err(AzInfraError::AzureCliNotFound(_))
        ));
        assert!(matches!(
            tools.require_terraform(),
            Err(AzInfraError::TerraformNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_override_switches_account() {
        let mut settings = Settings::default();
        settings.subscription_id = Some("sub-b".to_string());
        let runner =
            Arc::new(ScriptedRunner::new().on("az", "account show", ToolOutput::ok(ACCOUNT)));
        let azinfra = azinfra(settings, runner.clone());

        let azure = azinfra.azure().unwrap();
        azinfra.azure_account(&azure).await.unwrap();
        assert_eq!(
            runner.commands(),
            vec![
                "az account show --output json",
                "az account set --subscription sub-b",
                "az account show --output json",
            ]
        );

        let entries = azinfra.identity_entries(None);
        assert_eq!(
            entries,
            vec![("AZURE_SUBSCRIPTION_ID".to_string(), "sub-b".to_string())]
        );
    }

    #[test]
    fn test_identity_entries_from_account() {
        let azinfra = azinfra(Settings::default(), Arc::new(ScriptedRunner::new()));
        let account: AzureAccount = serde_json::from_str(ACCOUNT).unwrap();
        assert_eq!(
            azinfra.identity_entries(Some(&account)),
            vec![
                ("AZURE_SUBSCRIPTION_ID".to_string(), "sub-a".to_string()),
                ("AZURE_TENANT_ID".to_string(), "tenant-a".to_string()),
            ]
        );
    }
}
