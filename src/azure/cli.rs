//! Wrapper around the `az` command line.

use crate::shared::process::{CommandRunner, ProcessError, ToolCommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AzureError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Not logged in to Azure. Run `az login` first. ({0})")]
    NotLoggedIn(String),

    #[error("Invalid JSON output from `az {command}`: {source}")]
    JsonParseError {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected output from `az {command}`: {detail}")]
    UnexpectedOutput { command: &'static str, detail: String },
}

pub type AzureResult<T> = Result<T, AzureError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureAccount {
    /// Subscription id
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub user: Option<AzureUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AzureUser {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AzureAccount {
    pub fn is_service_principal(&self) -> bool {
        self.user
            .as_ref()
            .is_some_and(|u| u.kind.eq_ignore_ascii_case("servicePrincipal"))
    }
}

pub struct AzureCli {
    runner: Arc<dyn CommandRunner>,
    az_path: PathBuf,
}

impl AzureCli {
    pub fn new(runner: Arc<dyn CommandRunner>, az_path: PathBuf) -> Self {
        Self { runner, az_path }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.az_path)
    }

    pub async fn account_show(&self) -> AzureResult<AzureAccount> {
        let cmd = self.command().args(["account", "show", "--output", "json"]);
        let output = self.runner.run(&cmd).await?;
        if !output.success() {
            return Err(AzureError::NotLoggedIn(output.stderr.trim().to_string()));
        }
        serde_json::from_str(&output.stdout).map_err(|source| AzureError::JsonParseError {
            command: "account show",
            source,
        })
    }

    pub async fn set_subscription(&self, subscription_id: &str) -> AzureResult<()> {
        let cmd = self
            .command()
            .args(["account", "set", "--subscription", subscription_id]);
        self.runner.run_checked(&cmd).await?;
        info!(subscription = subscription_id, "selected subscription");
        Ok(())
    }

    /// Object id of the caller, used as the assignee for data-plane roles.
    pub async fn principal_id(&self, account: &AzureAccount) -> AzureResult<String> {
        let cmd = if account.is_service_principal() {
            let app_id = account
                .user
                .as_ref()
                .map(|u| u.name.clone())
                .unwrap_or_default();
            self.command().args([
                "ad",
                "sp",
                "show",
                "--id",
                app_id.as_str(),
                "--query",
                "id",
                "--output",
                "tsv",
            ])
        } else {
            self.command().args([
                "ad",
                "signed-in-user",
                "show",
                "--query",
                "id",
                "--output",
                "tsv",
            ])
        };
        let output = self.runner.run_checked(&cmd).await?;
        non_empty_line(&output.stdout, "ad show")
    }

    pub async fn group_exists(&self, name: &str) -> AzureResult<bool> {
        let cmd = self.command().args(["group", "exists", "--name", name]);
        let output = self.runner.run_checked(&cmd).await?;
        match output.stdout.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(AzureError::UnexpectedOutput {
                command: "group exists",
                detail: other.to_string(),
            }),
        }
    }

    pub async fn group_create(
        &self,
        name: &str,
        location: &str,
        tags: &[(String, String)],
    ) -> AzureResult<()> {
        let mut cmd = self
            .command()
            .args(["group", "create", "--name", name, "--location", location])
            .mutating();
        if !tags.is_empty() {
            cmd = cmd
                .arg("--tags")
                .args(tags.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        self.runner
            .run_checked(&cmd.args(["--output", "none"]))
            .await?;
        info!(resource_group = name, "created resource group");
        Ok(())
    }

    pub async fn storage_account_exists(&self, name: &str, resource_group: &str) -> AzureResult<bool> {
        let cmd = self.command().args([
            "storage",
            "account",
            "show",
            "--name",
            name,
            "--resource-group",
            resource_group,
            "--output",
            "none",
        ]);
        let output = self.runner.run(&cmd).await?;
        if output.success() {
            return Ok(true);
        }
        if output.stderr.contains("ResourceNotFound")
            || output.stderr.contains("ResourceGroupNotFound")
            || output.stderr.contains("was not found")
        {
            debug!(storage_account = name, "storage account not found");
            return Ok(false);
        }
        Err(ProcessError::Failed {
            command: cmd.display(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        }
        .into())
    }

    pub async fn storage_account_create(
        &self,
        name: &str,
        resource_group: &str,
        location: &str,
    ) -> AzureResult<()> {
        let cmd = self
            .command()
            .args([
                "storage",
                "account",
                "create",
                "--name",
                name,
                "--resource-group",
                resource_group,
                "--location",
                location,
                "--sku",
                "Standard_LRS",
                "--kind",
                "StorageV2",
                "--min-tls-version",
                "TLS1_2",
                "--allow-blob-public-access",
                "false",
                "--output",
                "none",
            ])
            .mutating();
        self.runner.run_checked(&cmd).await?;
        info!(storage_account = name, "created storage account");
        Ok(())
    }

    pub async fn storage_account_id(&self, name: &str, resource_group: &str) -> AzureResult<String> {
        let cmd = self.command().args([
            "storage",
            "account",
            "show",
            "--name",
            name,
            "--resource-group",
            resource_group,
            "--query",
            "id",
            "--output",
            "tsv",
        ]);
        let output = self.runner.run_checked(&cmd).await?;
        non_empty_line(&output.stdout, "storage account show")
    }

    /// Idempotent in az: an existing container is reported as `created: false`.
    /// Uses the account key so it does not wait on data-plane role propagation.
    pub async fn storage_container_create(&self, name: &str, account: &str) -> AzureResult<()> {
        let cmd = self
            .command()
            .args([
                "storage",
                "container",
                "create",
                "--name",
                name,
                "--account-name",
                account,
                "--auth-mode",
                "key",
                "--output",
                "none",
            ])
            .mutating();
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }

    pub async fn role_assignment_create(
        &self,
        assignee_object_id: &str,
        role: &str,
        scope: &str,
    ) -> AzureResult<()> {
        let cmd = self
            .command()
            .args([
                "role",
                "assignment",
                "create",
                "--assignee-object-id",
                assignee_object_id,
                "--role",
                role,
                "--scope",
                scope,
                "--output",
                "none",
            ])
            .mutating();
        let output = self.runner.run(&cmd).await?;
        if !output.success() && output.stderr.contains("already exists") {
            debug!(role, scope, "role assignment already exists");
            return Ok(());
        }
        output.ensure_success(&cmd)?;
        Ok(())
    }
}

fn non_empty_line(stdout: &str, command: &'static str) -> AzureResult<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or(AzureError::UnexpectedOutput {
            command,
            detail: "empty output".to_string(),
        })
}
