//! Remote state backend bootstrap.
//!
//! Creates the resource group, storage account and blob container that hold
//! Terraform state, grants the caller data-plane access to it, and points the
//! `backend "azurerm"` block in `providers.tf` at the result. Every step checks
//! for an existing resource first so the command can be re-run safely.

use crate::azure::cli::{AzureAccount, AzureCli};
use crate::config::Settings;
use crate::core::azinfra::AzInfra;
use crate::shared::fsutil;
use crate::shared::logging;
use crate::terraform::model::BackendConfig;
use crate::terraform::parser::TerraformParser;
use std::path::Path;
use tracing::info;

pub const STATE_CONTAINER: &str = "tfstate";
pub const STATE_DATA_ROLE: &str = "Storage Blob Data Contributor";
const STORAGE_ACCOUNT_MAX_LEN: usize = 24;
const SUFFIX_LEN: usize = 8;

/// Backend names derived from the project and subscription. The same inputs
/// always produce the same names.
pub fn derive_backend(project_name: &str, subscription_id: &str) -> BackendConfig {
    let suffix: String = subscription_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(SUFFIX_LEN)
        .collect();
    let compact: String = project_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(STORAGE_ACCOUNT_MAX_LEN - 2 - suffix.len())
        .collect();

    BackendConfig {
        resource_group_name: format!("rg-{}-tfstate", project_name),
        storage_account_name: format!("st{}{}", compact, suffix),
        container_name: STATE_CONTAINER.to_string(),
        key: format!("{}.tfstate", project_name),
    }
}

/// Storage account names: 3-24 characters, lowercase letters and digits.
pub fn is_valid_storage_account_name(name: &str) -> bool {
    (3..=STORAGE_ACCOUNT_MAX_LEN).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Replace the `backend "azurerm"` block in `content`, or add one to the
/// `terraform { }` block when none exists.
pub fn rewrite_backend_block(content: &str, backend: &BackendConfig) -> anyhow::Result<String> {
    let parser = TerraformParser::new(content.to_string());

    if let Some(span) = parser.backend_block_span() {
        let indent: String = content[span.start..]
            .chars()
            .take_while(|c| *c == ' ' || *c == '\t')
            .collect();
        let mut rewritten = String::with_capacity(content.len());
        rewritten.push_str(&content[..span.start]);
        rewritten.push_str(&backend.to_hcl_block(&indent));
        rewritten.push_str(&content[span.end..]);
        return Ok(rewritten);
    }

    let span = parser
        .terraform_block_span()
        .ok_or_else(|| anyhow::anyhow!("No `terraform {{ }}` block found to hold the backend configuration"))?;
    let close = span.end - 1;
    Ok(format!(
        "{}\n\n{}\n{}",
        content[..close].trim_end(),
        backend.to_hcl_block("  "),
        &content[close..]
    ))
}

/// Point `providers.tf` at `backend`. A `.bak` copy is kept. Returns whether the file changed.
pub fn write_backend_block(providers_tf: &Path, backend: &BackendConfig) -> anyhow::Result<bool> {
    let content = std::fs::read_to_string(providers_tf)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", providers_tf.display(), e))?;
    let rewritten = rewrite_backend_block(&content, backend)?;
    if rewritten == content {
        return Ok(false);
    }
    fsutil::backup_file(providers_tf, ".bak")?;
    fsutil::write_atomic(providers_tf, &rewritten)?;
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub backend: BackendConfig,
    pub created_group: bool,
    pub created_account: bool,
}

pub struct Bootstrapper<'a> {
    azure: &'a AzureCli,
    settings: &'a Settings,
    dry_run: bool,
}

impl<'a> Bootstrapper<'a> {
    pub fn new(azure: &'a AzureCli, settings: &'a Settings, dry_run: bool) -> Self {
        Self {
            azure,
            settings,
            dry_run,
        }
    }

    /// Backend from the settings, or derived from the subscription.
    pub fn backend_for(&self, account: &AzureAccount) -> BackendConfig {
        self.settings
            .backend
            .clone()
            .unwrap_or_else(|| derive_backend(&self.settings.project_name, &account.id))
    }

    /// Locate the state storage, creating whatever is missing.
    pub async fn ensure_backend(&self, account: &AzureAccount) -> anyhow::Result<BackendStatus> {
        let backend = self.backend_for(account);
        if !is_valid_storage_account_name(&backend.storage_account_name) {
            return Err(anyhow::anyhow!(
                "Invalid storage account name '{}': use 3-24 lowercase letters and digits",
                backend.storage_account_name
            ));
        }

        let group = &backend.resource_group_name;
        let created_group = if self.azure.group_exists(group).await? {
            info!(resource_group = %group, "state resource group exists");
            false
        } else {
            logging::info(&format!("Creating resource group {}", group));
            let tags = vec![
                ("purpose".to_string(), "terraform-state".to_string()),
                ("project".to_string(), self.settings.project_name.clone()),
            ];
            self.azure
                .group_create(group, &self.settings.location, &tags)
                .await?;
            true
        };

        let account_name = &backend.storage_account_name;
        let created_account = if !created_group
            && self.azure.storage_account_exists(account_name, group).await?
        {
            info!(storage_account = %account_name, "state storage account exists");
            false
        } else {
            logging::info(&format!("Creating storage account {}", account_name));
            self.azure
                .storage_account_create(account_name, group, &self.settings.location)
                .await?;
            true
        };

        if self.dry_run && created_account {
            logging::info("Dry run: skipping container and role assignment for the new storage account");
        } else {
            self.grant_state_access(account, &backend).await?;
            self.azure
                .storage_container_create(&backend.container_name, account_name)
                .await?;
        }

        Ok(BackendStatus {
            backend,
            created_group,
            created_account,
        })
    }

    async fn grant_state_access(
        &self,
        account: &AzureAccount,
        backend: &BackendConfig,
    ) -> anyhow::Result<()> {
        let principal = self.azure.principal_id(account).await?;
        let scope = self
            .azure
            .storage_account_id(&backend.storage_account_name, &backend.resource_group_name)
            .await?;
        self.azure
            .role_assignment_create(&principal, STATE_DATA_ROLE, &scope)
            .await?;
        Ok(())
    }
}

/// `azinfra bootstrap`: create the state storage, then point `providers.tf` at it
/// unless `rewrite` is off.
pub async fn bootstrap(azinfra: &AzInfra, rewrite: bool) -> anyhow::Result<BackendStatus> {
    let azure = azinfra.azure()?;
    let account = azinfra.azure_account(&azure).await?;
    logging::info(&format!("Subscription: {} ({})", account.name, account.id));

    let status = Bootstrapper::new(&azure, &azinfra.settings, azinfra.dry_run)
        .ensure_backend(&account)
        .await?;
    let providers_tf = azinfra.settings.infra_dir.join("providers.tf");

    if !rewrite {
        logging::info("Leaving providers.tf unchanged (--no-rewrite)");
    } else if azinfra.dry_run {
        println!(
            "[dry-run] would write backend block to {}:\n{}",
            providers_tf.display(),
            status.backend.to_hcl_block("  ")
        );
    } else if write_backend_block(&providers_tf, &status.backend)? {
        logging::success(&format!("Updated backend block in {}", providers_tf.display()));
    } else {
        logging::info("providers.tf already points at the state backend");
    }

    for (key, value) in status.backend.pairs() {
        println!("{:<20} = {}", key, value);
    }
    Ok(status)
}
