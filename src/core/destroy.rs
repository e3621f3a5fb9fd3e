//! Guarded teardown of one environment.

use crate::config::Settings;
use crate::core::azinfra::AzInfra;
use crate::core::bootstrap::Bootstrapper;
use crate::generate::tfvars::TfVars;
use crate::shared::audit::{AuditLogEntry, AuditOutcome};
use crate::shared::logging;
use crate::shared::prompt::{confirm_exact, Prompter};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Destroy cancelled: {0}")]
    Declined(&'static str),

    #[error(transparent)]
    Input(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    pub force: bool,
    /// Also remove `.terraform/` and the provider lock file.
    pub purge: bool,
    /// Use the backend configured in `providers.tf`, as `deploy --skip-backend` does.
    pub skip_backend: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    Destroyed { removed: Vec<PathBuf> },
    Declined,
}

/// Confirmation steps: `yes`, then the environment name, then for protected
/// environments the project name. `force` skips them for unprotected
/// environments, and for protected ones only when prod destroys are allowed.
pub fn confirm_destroy(
    prompter: &dyn Prompter,
    settings: &Settings,
    force: bool,
) -> Result<(), GuardError> {
    let environment = settings.environment;
    if force {
        if !environment.is_protected() || settings.allow_prod_destroy {
            logging::warn(&format!("Skipping confirmation for {} (--force)", environment));
            return Ok(());
        }
        logging::warn(&format!(
            "--force ignored for protected environment {}: set AZINFRA_ALLOW_PROD_DESTROY=true to skip confirmation",
            environment
        ));
    }

    eprintln!(
        "This permanently deletes every resource in the {} environment of {}.",
        environment, settings.project_name
    );
    if !confirm_exact(prompter, "Type 'yes' to continue:", "yes")? {
        return Err(GuardError::Declined("'yes' was not entered"));
    }
    if !confirm_exact(
        prompter,
        &format!("Type the environment name ({}) to confirm:", environment),
        environment.as_str(),
    )? {
        return Err(GuardError::Declined("environment name did not match"));
    }
    if environment.is_protected()
        && !confirm_exact(
            prompter,
            &format!(
                "{} is protected. Type the project name ({}) to confirm:",
                environment, settings.project_name
            ),
            &settings.project_name,
        )?
    {
        return Err(GuardError::Declined("project name did not match"));
    }
    Ok(())
}

/// Local files a destroy leaves behind.
pub fn cleanup_targets(settings: &Settings, purge: bool) -> Vec<PathBuf> {
    let mut env_backup = settings.env_file.as_os_str().to_os_string();
    env_backup.push(".backup");

    let mut targets = vec![
        settings.tfvars_path(),
        settings.plan_path(),
        settings.env_file.clone(),
        PathBuf::from(env_backup),
    ];
    if purge {
        targets.push(settings.infra_dir.join(".terraform"));
        targets.push(settings.infra_dir.join(".terraform.lock.hcl"));
    }
    targets
}

/// Remove whatever of `targets` exists. Returns what was removed.
pub fn remove_paths(targets: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in targets {
        if path.is_dir() {
            std::fs::remove_dir_all(path)
                .map_err(|e| anyhow::anyhow!("Failed to remove {}: {}", path.display(), e))?;
        } else if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to remove {}: {}", path.display(), e))?;
        } else {
            continue;
        }
        removed.push(path.clone());
    }
    Ok(removed)
}

pub async fn destroy(azinfra: &AzInfra, options: &DestroyOptions) -> anyhow::Result<DestroyOutcome> {
    let settings = &azinfra.settings;
    let mut entry = AuditLogEntry::new(
        "destroy",
        settings.environment.as_str(),
        &settings.infra_dir,
        AuditOutcome::Aborted,
    );
    entry.dry_run = azinfra.dry_run;
    entry.subscription_id = settings.subscription_id.clone();

    match confirm_destroy(azinfra.prompter(), settings, options.force) {
        Ok(()) => {}
        Err(GuardError::Declined(reason)) => {
            entry.error = Some(reason.to_string());
            azinfra.audit().record(&entry);
            logging::warn(&format!("Destroy cancelled: {}", reason));
            return Ok(DestroyOutcome::Declined);
        }
        Err(GuardError::Input(e)) => {
            entry.error = Some(e.to_string());
            azinfra.audit().record(&entry);
            return Err(e);
        }
    }

    let result = run_destroy(azinfra, options, &mut entry).await;
    match &result {
        Ok(_) => entry.outcome = AuditOutcome::Succeeded,
        Err(e) => {
            entry.outcome = AuditOutcome::Failed;
            entry.error = Some(e.to_string());
        }
    }
    azinfra.audit().record(&entry);
    result
}

async fn run_destroy(
    azinfra: &AzInfra,
    options: &DestroyOptions,
    entry: &mut AuditLogEntry,
) -> anyhow::Result<DestroyOutcome> {
    let settings = &azinfra.settings;
    let terraform = azinfra.terraform()?;
    let azure = azinfra.azure()?;
    let account = azinfra.azure_account(&azure).await?;
    entry.subscription_id = Some(account.id.clone());

    let backend = if options.skip_backend {
        settings.backend.clone()
    } else {
        Some(Bootstrapper::new(&azure, settings, azinfra.dry_run).backend_for(&account))
    };

    let tfvars_path = settings.tfvars_path();
    if !tfvars_path.exists() {
        logging::info(&format!("Regenerating {}", tfvars_path.display()));
        TfVars::from_settings(settings, &account.id).write(&tfvars_path)?;
    }

    terraform.init(backend.as_ref(), backend.is_some()).await?;
    azinfra.select_existing_workspace(&terraform).await?;

    logging::info(&format!("Destroying {}", settings.environment));
    terraform.destroy(&tfvars_path).await?;

    if azinfra.dry_run {
        for path in cleanup_targets(settings, options.purge) {
            println!("[dry-run] would remove {}", path.display());
        }
        return Ok(DestroyOutcome::Destroyed {
            removed: Vec::new(),
        });
    }

    let removed = remove_paths(&cleanup_targets(settings, options.purge))?;
    for path in &removed {
        info!(path = %path.display(), "removed");
    }
    logging::success(&format!("Destroyed {}", settings.environment));
    Ok(DestroyOutcome::Destroyed { removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::shared::prompt::ScriptedPrompter;
    use tempfile::TempDir;

    fn prod() -> Settings {
        Settings {
            environment: Environment::Prod,
            ..Settings::default()
        }
    }

    #[test]
    fn test_three_step_confirmation_for_prod() {
        let prompter = ScriptedPrompter::new(["yes", "prod", "aoai"]);
        confirm_destroy(&prompter, &prod(), false).unwrap();
        assert_eq!(prompter.questions().len(), 3);

        let prompter = ScriptedPrompter::new(["yes", "prod", "other"]);
        assert!(matches!(
            confirm_destroy(&prompter, &prod(), false),
            Err(GuardError::Declined("project name did not match"))
        ));
    }

    #[test]
    fn test_two_steps_for_dev() {
        let prompter = ScriptedPrompter::new(["yes", "dev"]);
        confirm_destroy(&prompter, &Settings::default(), false).unwrap();
        assert_eq!(prompter.questions().len(), 2);

        let prompter = ScriptedPrompter::new(["y"]);
        assert!(matches!(
            confirm_destroy(&prompter, &Settings::default(), false),
            Err(GuardError::Declined(_))
        ));
    }

    #[test]
    fn test_force_rules() {
        let prompter = ScriptedPrompter::default();
        confirm_destroy(&prompter, &Settings::default(), true).unwrap();
        assert!(prompter.questions().is_empty());

        // Protected without the override still prompts
        let prompter = ScriptedPrompter::default();
        assert!(matches!(
            confirm_destroy(&prompter, &prod(), true),
            Err(GuardError::Input(_))
        ));
        assert_eq!(prompter.questions().len(), 1);

        let allowed = Settings {
            allow_prod_destroy: true,
            ..prod()
        };
        let prompter = ScriptedPrompter::default();
        confirm_destroy(&prompter, &allowed, true).unwrap();
        assert!(prompter.questions().is_empty());
    }

    #[test]
    fn test_config_file_cannot_waive_prod_prompts() {
        let mut settings =
            Settings::from_json(r#"{"environment": "prod", "allow_prod_destroy": true}"#).unwrap();
        settings.apply_env_overrides(|_| None).unwrap();

        let prompter = ScriptedPrompter::default();
        assert!(confirm_destroy(&prompter, &settings, true).is_err());
        assert_eq!(prompter.questions().len(), 1);
    }

    #[test]
    fn test_cleanup_targets_and_removal() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.resolve_paths(dir.path());

        std::fs::create_dir_all(settings.infra_dir.join(".terraform").join("providers")).unwrap();
        std::fs::create_dir_all(settings.infra_dir.join("environments")).unwrap();
        std::fs::write(settings.tfvars_path(), "").unwrap();
        std::fs::write(&settings.env_file, "A=1\n").unwrap();

        let targets = cleanup_targets(&settings, false);
        assert_eq!(targets.len(), 4);
        assert!(targets[3].ends_with(".env.backup"));

        let removed = remove_paths(&cleanup_targets(&settings, true)).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!settings.infra_dir.join(".terraform").exists());
        assert!(!settings.env_file.exists());
    }
}
