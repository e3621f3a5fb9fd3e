//! Turn Terraform outputs into the application's `.env` file.

use crate::core::azinfra::AzInfra;
use crate::generate::envfile::{validate_env, EnvFile, EnvValidation};
use crate::shared::logging;
use crate::shared::process::ToolCommand;
use chrono::Local;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct SetupEnvOptions {
    /// Defaults to the configured `env_file`.
    pub output: Option<PathBuf>,
    pub skip_validation: bool,
    pub health_check: bool,
}

#[derive(Debug, Clone)]
pub struct SetupEnvReport {
    pub path: PathBuf,
    pub written: bool,
    pub skipped: Vec<&'static str>,
    pub validation: EnvValidation,
    pub health_check_passed: Option<bool>,
}

pub async fn setup_env(azinfra: &AzInfra, options: &SetupEnvOptions) -> anyhow::Result<SetupEnvReport> {
    let settings = &azinfra.settings;
    let terraform = azinfra.terraform()?;
    azinfra.select_existing_workspace(&terraform).await?;

    let outputs = terraform.outputs().await?;
    if outputs.is_empty() {
        return Err(anyhow::anyhow!(
            "No Terraform outputs found for {}; run `azinfra deploy {}` first",
            settings.environment,
            settings.environment
        ));
    }

    // The az login is optional here; overrides alone can fill the identity
    let account = match azinfra.azure() {
        Ok(azure) => azure.account_show().await.ok(),
        Err(_) => None,
    };
    let extras = azinfra.identity_entries(account.as_ref());

    let mut mapped = EnvFile::from_outputs(&outputs, &extras);
    mapped.env = mapped.env.with_header(settings.environment, Local::now());
    for key in &mapped.skipped {
        logging::warn(&format!("{} skipped: its Terraform output is missing or null", key));
    }

    let path = options
        .output
        .clone()
        .unwrap_or_else(|| settings.env_file.clone());
    let written = if azinfra.dry_run {
        println!("[dry-run] would write {}:", path.display());
        print!("{}", mapped.env.render());
        false
    } else {
        mapped.env.write(&path)?;
        info!(path = %path.display(), entries = mapped.env.entries().len(), "wrote env file");
        logging::success(&format!("Wrote {}", path.display()));
        true
    };

    // Validate what the application will actually read
    let validation = if written {
        validate_env(&EnvFile::read(&path)?)
    } else {
        validate_env(&mapped.env)
    };
    if !validation.is_ok() {
        let problems = validation.problems().join("; ");
        if !options.skip_validation {
            return Err(anyhow::anyhow!("Generated environment is incomplete: {}", problems));
        }
        logging::warn(&format!("Validation skipped: {}", problems));
    }

    let health_check_passed = if options.health_check {
        Some(run_health_check(azinfra, &mapped.env).await?)
    } else {
        None
    };

    Ok(SetupEnvReport {
        path,
        written,
        skipped: mapped.skipped,
        validation,
        health_check_passed,
    })
}

/// Run the configured health command in the application directory with the
/// `.env` values in its environment. A non-zero exit is an error.
pub async fn run_health_check(azinfra: &AzInfra, env: &EnvFile) -> anyhow::Result<bool> {
    let settings = &azinfra.settings;
    let (program, args) = settings
        .health_check_command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("health_check_command is empty"))?;

    let mut cmd = ToolCommand::new(program)
        .args(args.iter().cloned())
        .current_dir(&settings.app_dir)
        .streaming();
    for (key, value) in env.entries() {
        cmd = cmd.env(key.clone(), value.clone());
    }

    logging::info(&format!("Running health check: {}", cmd.display()));
    let output = azinfra.runner().run(&cmd).await?;
    if !output.success() {
        return Err(anyhow::anyhow!(
            "Health check `{}` failed with exit code {}",
            cmd.display(),
            output
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
    }
    logging::success("Health check passed");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::core::azinfra::Toolchain;
    use crate::shared::audit::AuditLog;
    use crate::shared::process::{ScriptedRunner, ToolOutput};
    use crate::shared::prompt::ScriptedPrompter;
    use std::sync::Arc;
    use tempfile::TempDir;

    const OUTPUTS: &str = r#"{
  "openai_endpoint": {"sensitive": false, "type": "string", "value": "https://oai-aoai-dev.openai.azure.com/"},
  "openai_deployment_name": {"sensitive": false, "type": "string", "value": "gpt-4o"},
  "key_vault_uri": {"sensitive": false, "type": "string", "value": "https://kv-aoai-dev.vault.azure.net/"},
  "resource_group_name": {"sensitive": false, "type": "string", "value": "rg-aoai-dev"}
}"#;

    fn azinfra(dir: &TempDir, runner: Arc<ScriptedRunner>) -> AzInfra {
        let mut settings = Settings::default();
        settings.resolve_paths(dir.path());
        let tools = Toolchain {
            terraform: Some(PathBuf::from("terraform")),
            az: None,
        };
        AzInfra::new(settings, tools, runner, Arc::new(ScriptedPrompter::default()))
            .with_audit_log(AuditLog::new(None))
    }

    fn runner(outputs: &str) -> ScriptedRunner {
        ScriptedRunner::new()
            .on("terraform", "workspace list", ToolOutput::ok("  default\n* dev\n"))
            .on("terraform", "output -json", ToolOutput::ok(outputs))
    }

    #[tokio::test]
    async fn test_writes_env_and_runs_health_check() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(runner(OUTPUTS));
        let infra = azinfra(&dir, runner.clone());

        let options = SetupEnvOptions {
            health_check: true,
            ..Default::default()
        };
        let report = setup_env(&infra, &options).await.unwrap();

        assert!(report.written);
        assert!(report.validation.is_ok());
        assert_eq!(report.health_check_passed, Some(true));
        let env = EnvFile::read(&dir.path().join(".env")).unwrap();
        assert_eq!(env.get("AZURE_RESOURCE_GROUP"), Some("rg-aoai-dev"));

        let health = runner
            .invocations()
            .into_iter()
            .find(|c| c.program_name() == "python")
            .unwrap();
        assert_eq!(health.args, vec!["-m", "aoai_cli", "health"]);
        assert_eq!(health.cwd.as_deref(), Some(dir.path()));
        assert!(health
            .env
            .contains(&("AZURE_OPENAI_DEPLOYMENT_NAME".to_string(), "gpt-4o".to_string())));
    }

    #[tokio::test]
    async fn test_missing_critical_output_fails_unless_skipped() {
        let dir = TempDir::new().unwrap();
        let partial = r#"{"openai_endpoint": {"sensitive": false, "type": "string", "value": "https://x/"}}"#;

        let infra = azinfra(&dir, Arc::new(runner(partial)));
        let err = setup_env(&infra, &SetupEnvOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("AZURE_RESOURCE_GROUP"));

        let options = SetupEnvOptions {
            skip_validation: true,
            ..Default::default()
        };
        let report = setup_env(&infra, &options).await.unwrap();
        assert!(!report.validation.is_ok());
        assert!(dir.path().join(".env.backup").exists());
    }

    #[tokio::test]
    async fn test_missing_workspace_and_empty_outputs() {
        let dir = TempDir::new().unwrap();
        let no_workspace = ScriptedRunner::new()
            .on("terraform", "workspace list", ToolOutput::ok("* default\n"));
        let err = setup_env(&azinfra(&dir, Arc::new(no_workspace)), &SetupEnvOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("workspace 'dev' does not exist"));

        let err = setup_env(&azinfra(&dir, Arc::new(runner("{}"))), &SetupEnvOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No Terraform outputs found"));
    }

    #[tokio::test]
    async fn test_failing_health_check() {
        let dir = TempDir::new().unwrap();
        let runner = runner(OUTPUTS).on("python", "", ToolOutput::failed(3, ""));
        let infra = azinfra(&dir, Arc::new(runner));
        let options = SetupEnvOptions {
            health_check: true,
            ..Default::default()
        };
        let err = setup_env(&infra, &options).await.unwrap_err();
        assert!(err.to_string().contains("exit code 3"));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_env_untouched() {
        let dir = TempDir::new().unwrap();
        let infra = azinfra(&dir, Arc::new(runner(OUTPUTS))).with_dry_run(true);
        let report = setup_env(&infra, &SetupEnvOptions::default())
            .await
            .unwrap();
        assert!(!report.written);
        assert!(!dir.path().join(".env").exists());
    }
}
