use crate::shared::process::{CommandRunner, ProcessError, ToolCommand};
use crate::terraform::model::{BackendConfig, PlanOutcome, TerraformValidateOutput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TerraformError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Invalid JSON output from `terraform {command}`: {source}")]
    JsonParseError {
        command: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Terraform initialization required. Run `terraform init` first: {0}")]
    InitRequired(String),

    #[error("Terraform plan failed with exit code {0:?}")]
    PlanFailed(Option<i32>),

    #[error("Unexpected output from `terraform {command}`: {detail}")]
    UnexpectedOutput { command: &'static str, detail: String },
}

pub type TerraformResult<T> = Result<T, TerraformError>;

/// Runs terraform subcommands against one configuration directory.
pub struct TerraformService {
    runner: Arc<dyn CommandRunner>,
    terraform_path: PathBuf,
    project_directory: PathBuf,
}

impl TerraformService {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        terraform_path: PathBuf,
        project_directory: PathBuf,
    ) -> Self {
        debug!(
            terraform = %terraform_path.display(),
            project = %project_directory.display(),
            "TerraformService initialized"
        );
        Self {
            runner,
            terraform_path,
            project_directory,
        }
    }

    pub fn project_directory(&self) -> &Path {
        &self.project_directory
    }

    pub(crate) fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// A `terraform` invocation rooted in the project directory.
    pub(crate) fn command(&self) -> ToolCommand {
        ToolCommand::new(&self.terraform_path).current_dir(&self.project_directory)
    }

    pub async fn version(&self) -> TerraformResult<String> {
        let cmd = self.command().args(["version", "-json"]);
        let output = self.runner.run_checked(&cmd).await?;

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&output.stdout) {
            if let Some(version) = json.get("terraform_version").and_then(|v| v.as_str()) {
                return Ok(version.to_string());
            }
        }

        // Pre-0.13 binaries ignore -json
        Ok(output
            .stdout
            .lines()
            .find(|line| line.starts_with("Terraform") || line.starts_with("OpenTofu"))
            .unwrap_or("Unknown version")
            .to_string())
    }

    pub async fn init(
        &self,
        backend: Option<&BackendConfig>,
        reconfigure: bool,
    ) -> TerraformResult<()> {
        let mut cmd = self.command().args(["init", "-input=false"]).streaming();
        if reconfigure {
            cmd = cmd.arg("-reconfigure");
        }
        if let Some(backend) = backend {
            cmd = cmd.args(backend.init_args());
        }
        info!(command = %cmd.display(), "initializing terraform");
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }

    pub async fn validate(&self) -> TerraformResult<TerraformValidateOutput> {
        let cmd = self.command().args(["validate", "-json"]);
        // Exit code 1 still carries the JSON diagnostics
        let output = self.runner.run(&cmd).await?;

        if output.stdout.trim().is_empty() {
            if output.stderr.contains("terraform init") {
                return Err(TerraformError::InitRequired(output.stderr.trim().to_string()));
            }
            output.ensure_success(&cmd)?;
            return Err(TerraformError::UnexpectedOutput {
                command: "validate",
                detail: "empty output".to_string(),
            });
        }

        serde_json::from_str(&output.stdout).map_err(|source| TerraformError::JsonParseError {
            command: "validate",
            source,
        })
    }

    /// `terraform plan` writing a plan file. Exit code 2 means changes are pending.
    pub async fn plan(&self, var_file: &Path, plan_file: &Path) -> TerraformResult<PlanOutcome> {
        let cmd = self
            .command()
            .args(["plan", "-input=false", "-detailed-exitcode"])
            .arg(format!("-var-file={}", var_file.display()))
            .arg(format!("-out={}", plan_file.display()))
            .streaming();
        info!(command = %cmd.display(), "planning");

        let output = self.runner.run(&cmd).await?;
        match output.code {
            Some(0) => Ok(PlanOutcome::NoChanges),
            Some(2) => Ok(PlanOutcome::Changes),
            code => Err(TerraformError::PlanFailed(code)),
        }
    }

    pub async fn apply_plan(&self, plan_file: &Path) -> TerraformResult<()> {
        let cmd = self
            .command()
            .args(["apply", "-input=false"])
            .arg(plan_file.display().to_string())
            .streaming()
            .mutating();
        info!(command = %cmd.display(), "applying plan");
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }

    /// Apply from the var file without a saved plan. Used when an earlier
    /// targeted apply has made the saved plan stale.
    pub async fn apply(&self, var_file: &Path) -> TerraformResult<()> {
        let cmd = self
            .command()
            .args(["apply", "-input=false", "-auto-approve"])
            .arg(format!("-var-file={}", var_file.display()))
            .streaming()
            .mutating();
        info!(command = %cmd.display(), "applying");
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }

    /// Apply only the given resource addresses.
    pub async fn apply_targets(&self, var_file: &Path, targets: &[String]) -> TerraformResult<()> {
        let cmd = self
            .command()
            .args(["apply", "-input=false", "-auto-approve"])
            .arg(format!("-var-file={}", var_file.display()))
            .args(targets.iter().map(|t| format!("-target={}", t)))
            .streaming()
            .mutating();
        info!(command = %cmd.display(), "applying targeted resources");
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }

    pub async fn destroy(&self, var_file: &Path) -> TerraformResult<()> {
        let cmd = self
            .command()
            .args(["destroy", "-input=false", "-auto-approve"])
            .arg(format!("-var-file={}", var_file.display()))
            .streaming()
            .mutating();
        info!(command = %cmd.display(), "destroying");
        self.runner.run_checked(&cmd).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::process::ToolOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        output: ToolOutput,
        seen: Mutex<Vec<ToolCommand>>,
    }

    #[async_trait]
    impl CommandRunner for Canned {
        async fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ProcessError> {
            self.seen.lock().unwrap().push(command.clone());
            Ok(self.output.clone())
        }
    }

    fn service(output: ToolOutput) -> (TerraformService, Arc<Canned>) {
        let runner = Arc::new(Canned {
            output,
            seen: Mutex::new(Vec::new()),
        });
        let service = TerraformService::new(
            runner.clone(),
            PathBuf::from("terraform"),
            PathBuf::from("/work/infra"),
        );
        (service, runner)
    }

    #[tokio::test]
    async fn test_version_from_json() {
        let (service, _) = service(ToolOutput::ok(
            r#"{"terraform_version":"1.9.5","platform":"linux_amd64"}"#,
        ));
        assert_eq!(service.version().await.unwrap(), "1.9.5");
    }

    #[tokio::test]
    async fn test_plan_exit_codes() {
        let (changes, runner) = service(ToolOutput {
            code: Some(2),
            ..ToolOutput::default()
        });
        let outcome = changes
            .plan(Path::new("environments/dev.tfvars"), Path::new("dev.tfplan"))
            .await
            .unwrap();
        assert_eq!(outcome, PlanOutcome::Changes);

        let seen = runner.seen.lock().unwrap();
        assert_eq!(
            seen[0].display(),
            "terraform plan -input=false -detailed-exitcode -var-file=environments/dev.tfvars -out=dev.tfplan"
        );
        assert!(!seen[0].mutating);
        assert_eq!(seen[0].cwd.as_deref(), Some(Path::new("/work/infra")));

        let (failed, _) = service(ToolOutput::failed(1, ""));
        let err = failed
            .plan(Path::new("dev.tfvars"), Path::new("dev.tfplan"))
            .await
            .unwrap_err();
        assert!(matches!(err, TerraformError::PlanFailed(Some(1))));
    }

    #[tokio::test]
    async fn test_validate_parses_json_on_failure_exit() {
        let (service, _) = service(ToolOutput {
            code: Some(1),
            stdout: r#"{"valid":false,"error_count":1,"warning_count":0,"diagnostics":[]}"#
                .to_string(),
            stderr: String::new(),
        });
        let result = service.validate().await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.error_count, 1);
    }

    #[tokio::test]
    async fn test_validate_detects_missing_init() {
        let (service, _) = service(ToolOutput::failed(
            1,
            "Error: Module not installed. Run \"terraform init\" to install all modules",
        ));
        assert!(matches!(
            service.validate().await,
            Err(TerraformError::InitRequired(_))
        ));
    }

    #[tokio::test]
    async fn test_init_with_backend() {
        let (service, runner) = service(ToolOutput::ok(""));
        let backend = BackendConfig {
            resource_group_name: "rg-aoai-tfstate".to_string(),
            storage_account_name: "staoai12345678".to_string(),
            container_name: "tfstate".to_string(),
            key: "aoai.tfstate".to_string(),
        };
        service.init(Some(&backend), true).await.unwrap();

        let seen = runner.seen.lock().unwrap();
        let args = &seen[0].args;
        assert_eq!(&args[..3], ["init", "-input=false", "-reconfigure"]);
        assert!(args.contains(&"-backend-config=container_name=tfstate".to_string()));
        assert!(!seen[0].capture);
    }

    #[tokio::test]
    async fn test_apply_targets_is_mutating() {
        let (service, runner) = service(ToolOutput::ok(""));
        service
            .apply_targets(
                Path::new("dev.tfvars"),
                &["azurerm_role_assignment.kv_secrets_officer".to_string()],
            )
            .await
            .unwrap();
        let seen = runner.seen.lock().unwrap();
        assert!(seen[0].mutating);
        assert!(seen[0]
            .args
            .contains(&"-target=azurerm_role_assignment.kv_secrets_officer".to_string()));
    }
}
