//! End-to-end deployment of one environment.
//!
//! prerequisites → static validation → state backend → tfvars → init →
//! workspace → validate → plan → confirmation → RBAC phase → apply → outputs.
//! Any failing step stops the run; nothing is retried.

use crate::core::azinfra::AzInfra;
use crate::core::bootstrap::Bootstrapper;
use crate::core::setup_env::{setup_env, SetupEnvOptions};
use crate::core::validate::check_infra;
use crate::formatters::output::OutputFormatter;
use crate::generate::tfvars::TfVars;
use crate::shared::logging;
use crate::shared::prompt::confirm_exact;
use crate::terraform::model::PlanOutcome;
use crate::terraform::parser::TerraformParser;
use crate::terraform::service::TerraformService;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const TOTAL_STEPS: usize = 10;
const ROLE_ASSIGNMENT_TYPE: &str = "azurerm_role_assignment";

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub force: bool,
    pub plan_only: bool,
    pub skip_backend: bool,
    pub setup_env: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// `--plan-only`: the plan was written and nothing applied.
    Planned(PlanOutcome),
    NoChanges,
    /// The operator declined the confirmation.
    Declined,
    /// Dry-run stopped because the state backend does not exist yet.
    BackendPending,
    Applied,
}

/// Role assignments declared in `rbac.tf`, applied ahead of everything else so
/// data-plane permissions have propagated by the time resources need them.
pub fn rbac_targets(infra_dir: &Path) -> anyhow::Result<Vec<String>> {
    let path = infra_dir.join("rbac.tf");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    Ok(TerraformParser::new(content)
        .parse_resources()
        .into_iter()
        .filter(|r| r.resource_type == ROLE_ASSIGNMENT_TYPE)
        .map(|r| r.address())
        .collect())
}

pub async fn deploy(azinfra: &AzInfra, options: &DeployOptions) -> anyhow::Result<DeployOutcome> {
    let settings = &azinfra.settings;
    let environment = settings.environment;
    info!(environment = %environment, dry_run = azinfra.dry_run, "starting deployment");

    logging::step(1, TOTAL_STEPS, "Checking prerequisites");
    let terraform = azinfra.terraform()?;
    let azure = azinfra.azure()?;
    let version = terraform.version().await?;
    logging::info(&format!("Terraform {}", version));
    let account = azinfra.azure_account(&azure).await?;
    logging::info(&format!("Subscription: {} ({})", account.name, account.id));

    logging::step(2, TOTAL_STEPS, "Validating configuration");
    let report = check_infra(&settings.infra_dir, Some(&terraform)).await?;
    eprint!("{}", OutputFormatter::format_validation_report(&report));
    if !report.passed() {
        return Err(anyhow::anyhow!(
            "Configuration has {} error(s); fix them before deploying",
            report.errors().count()
        ));
    }

    logging::step(3, TOTAL_STEPS, "Preparing state backend");
    let backend = if options.skip_backend {
        logging::info("Skipping backend setup; using the backend configured in providers.tf");
        settings.backend.clone()
    } else {
        let status = Bootstrapper::new(&azure, settings, azinfra.dry_run)
            .ensure_backend(&account)
            .await?;
        if azinfra.dry_run && status.created_account {
            logging::warn("Dry run: the state backend does not exist yet, stopping before terraform init");
            return Ok(DeployOutcome::BackendPending);
        }
        Some(status.backend)
    };

    logging::step(4, TOTAL_STEPS, "Writing variables");
    let tfvars_path = settings.tfvars_path();
    TfVars::from_settings(settings, &account.id).write(&tfvars_path)?;
    logging::info(&format!("Wrote {}", tfvars_path.display()));

    logging::step(5, TOTAL_STEPS, "Initializing Terraform");
    terraform.init(backend.as_ref(), backend.is_some()).await?;

    logging::step(6, TOTAL_STEPS, "Selecting workspace");
    if azinfra.workspace_from_env {
        logging::info("TF_WORKSPACE is set; Terraform selects the workspace");
    } else {
        let workspace = settings.workspace_name();
        let change = terraform.ensure_workspace(&workspace).await?;
        info!(workspace = %workspace, change = ?change, "workspace ready");
    }

    logging::step(7, TOTAL_STEPS, "Running terraform validate");
    let validation = terraform.validate().await?;
    if !validation.valid {
        let details: Vec<String> = validation
            .diagnostics
            .iter()
            .map(|d| d.describe())
            .collect();
        return Err(anyhow::anyhow!(
            "terraform validate reported {} error(s):\n{}",
            validation.error_count,
            details.join("\n")
        ));
    }

    logging::step(8, TOTAL_STEPS, "Planning");
    let plan_path = settings.plan_path();
    let plan = terraform.plan(&tfvars_path, &plan_path).await?;
    if options.plan_only {
        logging::success(&format!("Plan saved to {}", plan_path.display()));
        return Ok(DeployOutcome::Planned(plan));
    }
    if plan == PlanOutcome::NoChanges {
        logging::success("Infrastructure is up to date");
        return Ok(DeployOutcome::NoChanges);
    }

    if !options.force && !azinfra.dry_run && !confirm_apply(azinfra)? {
        logging::warn("Deployment cancelled");
        return Ok(DeployOutcome::Declined);
    }

    logging::step(9, TOTAL_STEPS, "Applying");
    apply_with_rbac_phase(azinfra, &terraform, &tfvars_path, &plan_path).await?;

    logging::step(10, TOTAL_STEPS, "Reading outputs");
    if azinfra.dry_run {
        logging::info("Dry run: nothing was applied");
        return Ok(DeployOutcome::Applied);
    }
    let outputs = terraform.outputs().await?;
    print!("{}", OutputFormatter::format_outputs_table(&outputs, false));
    logging::success(&format!("Deployed {}", environment));

    if options.setup_env {
        setup_env(azinfra, &SetupEnvOptions::default()).await?;
    }

    Ok(DeployOutcome::Applied)
}

/// Ask for `yes`; protected environments also require the environment name.
fn confirm_apply(azinfra: &AzInfra) -> anyhow::Result<bool> {
    let environment = azinfra.settings.environment;
    let prompter = azinfra.prompter();
    if !confirm_exact(
        prompter,
        &format!("Apply these changes to {}? Type 'yes' to continue:", environment),
        "yes",
    )? {
        return Ok(false);
    }
    if environment.is_protected() {
        return confirm_exact(
            prompter,
            &format!(
                "{} is a protected environment. Type '{}' to confirm:",
                environment, environment
            ),
            environment.as_str(),
        );
    }
    Ok(true)
}

async fn apply_with_rbac_phase(
    azinfra: &AzInfra,
    terraform: &TerraformService,
    tfvars_path: &Path,
    plan_path: &Path,
) -> anyhow::Result<()> {
    let targets = rbac_targets(&azinfra.settings.infra_dir)?;
    if targets.is_empty() {
        terraform.apply_plan(plan_path).await?;
        return Ok(());
    }

    logging::info(&format!("Applying {} role assignment(s) first", targets.len()));
    terraform.apply_targets(tfvars_path, &targets).await?;

    let wait = azinfra.settings.rbac_propagation_seconds;
    if wait > 0 && !azinfra.dry_run {
        logging::info(&format!("Waiting {}s for role assignments to propagate", wait));
        tokio::time::sleep(Duration::from_secs(wait)).await;
    }

    // The targeted apply changed the state, so the saved plan is stale
    terraform.apply(tfvars_path).await?;
    Ok(())
}
