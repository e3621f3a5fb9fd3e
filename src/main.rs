use azinfra::config::{Environment, Settings};
use azinfra::core::azinfra::AzInfra;
use azinfra::core::bootstrap::bootstrap;
use azinfra::core::deploy::{deploy, DeployOptions, DeployOutcome};
use azinfra::core::destroy::{destroy, DestroyOptions, DestroyOutcome};
use azinfra::core::setup_env::{setup_env, SetupEnvOptions};
use azinfra::core::validate::check_infra;
use azinfra::dns::netsh::{
    parse_ipv4, DnsAction, DnsFixer, DEFAULT_PRIMARY_DNS, DEFAULT_SECONDARY_DNS,
};
use azinfra::formatters::OutputFormatter;
use azinfra::shared::logging;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "azinfra",
    about = "Provision and operate the Azure OpenAI application infrastructure with Terraform.",
    version = APP_VERSION
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        short = 'c',
        value_name = "PATH",
        global = true,
        help = "Path to the configuration file (default: ./azinfra.json)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        short = 'd',
        value_name = "PATH",
        global = true,
        help = "Terraform configuration directory (default: ./infra)"
    )]
    pub dir: Option<PathBuf>,

    #[arg(long, short = 'v', global = true, conflicts_with = "quiet", help = "Debug logging")]
    pub verbose: bool,

    #[arg(long, short = 'q', global = true, help = "Only log errors")]
    pub quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create the remote state storage and point providers.tf at it")]
    Bootstrap {
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long, help = "Do not rewrite the backend block in providers.tf")]
        no_rewrite: bool,
        #[arg(long)]
        dry_run: bool,
    },

    #[command(about = "Validate, plan and apply one environment")]
    Deploy {
        #[arg(value_name = "ENV")]
        environment: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long, help = "Apply without confirmation")]
        force: bool,
        #[arg(long, help = "Stop after writing the plan")]
        plan_only: bool,
        #[arg(long, help = "Print mutating commands instead of running them")]
        dry_run: bool,
        #[arg(long, help = "Use the backend already configured in providers.tf")]
        skip_backend: bool,
        #[arg(long, help = "Generate the .env file after a successful apply")]
        setup_env: bool,
    },

    #[command(name = "setup-env", about = "Write the application .env from Terraform outputs")]
    SetupEnv {
        #[arg(value_name = "ENV")]
        environment: Option<String>,
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
        #[arg(long)]
        skip_validation: bool,
        #[arg(long, help = "Run the application health check with the new values")]
        health_check: bool,
        #[arg(long)]
        dry_run: bool,
    },

    #[command(about = "Static checks over the Terraform configuration")]
    Validate {
        #[arg(long, help = "Fail on warnings too")]
        strict: bool,
        #[arg(long)]
        json: bool,
    },

    #[command(about = "Destroy one environment and clean up local files")]
    Destroy {
        #[arg(value_name = "ENV")]
        environment: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long, help = "Also remove .terraform and the provider lock file")]
        purge: bool,
        #[arg(long, help = "Use the backend already configured in providers.tf")]
        skip_backend: bool,
        #[arg(long)]
        dry_run: bool,
    },

    #[command(about = "Print Terraform outputs")]
    Outputs {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        show_sensitive: bool,
    },

    #[command(name = "dns-fix", about = "Repair DNS settings on Windows hosts")]
    DnsFix {
        #[arg(value_enum)]
        action: DnsFixAction,
        #[arg(long, value_name = "NAME", help = "Interface to change (default: all connected)")]
        interface: Option<String>,
        #[arg(long, value_name = "IP")]
        primary: Option<String>,
        #[arg(long, value_name = "IP")]
        secondary: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DnsFixAction {
    List,
    Apply,
    Reset,
}

#[tokio::main]
async fn main() {
    // Variables from .env count as process environment; real ones win
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli);

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            logging::error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

/// Overrides passed on the command line, applied after file and environment.
#[derive(Default)]
struct Overrides {
    environment: Option<String>,
    location: Option<String>,
    project: Option<String>,
}

fn load_settings(cli: &Cli, overrides: Overrides) -> anyhow::Result<Settings> {
    let cwd = std::env::current_dir()?;
    let mut settings = Settings::load(cli.config.as_deref(), &cwd)?;
    settings.apply_env_overrides(|key| std::env::var(key).ok())?;

    if let Some(dir) = &cli.dir {
        settings.infra_dir = dir.clone();
    }
    if let Some(env) = overrides.environment {
        settings.environment = env.parse::<Environment>()?;
    }
    if let Some(location) = overrides.location {
        settings.location = location;
    }
    if let Some(project) = overrides.project {
        settings.project_name = project;
    }

    settings.resolve_paths(&cwd);
    settings.validate()?;
    logging::debug(&format!(
        "Environment {} in {}",
        settings.environment,
        settings.infra_dir.display()
    ));
    tracing::debug!(settings = ?settings, "resolved settings");
    Ok(settings)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Bootstrap {
            location,
            project,
            no_rewrite,
            dry_run,
        } => {
            let settings = load_settings(
                &cli,
                Overrides {
                    location: location.clone(),
                    project: project.clone(),
                    ..Default::default()
                },
            )?;
            let azinfra = AzInfra::from_system(settings, *dry_run);
            bootstrap(&azinfra, !*no_rewrite).await?;
            Ok(0)
        }

        Commands::Deploy {
            environment,
            location,
            force,
            plan_only,
            dry_run,
            skip_backend,
            setup_env,
        } => {
            let settings = load_settings(
                &cli,
                Overrides {
                    environment: environment.clone(),
                    location: location.clone(),
                    ..Default::default()
                },
            )?;
            let azinfra = AzInfra::from_system(settings, *dry_run);
            let options = DeployOptions {
                force: *force,
                plan_only: *plan_only,
                skip_backend: *skip_backend,
                setup_env: *setup_env,
            };
            match deploy(&azinfra, &options).await? {
                DeployOutcome::Declined => Ok(1),
                _ => Ok(0),
            }
        }

        Commands::SetupEnv {
            environment,
            output,
            skip_validation,
            health_check,
            dry_run,
        } => {
            let settings = load_settings(
                &cli,
                Overrides {
                    environment: environment.clone(),
                    ..Default::default()
                },
            )?;
            let azinfra = AzInfra::from_system(settings, *dry_run);
            let options = SetupEnvOptions {
                output: output.clone(),
                skip_validation: *skip_validation,
                health_check: *health_check,
            };
            setup_env(&azinfra, &options).await?;
            Ok(0)
        }

        Commands::Validate { strict, json } => {
            let settings = load_settings(&cli, Overrides::default())?;
            let azinfra = AzInfra::from_system(settings, false);
            let terraform = azinfra.terraform_if_available();
            let report = check_infra(&azinfra.settings.infra_dir, terraform.as_ref()).await?;

            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&OutputFormatter::format_validation_json(&report))?
                );
            } else {
                print!("{}", OutputFormatter::format_validation_report(&report));
            }
            Ok(if report.passed_with(*strict) { 0 } else { 1 })
        }

        Commands::Destroy {
            environment,
            force,
            purge,
            skip_backend,
            dry_run,
        } => {
            let settings = load_settings(
                &cli,
                Overrides {
                    environment: environment.clone(),
                    ..Default::default()
                },
            )?;
            let azinfra = AzInfra::from_system(settings, *dry_run);
            let options = DestroyOptions {
                force: *force,
                purge: *purge,
                skip_backend: *skip_backend,
            };
            match destroy(&azinfra, &options).await? {
                DestroyOutcome::Declined => Ok(1),
                DestroyOutcome::Destroyed { .. } => Ok(0),
            }
        }

        Commands::Outputs {
            json,
            show_sensitive,
        } => {
            let settings = load_settings(&cli, Overrides::default())?;
            let azinfra = AzInfra::from_system(settings, false);
            let terraform = azinfra.terraform()?;
            azinfra.select_existing_workspace(&terraform).await?;
            let outputs = terraform.outputs().await?;

            if *json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&OutputFormatter::format_outputs_json(
                        &outputs,
                        *show_sensitive
                    ))?
                );
            } else {
                print!(
                    "{}",
                    OutputFormatter::format_outputs_table(&outputs, *show_sensitive)
                );
            }
            Ok(0)
        }

        Commands::DnsFix {
            action,
            interface,
            primary,
            secondary,
            dry_run,
        } => {
            let azinfra = AzInfra::from_system(Settings::default(), *dry_run);
            let fixer = DnsFixer::new(azinfra.runner(), *dry_run);
            match action {
                DnsFixAction::List => {
                    let interfaces = fixer.list().await?;
                    print!("{}", OutputFormatter::format_interfaces(&interfaces));
                }
                DnsFixAction::Apply => {
                    let primary = match primary {
                        Some(ip) => parse_ipv4(ip)?,
                        None => DEFAULT_PRIMARY_DNS,
                    };
                    let secondary = match secondary {
                        Some(ip) => parse_ipv4(ip)?,
                        None => DEFAULT_SECONDARY_DNS,
                    };
                    let action = DnsAction::Apply {
                        primary,
                        secondary: Some(secondary),
                    };
                    let changed = fixer.run(action, interface.as_deref()).await?;
                    logging::success(&format!("DNS set on: {}", changed.join(", ")));
                }
                DnsFixAction::Reset => {
                    let changed = fixer.run(DnsAction::Reset, interface.as_deref()).await?;
                    logging::success(&format!("DNS reset to DHCP on: {}", changed.join(", ")));
                }
            }
            Ok(0)
        }
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose {
        "debug".to_string()
    } else if cli.quiet {
        "error".to_string()
    } else {
        std::env::var("AZINFRA_LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase()
    };
    logging::set_level(logging::LogLevel::from_name(&log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging::filter_directive(&log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
