// Re-export modules for testing and external use
pub mod formatters {
    pub mod output;

    pub use output::OutputFormatter;
}

pub mod shared {
    pub mod audit;
    pub mod fsutil;
    pub mod logging;
    pub mod process;
    pub mod prompt;
}

pub mod terraform {
    pub mod fmt;
    pub mod model;
    pub mod output;
    pub mod parser;
    pub mod service;
    pub mod workspace;
}

pub mod azure {
    pub mod cli;

    pub use cli::{AzureAccount, AzureCli, AzureError};
}

pub mod generate {
    pub mod envfile;
    pub mod tfvars;
}

pub mod core {
    pub mod azinfra;
    pub mod bootstrap;
    pub mod deploy;
    pub mod destroy;
    pub mod setup_env;
    pub mod validate;
}

pub mod dns {
    pub mod netsh;
}

pub mod config;

// Re-export commonly used types for easier testing and external use
pub use crate::config::{Environment, Settings};
pub use crate::core::azinfra::{AzInfra, Toolchain};
pub use crate::shared::process::{CommandRunner, ScriptedRunner, SystemRunner, ToolCommand, ToolOutput};
pub use crate::terraform::service::TerraformService;
