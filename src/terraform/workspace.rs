//! Terraform workspace selection.

use crate::terraform::service::{TerraformResult, TerraformService};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub name: String,
    pub current: bool,
}

/// What `ensure_workspace` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceChange {
    AlreadySelected,
    Selected,
    Created,
}

impl TerraformService {
    pub async fn list_workspaces(&self) -> TerraformResult<Vec<WorkspaceInfo>> {
        let cmd = self.command().args(["workspace", "list"]);
        let output = self.runner().run_checked(&cmd).await?;
        Ok(parse_workspace_list(&output.stdout))
    }

    /// Select `name`, creating it first when it does not exist.
    pub async fn ensure_workspace(&self, name: &str) -> anyhow::Result<WorkspaceChange> {
        if !is_valid_workspace_name(name) {
            return Err(anyhow::anyhow!(
                "Invalid workspace name: '{}'. Names must be alphanumeric with hyphens or underscores",
                name
            ));
        }

        let workspaces = self.list_workspaces().await?;
        match workspaces.iter().find(|w| w.name == name) {
            Some(w) if w.current => Ok(WorkspaceChange::AlreadySelected),
            Some(_) => {
                let cmd = self.command().args(["workspace", "select", name]);
                self.runner().run_checked(&cmd).await?;
                info!(workspace = name, "selected workspace");
                Ok(WorkspaceChange::Selected)
            }
            None => {
                let cmd = self.command().args(["workspace", "new", name]);
                self.runner().run_checked(&cmd).await?;
                info!(workspace = name, "created workspace");
                Ok(WorkspaceChange::Created)
            }
        }
    }
}

/// Parse `terraform workspace list`; the current workspace is prefixed with `* `.
pub fn parse_workspace_list(stdout: &str) -> Vec<WorkspaceInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_prefix("* ") {
            Some(name) => WorkspaceInfo {
                name: name.trim().to_string(),
                current: true,
            },
            None => WorkspaceInfo {
                name: line.to_string(),
                current: false,
            },
        })
        .collect()
}

pub fn is_valid_workspace_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 100 {
        return false;
    }

    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}
