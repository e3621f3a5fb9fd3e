//! Terraform fmt checks.

use crate::terraform::service::{TerraformResult, TerraformService};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatResult {
    pub files_checked: usize,
    /// Files `terraform fmt` would rewrite, relative to the project directory.
    pub unformatted: Vec<String>,
}

impl FormatResult {
    pub fn is_clean(&self) -> bool {
        self.unformatted.is_empty()
    }
}

impl TerraformService {
    /// `terraform fmt -check -list=true -recursive`; exit status 3 only means
    /// some files need formatting.
    pub async fn check_format(&self) -> TerraformResult<FormatResult> {
        let cmd = self
            .command()
            .args(["fmt", "-check", "-list=true", "-recursive"]);
        let output = self.runner().run(&cmd).await?;

        let unformatted: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if !output.success() && unformatted.is_empty() {
            output.ensure_success(&cmd)?;
        }

        Ok(FormatResult {
            files_checked: count_tf_files(self.project_directory()),
            unformatted,
        })
    }
}

/// Count .tf files in a directory (recursive)
pub fn count_tf_files(dir: &Path) -> usize {
    let mut count = 0;

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                // .terraform holds downloaded modules
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with('.') {
                        continue;
                    }
                }
                count += count_tf_files(&path);
            } else if path.extension().is_some_and(|ext| ext == "tf") {
                count += 1;
            }
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_count_tf_files_skips_hidden_dirs() {
        let temp_dir = TempDir::new().unwrap();

        fs::write(temp_dir.path().join("main.tf"), "").unwrap();
        fs::write(temp_dir.path().join("variables.tf"), "").unwrap();
        fs::write(temp_dir.path().join("dev.tfvars"), "").unwrap();
        fs::create_dir_all(temp_dir.path().join(".terraform/modules")).unwrap();
        fs::write(temp_dir.path().join(".terraform/modules/x.tf"), "").unwrap();
        fs::create_dir_all(temp_dir.path().join("modules/kv")).unwrap();
        fs::write(temp_dir.path().join("modules/kv/main.tf"), "").unwrap();

        assert_eq!(count_tf_files(temp_dir.path()), 3);
    }
}
