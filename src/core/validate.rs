//! Static checks over the Terraform configuration.
//!
//! Runs without touching Azure or the Terraform state: file layout, variable
//! declarations against their uses, outputs the `.env` mapping relies on,
//! leftover placeholders, and `terraform fmt` when the binary is available.

use crate::generate::envfile::ENV_MAPPINGS;
use crate::shared::logging;
use crate::terraform::parser::TerraformParser;
use crate::terraform::service::TerraformService;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

pub const REQUIRED_FILES: &[&str] = &[
    "main.tf",
    "variables.tf",
    "outputs.tf",
    "providers.tf",
    "rbac.tf",
];

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\b(TODO|FIXME|CHANGEME|REPLACE_ME)\b|<your-[^>]*>|[xX]{8,}|00000000-0000-0000-0000-000000000000"#,
    )
    .expect("Invalid placeholder regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: &'static str,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub message: String,
}

impl Finding {
    fn new(severity: Severity, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    fn at(mut self, file: &str, line: usize) -> Self {
        self.file = Some(file.to_string());
        self.line = Some(line);
        self
    }

    pub fn location(&self) -> Option<String> {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            (Some(file), None) => Some(file.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub checked_files: usize,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    /// No errors. Warnings never fail a report on their own.
    pub fn passed(&self) -> bool {
        self.errors().next().is_none()
    }

    /// With `strict`, warnings fail as well.
    pub fn passed_with(&self, strict: bool) -> bool {
        if strict {
            self.findings.is_empty()
        } else {
            self.passed()
        }
    }

    fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }
}

/// Top-level `.tf` files of `dir`, sorted by name.
pub fn load_tf_files(dir: &Path) -> anyhow::Result<Vec<(String, TerraformParser)>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", dir.display(), e))?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("tf") {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        files.push((name, TerraformParser::new(content)));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Every check that needs nothing but the files.
pub fn check_static(dir: &Path) -> anyhow::Result<ValidationReport> {
    let files = load_tf_files(dir)?;
    let mut report = ValidationReport {
        checked_files: files.len(),
        findings: Vec::new(),
    };

    check_required_files(&files, &mut report);
    check_variables(&files, &mut report);
    check_mapped_outputs(&files, &mut report);
    check_placeholders(&files, &mut report);

    Ok(report)
}

/// Static checks plus `terraform fmt -check`. Without a terraform binary the
/// format check is skipped with a warning.
pub async fn check_infra(
    dir: &Path,
    terraform: Option<&TerraformService>,
) -> anyhow::Result<ValidationReport> {
    let mut report = check_static(dir)?;

    match terraform {
        None => report.push(Finding::new(
            Severity::Warning,
            "format",
            "terraform not found on PATH; format check skipped",
        )),
        Some(terraform) => match terraform.check_format().await {
            Ok(result) if result.is_clean() => {
                logging::debug(&format!(
                    "terraform fmt: {} file(s) already formatted",
                    result.files_checked
                ));
            }
            Ok(result) => {
                for file in result.unformatted {
                    report.push(
                        Finding::new(
                            Severity::Warning,
                            "format",
                            "not formatted; run `terraform fmt`",
                        )
                        .at(&file, 1),
                    );
                }
            }
            Err(e) => report.push(Finding::new(
                Severity::Warning,
                "format",
                format!("format check could not run: {}", e),
            )),
        },
    }

    Ok(report)
}

fn check_required_files(files: &[(String, TerraformParser)], report: &mut ValidationReport) {
    for required in REQUIRED_FILES {
        if !files.iter().any(|(name, _)| name == required) {
            report.push(Finding::new(
                Severity::Error,
                "layout",
                format!("required file {} is missing", required),
            ));
        }
    }
}

fn check_variables(files: &[(String, TerraformParser)], report: &mut ValidationReport) {
    // name -> (file, line) of the declaration
    let mut declared: BTreeMap<String, (String, usize)> = BTreeMap::new();
    let mut referenced: BTreeSet<String> = BTreeSet::new();

    for (file, parser) in files {
        for variable in parser.parse_variables() {
            if let Some((first_file, first_line)) = declared.get(&variable.name) {
                report.push(
                    Finding::new(
                        Severity::Error,
                        "variables",
                        format!(
                            "variable \"{}\" is also declared at {}:{}",
                            variable.name, first_file, first_line
                        ),
                    )
                    .at(file, variable.line),
                );
                continue;
            }
            declared.insert(variable.name, (file.clone(), variable.line));
        }
    }

    for (file, parser) in files {
        for reference in parser.variable_references() {
            if !declared.contains_key(&reference.name) {
                report.push(
                    Finding::new(
                        Severity::Error,
                        "variables",
                        format!("var.{} is not declared", reference.name),
                    )
                    .at(file, reference.line),
                );
            }
            referenced.insert(reference.name);
        }
    }

    for (name, (file, line)) in &declared {
        if !referenced.contains(name) {
            report.push(
                Finding::new(
                    Severity::Warning,
                    "variables",
                    format!("variable \"{}\" is declared but never used", name),
                )
                .at(file, *line),
            );
        }
    }
}

fn check_mapped_outputs(files: &[(String, TerraformParser)], report: &mut ValidationReport) {
    let declared: BTreeSet<String> = files
        .iter()
        .flat_map(|(_, parser)| parser.parse_outputs())
        .map(|output| output.name)
        .collect();

    for mapping in ENV_MAPPINGS {
        if !declared.contains(mapping.output) {
            report.push(Finding::new(
                Severity::Error,
                "outputs",
                format!(
                    "output \"{}\" is not declared but {} is generated from it",
                    mapping.output, mapping.key
                ),
            ));
        }
    }
}

fn check_placeholders(files: &[(String, TerraformParser)], report: &mut ValidationReport) {
    for (file, parser) in files {
        for (index, line) in parser.content().lines().enumerate() {
            if let Some(found) = PLACEHOLDER_REGEX.find(line) {
                report.push(
                    Finding::new(
                        Severity::Warning,
                        "placeholders",
                        format!("placeholder '{}' left in configuration", found.as_str()),
                    )
                    .at(file, index + 1),
                );
            }
        }
    }
}
