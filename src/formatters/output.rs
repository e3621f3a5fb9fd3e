use crate::core::validate::{Severity, ValidationReport};
use crate::dns::netsh::NetworkInterface;
use crate::terraform::output::OutputValue;
use serde_json::{json, Value};

/// Output formatter for terminal and JSON results
pub struct OutputFormatter;

impl OutputFormatter {
    /// Outputs as a JSON document. Sensitive values are masked unless requested.
    pub fn format_outputs_json(outputs: &[OutputValue], show_sensitive: bool) -> Value {
        json!({
            "summary": {
                "total_outputs": outputs.len(),
                "sensitive_outputs": outputs.iter().filter(|o| o.sensitive).count(),
            },
            "outputs": outputs.iter().map(|output| {
                let value = if output.sensitive && !show_sensitive {
                    json!("(sensitive)")
                } else {
                    output.value.clone()
                };
                json!({
                    "name": output.name,
                    "type": output.value_type,
                    "sensitive": output.sensitive,
                    "value": value,
                })
            }).collect::<Vec<_>>()
        })
    }

    /// Aligned `name = value` lines.
    pub fn format_outputs_table(outputs: &[OutputValue], show_sensitive: bool) -> String {
        if outputs.is_empty() {
            return "No outputs found.\n".to_string();
        }
        let width = outputs.iter().map(|o| o.name.len()).max().unwrap_or(0);
        outputs
            .iter()
            .map(|o| {
                format!(
                    "{:<width$} = {}\n",
                    o.name,
                    o.display_value(show_sensitive),
                    width = width
                )
            })
            .collect()
    }

    /// Findings grouped by severity, followed by a one-line summary.
    pub fn format_validation_report(report: &ValidationReport) -> String {
        let mut out = String::new();
        for severity in [Severity::Error, Severity::Warning] {
            for finding in report.findings.iter().filter(|f| f.severity == severity) {
                let marker = match severity {
                    Severity::Error => "✗",
                    Severity::Warning => "!",
                };
                match finding.location() {
                    Some(location) => out.push_str(&format!(
                        "  {} [{}] {}: {}\n",
                        marker, finding.category, location, finding.message
                    )),
                    None => out.push_str(&format!(
                        "  {} [{}] {}\n",
                        marker, finding.category, finding.message
                    )),
                }
            }
        }

        let errors = report.errors().count();
        let warnings = report.warnings().count();
        out.push_str(&format!(
            "Checked {} file(s): {} error(s), {} warning(s) - {}\n",
            report.checked_files,
            errors,
            warnings,
            if report.passed() { "passed" } else { "failed" }
        ));
        out
    }

    pub fn format_validation_json(report: &ValidationReport) -> Value {
        json!({
            "summary": {
                "checked_files": report.checked_files,
                "errors": report.errors().count(),
                "warnings": report.warnings().count(),
                "passed": report.passed(),
            },
            "findings": report.findings,
        })
    }

    pub fn format_interfaces(interfaces: &[NetworkInterface]) -> String {
        let mut out = format!(
            "{:<10} {:<14} {:<12} {}\n",
            "Admin", "State", "Type", "Name"
        );
        for interface in interfaces {
            out.push_str(&format!(
                "{:<10} {:<14} {:<12} {}\n",
                interface.admin_state, interface.state, interface.kind, interface.name
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validate::check_static;

    fn outputs() -> Vec<OutputValue> {
        vec![
            OutputValue {
                name: "openai_endpoint".to_string(),
                value: json!("https://x.openai.azure.com/"),
                value_type: "string".to_string(),
                sensitive: false,
            },
            OutputValue {
                name: "key".to_string(),
                value: json!("secret"),
                value_type: "string".to_string(),
                sensitive: true,
            },
        ]
    }

    #[test]
    fn test_outputs_table_masks_sensitive() {
        let table = OutputFormatter::format_outputs_table(&outputs(), false);
        assert_eq!(
            table,
            "openai_endpoint = https://x.openai.azure.com/\nkey             = (sensitive)\n"
        );
        assert!(OutputFormatter::format_outputs_table(&outputs(), true).contains("= secret"));
        assert_eq!(
            OutputFormatter::format_outputs_table(&[], false),
            "No outputs found.\n"
        );
    }

    #[test]
    fn test_outputs_json() {
        let value = OutputFormatter::format_outputs_json(&outputs(), false);
        assert_eq!(value["summary"]["total_outputs"], 2);
        assert_eq!(value["summary"]["sensitive_outputs"], 1);
        assert_eq!(value["outputs"][1]["value"], "(sensitive)");
    }

    #[test]
    fn test_validation_report_summary() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.tf"), "locals {\n  a = var.b\n}\n").unwrap();
        let report = check_static(dir.path()).unwrap();

        let text = OutputFormatter::format_validation_report(&report);
        assert!(text.contains("✗ [variables] main.tf:2: var.b is not declared"));
        assert!(text.trim_end().ends_with("failed"));

        let value = OutputFormatter::format_validation_json(&report);
        assert_eq!(value["summary"]["passed"], false);
        assert_eq!(value["findings"][0]["severity"], "error");
    }
}
