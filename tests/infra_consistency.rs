//! Checks over the Terraform configuration shipped in `infra/`.

use azinfra::config::Settings;
use azinfra::core::bootstrap::{derive_backend, rewrite_backend_block};
use azinfra::core::deploy::rbac_targets;
use azinfra::core::validate::{check_static, load_tf_files};
use azinfra::generate::envfile::ENV_MAPPINGS;
use azinfra::generate::tfvars::TfVars;
use azinfra::terraform::parser::TerraformParser;
use std::collections::BTreeSet;
use std::path::PathBuf;

fn infra_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("infra")
}

fn declared_variables() -> BTreeSet<String> {
    load_tf_files(&infra_dir())
        .unwrap()
        .iter()
        .flat_map(|(_, parser)| parser.parse_variables())
        .map(|v| v.name)
        .collect()
}

#[test]
fn test_shipped_infra_has_no_findings() {
    let report = check_static(&infra_dir()).unwrap();
    assert!(report.passed(), "{:?}", report.findings);
    assert!(report.findings.is_empty(), "{:?}", report.findings);
    assert_eq!(report.checked_files, 5);
}

#[test]
fn test_every_reference_is_declared() {
    let declared = declared_variables();
    for (file, parser) in load_tf_files(&infra_dir()).unwrap() {
        for reference in parser.variable_references() {
            assert!(
                declared.contains(&reference.name),
                "{}:{} references undeclared var.{}",
                file,
                reference.line,
                reference.name
            );
        }
    }
}

#[test]
fn test_mapped_outputs_are_declared() {
    let content = std::fs::read_to_string(infra_dir().join("outputs.tf")).unwrap();
    let outputs: BTreeSet<String> = TerraformParser::new(content)
        .parse_outputs()
        .into_iter()
        .map(|o| o.name)
        .collect();
    for mapping in ENV_MAPPINGS {
        assert!(outputs.contains(mapping.output), "missing output {}", mapping.output);
    }
}

#[test]
fn test_generated_tfvars_match_variables() {
    let declared = declared_variables();
    let vars = TfVars::from_settings(&Settings::default(), "00000000-aaaa-bbbb-cccc-000000000000");
    for name in vars.names() {
        assert!(declared.contains(name), "tfvars sets undeclared variable {}", name);
    }
}

#[test]
fn test_role_assignments_form_the_rbac_phase() {
    let targets = rbac_targets(&infra_dir()).unwrap();
    assert_eq!(targets.len(), 5);
    assert!(targets.contains(&"azurerm_role_assignment.deployer_kv_secrets_officer".to_string()));
    assert!(targets.iter().all(|t| t.starts_with("azurerm_role_assignment.")));
}

#[test]
fn test_backend_block_can_be_rewritten() {
    let content = std::fs::read_to_string(infra_dir().join("providers.tf")).unwrap();
    let backend = derive_backend("aoai", "1a2b3c4d-0000-1111-2222-333333333333");
    let rewritten = rewrite_backend_block(&content, &backend).unwrap();

    assert!(rewritten.contains("    storage_account_name = \"staoai1a2b3c4d\"\n"));
    assert!(rewritten.contains("provider \"azurerm\" {"));
    let parser = TerraformParser::new(rewritten.clone());
    assert!(parser.backend_block_span().is_some());
    assert_eq!(rewrite_backend_block(&rewritten, &backend).unwrap(), rewritten);
}
