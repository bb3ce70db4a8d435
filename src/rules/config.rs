//! Rule-set configuration loading.
//!
//! Rule sets are declared in YAML or JSON files and deserialized straight
//! into the [`RuleSet`] model. Loading validates the structural constraints
//! that the compiler relies on but cannot express in types.

use std::path::Path;

use super::errors::RulesConfigError;
use super::{GroupSpec, RuleSet, Specification};

pub fn load_ruleset_from_yaml(content: &str) -> Result<RuleSet, RulesConfigError> {
    let ruleset: RuleSet = serde_yaml::from_str(content)?;
    validate(&ruleset)?;
    Ok(ruleset)
}

pub fn load_ruleset_from_json(content: &str) -> Result<RuleSet, RulesConfigError> {
    let ruleset: RuleSet = serde_json::from_str(content)?;
    validate(&ruleset)?;
    Ok(ruleset)
}

/// Loads a rule set from a file, picking the format by extension
/// (`.yaml`/`.yml` or `.json`).
pub fn load_ruleset_file<P: AsRef<Path>>(path: P) -> Result<RuleSet, RulesConfigError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let content = std::fs::read_to_string(path)?;
    match extension.as_str() {
        "yaml" | "yml" => load_ruleset_from_yaml(&content),
        "json" => load_ruleset_from_json(&content),
        other => Err(RulesConfigError::UnsupportedExtension(other.to_string())),
    }
}

fn validate(ruleset: &RuleSet) -> Result<(), RulesConfigError> {
    if ruleset.id.is_empty() {
        return Err(RulesConfigError::Invalid(
            "rule set id must not be empty".to_string(),
        ));
    }
    for rule in ruleset.root_rules.iter().chain(&ruleset.child_rules) {
        if rule.specifications.is_empty() {
            return Err(RulesConfigError::Invalid(
                "navigation rule has no specifications".to_string(),
            ));
        }
        for spec in &rule.specifications {
            if let Specification::InstancesOfClasses(class_spec) = spec {
                if class_spec.classes.is_empty() {
                    return Err(RulesConfigError::Invalid(
                        "instancesOfClasses specification has no classes".to_string(),
                    ));
                }
            }
        }
    }
    for rule in &ruleset.grouping_rules {
        if rule.groups.is_empty() {
            return Err(RulesConfigError::Invalid(format!(
                "grouping rule for '{}' has no group specifications",
                rule.class.class
            )));
        }
        for group in &rule.groups {
            if let GroupSpec::ByProperty(prop) = group {
                for range in &prop.ranges {
                    if range.from > range.to {
                        return Err(RulesConfigError::Invalid(format!(
                            "property range [{}, {}] on '{}' is inverted",
                            range.from, range.to, prop.property
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}
