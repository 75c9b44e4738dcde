use std::collections::BTreeMap;

use ep_common::envelope::DataContract;
use serde_json::Value;

/// Per-tenant governance rules: which contract-declared `pii_flags` /
/// `secrets_flags` fields are outright disallowed for this tenant versus
/// merely redactable (§4.1 stage 4).
#[derive(Debug, Clone, Default)]
pub struct GovernanceRules {
    pub disallowed_fields: Vec<String>,
    pub redactable_fields: Vec<String>,
}

pub struct GovernanceOutcome {
    pub payload: BTreeMap<String, Value>,
    pub violation: Option<String>,
    pub warnings: Vec<String>,
}

/// Apply the governance filter. A disallowed field present in the payload
/// is a `GOVERNANCE_VIOLATION`; a redactable field is replaced with a
/// redaction marker and produces a warning, never a rejection.
pub fn apply_governance(
    contract: &DataContract,
    rules: &GovernanceRules,
    payload: &BTreeMap<String, Value>,
) -> GovernanceOutcome {
    let candidate_fields: Vec<&String> = contract
        .pii_flags
        .iter()
        .chain(contract.secrets_flags.iter())
        .collect();

    for field in &candidate_fields {
        if rules.disallowed_fields.iter().any(|f| f == *field) && payload.contains_key(field.as_str()) {
            return GovernanceOutcome {
                payload: payload.clone(),
                violation: Some(format!("disallowed field present: {field}")),
                warnings: Vec::new(),
            };
        }
    }

    let mut out = payload.clone();
    let mut warnings = Vec::new();
    for field in &candidate_fields {
        if rules.redactable_fields.iter().any(|f| f == *field) && out.contains_key(field.as_str()) {
            out.insert(field.to_string(), Value::String("[REDACTED]".to_string()));
            warnings.push(format!("redacted field: {field}"));
        }
    }

    GovernanceOutcome {
        payload: out,
        violation: None,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract() -> DataContract {
        DataContract {
            signal_type: "issue_created".to_string(),
            contract_version: "1.0.0".to_string(),
            required_fields: vec![],
            optional_fields: vec![],
            field_mappings: Default::default(),
            unit_conversions: Default::default(),
            pii_flags: vec!["reporter_email".to_string()],
            secrets_flags: vec!["api_token".to_string()],
        }
    }

    #[test]
    fn disallowed_field_present_is_a_violation() {
        let rules = GovernanceRules {
            disallowed_fields: vec!["api_token".to_string()],
            redactable_fields: vec![],
        };
        let payload = BTreeMap::from([("api_token".to_string(), json!("secret"))]);
        let outcome = apply_governance(&contract(), &rules, &payload);
        assert!(outcome.violation.is_some());
    }

    #[test]
    fn redactable_field_is_replaced_with_warning() {
        let rules = GovernanceRules {
            disallowed_fields: vec![],
            redactable_fields: vec!["reporter_email".to_string()],
        };
        let payload = BTreeMap::from([("reporter_email".to_string(), json!("a@example.com"))]);
        let outcome = apply_governance(&contract(), &rules, &payload);
        assert!(outcome.violation.is_none());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.payload.get("reporter_email"), Some(&json!("[REDACTED]")));
    }
}
