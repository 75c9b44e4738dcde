use std::collections::BTreeMap;

use async_trait::async_trait;
use ep_common::envelope::DataContract;
use serde_json::Value;

/// Lookup surface for published data contracts, keyed by
/// `(signal_type, contract_version)` (§3). Implementations are free to back
/// this with Postgres, the policy bundle, or an in-memory map in tests —
/// the pipeline only needs the lookup.
#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn get(&self, signal_type: &str, contract_version: &str) -> Option<DataContract>;
}

/// In-memory contract store, useful for tests and for a process that loads
/// its contracts from the policy bundle at startup rather than per-call.
#[derive(Default)]
pub struct InMemoryContractStore {
    contracts: std::sync::RwLock<BTreeMap<(String, String), DataContract>>,
}

impl InMemoryContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, contract: DataContract) {
        let key = (contract.signal_type.clone(), contract.contract_version.clone());
        self.contracts.write().expect("contract store poisoned").insert(key, contract);
    }
}

#[async_trait]
impl ContractStore for InMemoryContractStore {
    async fn get(&self, signal_type: &str, contract_version: &str) -> Option<DataContract> {
        self.contracts
            .read()
            .expect("contract store poisoned")
            .get(&(signal_type.to_string(), contract_version.to_string()))
            .cloned()
    }
}

/// Pure validation: every `required_fields` entry must be present in
/// `payload` (§4.1 stage 3). Returns the missing field names, empty if the
/// payload satisfies the contract.
pub fn missing_required_fields(contract: &DataContract, payload: &BTreeMap<String, Value>) -> Vec<String> {
    contract
        .required_fields
        .iter()
        .filter(|f| !payload.contains_key(*f))
        .cloned()
        .collect()
}

/// Apply contract `field_mappings` (provider key -> canonical key rename)
/// and `unit_conversions`, producing the normalized payload (§4.1 stage 7).
/// Pure and idempotent: `normalize(normalize(p)) == normalize(p)` because
/// renames only fire when the provider key is still present, and
/// conversions are applied exactly once per canonical key per call.
pub fn normalize_payload(contract: &DataContract, payload: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = payload.clone();

    for (provider_key, canonical_key) in &contract.field_mappings {
        if provider_key == canonical_key {
            continue;
        }
        if let Some(value) = out.remove(provider_key) {
            out.insert(canonical_key.clone(), value);
        }
    }

    for (canonical_key, conversion) in &contract.unit_conversions {
        if let Some(value) = out.get(canonical_key) {
            let converted = conversion.apply(value);
            out.insert(canonical_key.clone(), converted);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ep_common::envelope::UnitConversion;
    use serde_json::json;

    fn sample_contract() -> DataContract {
        DataContract {
            signal_type: "pr_opened".to_string(),
            contract_version: "1.0.0".to_string(),
            required_fields: vec!["pr_id".to_string()],
            optional_fields: vec![],
            field_mappings: BTreeMap::from([("pull_request_id".to_string(), "pr_id".to_string())]),
            unit_conversions: BTreeMap::from([("duration".to_string(), UnitConversion::SecondsToMillis)]),
            pii_flags: vec![],
            secrets_flags: vec![],
        }
    }

    #[test]
    fn missing_required_fields_detects_absence() {
        let contract = sample_contract();
        let payload = BTreeMap::new();
        assert_eq!(missing_required_fields(&contract, &payload), vec!["pr_id".to_string()]);
    }

    #[test]
    fn normalize_renames_and_converts() {
        let contract = sample_contract();
        let payload = BTreeMap::from([
            ("pull_request_id".to_string(), json!(123)),
            ("duration".to_string(), json!(2.0)),
        ]);
        let normalized = normalize_payload(&contract, &payload);
        assert_eq!(normalized.get("pr_id"), Some(&json!(123)));
        assert_eq!(normalized.get("duration"), Some(&json!(2000.0)));
        assert!(!normalized.contains_key("pull_request_id"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let contract = sample_contract();
        let payload = BTreeMap::from([
            ("pull_request_id".to_string(), json!(123)),
            ("duration".to_string(), json!(2.0)),
        ]);
        let once = normalize_payload(&contract, &payload);
        let twice = normalize_payload(&contract, &once);
        assert_eq!(once, twice);
    }
}
