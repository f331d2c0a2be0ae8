use std::str::FromStr;

use alloy_primitives::Address;
use anyhow::{Context, Result};

use crate::models::Service;

/// Coordinator contracts the listeners watch, per service.
#[derive(Clone, Debug, Default)]
pub struct ContractsConfig {
    pub vrf_coordinators: Vec<String>,
    pub request_response_coordinators: Vec<String>,
}

impl ContractsConfig {
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let split = |name: &str| -> Vec<String> {
            get(name)
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .collect()
        };
        Self {
            vrf_coordinators: split("VRF_COORDINATOR_ADDRESSES"),
            request_response_coordinators: split("REQUEST_RESPONSE_COORDINATOR_ADDRESSES"),
        }
    }

    /// Parsed, non-empty addresses for `service`.
    pub fn monitored_addresses(&self, service: Service) -> Result<Vec<Address>> {
        let raw = match service {
            Service::Vrf => &self.vrf_coordinators,
            Service::RequestResponse => &self.request_response_coordinators,
            Service::DataFeed => return Ok(Vec::new()),
        };

        raw.iter()
            .filter(|addr| !addr.trim().is_empty())
            .map(|addr| {
                Address::from_str(addr.trim())
                    .with_context(|| format!("invalid {service} coordinator address `{addr}`"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_entries_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([(
            "VRF_COORDINATOR_ADDRESSES",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3, ,",
        )]);
        let config = ContractsConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.monitored_addresses(Service::Vrf).unwrap().len(), 1);
        assert!(config
            .monitored_addresses(Service::RequestResponse)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn malformed_addresses_are_reported() {
        let config = ContractsConfig {
            vrf_coordinators: vec!["0x1234".to_string()],
            request_response_coordinators: Vec::new(),
        };
        assert!(config.monitored_addresses(Service::Vrf).is_err());
    }
}
