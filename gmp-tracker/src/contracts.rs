use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::hop::Hop;

/// A recipient contract whose messages are displayed under a project name.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct KnownContract {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub addresses: Vec<String>,
    /// Network environment the addresses belong to. Unset matches every environment.
    #[serde(default)]
    pub environment: Option<String>,
}

impl KnownContract {
    fn project_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| capitalize(&self.id))
    }
}

/// Display annotations attached to a hop. They never take part in lifecycle decisions.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CustomValues {
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub recipient_address: Option<String>,
}

#[automock]
pub trait ContractRegistry: Send + Sync {
    fn lookup(&self, address: &str) -> Option<KnownContract>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticContractRegistry {
    contracts: Vec<KnownContract>,
    environment: String,
}

impl StaticContractRegistry {
    pub fn new(contracts: Vec<KnownContract>, environment: impl Into<String>) -> Self {
        Self {
            contracts,
            environment: environment.into(),
        }
    }
}

impl ContractRegistry for StaticContractRegistry {
    fn lookup(&self, address: &str) -> Option<KnownContract> {
        self.contracts
            .iter()
            .find(|contract| {
                contract
                    .addresses
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(address))
                    && contract
                        .environment
                        .as_deref()
                        .map_or(true, |env| env.eq_ignore_ascii_case(&self.environment))
            })
            .cloned()
    }
}

/// Attaches project display values to a hop whose call targets a known contract or carries an
/// interchain transfer recipient.
pub fn annotate(mut hop: Hop, registry: &dyn ContractRegistry) -> Hop {
    let Some(call) = hop.call.as_ref() else {
        return hop;
    };
    let (Some(address), Some(_)) = (
        call.return_values.destination_contract_address.as_deref(),
        call.return_values.payload.as_ref(),
    ) else {
        return hop;
    };

    let mut values = registry.lookup(address).map(|contract| CustomValues {
        project_name: Some(contract.project_name()),
        project_id: Some(contract.id),
        recipient_address: None,
    });

    let its_recipient = hop
        .its
        .interchain_transfer
        .as_ref()
        .and_then(|transfer| transfer.destination_address.clone());
    let has_recipient = values
        .as_ref()
        .is_some_and(|values| values.recipient_address.is_some());

    if let (Some(recipient), false) = (its_recipient, has_recipient) {
        values = Some(CustomValues {
            project_id: Some("its".to_string()),
            project_name: Some("ITS".to_string()),
            recipient_address: Some(recipient),
        });
    }

    if values.is_some() {
        hop.custom_values = values;
    }
    hop
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
