//! Device Selector
//!
//! Resolves a [`PvSelector`] against the live block device inventory.
//! Terms are ORed, requirements inside a term are ANDed, and the result is
//! the sorted, deduplicated list of matching device paths.

use crate::crd::{LsblkRequirement, PvSelector, SelectorOperator};
use crate::domain::ports::{AttributeValue, BlockDevice, InventorySourceRef};
use crate::quantity::parse_exact;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Column holding the device node path, always queried
pub const COLUMN_PATH: &str = "PATH";

// =============================================================================
// Errors
// =============================================================================

#[derive(Error, Debug)]
pub enum SelectorError {
    #[error("value {value:?} of requirement on {key} is not a valid quantity: {reason}")]
    MalformedQuantity {
        key: String,
        value: String,
        reason: String,
    },

    #[error("column {key} of {device} holds {found:?}, expected a {expected}")]
    TypeMismatch {
        key: String,
        device: String,
        expected: &'static str,
        found: String,
    },

    #[error("requirement {key} {operator} is invalid: {reason}")]
    InvalidRequirement {
        key: String,
        operator: SelectorOperator,
        reason: String,
    },

    #[error("selected block device is missing the PATH column")]
    MissingPath,

    #[error("failed to list block devices for selector translation: {0}")]
    Inventory(String),
}

// =============================================================================
// Device Selector
// =============================================================================

/// Evaluates selectors against an inventory source
pub struct DeviceSelector {
    inventory: InventorySourceRef,
}

impl DeviceSelector {
    pub fn new(inventory: InventorySourceRef) -> Self {
        Self { inventory }
    }

    /// Query the inventory once for the referenced columns and select
    /// matching devices. A selector without terms selects nothing and does
    /// not touch the inventory.
    pub async fn evaluate(&self, selector: &PvSelector) -> Result<Vec<String>, SelectorError> {
        if selector.pv_selector_terms.is_empty() {
            return Ok(Vec::new());
        }

        let columns = required_columns(selector);
        let devices = self
            .inventory
            .query(&columns)
            .await
            .map_err(|e| SelectorError::Inventory(e.to_string()))?;

        debug!(
            columns = %columns.join(","),
            roots = devices.len(),
            "devices discovered from inventory"
        );

        select(selector, &devices)
    }
}

/// Distinct columns referenced by the selector plus the path column, sorted
pub fn required_columns(selector: &PvSelector) -> Vec<String> {
    let mut columns = BTreeSet::new();
    columns.insert(COLUMN_PATH.to_string());
    for term in &selector.pv_selector_terms {
        for requirement in &term.match_lsblk {
            columns.insert(requirement.key.to_ascii_uppercase());
        }
    }
    columns.into_iter().collect()
}

/// Select matching device paths from an already queried device tree
pub fn select(selector: &PvSelector, roots: &[BlockDevice]) -> Result<Vec<String>, SelectorError> {
    if selector.pv_selector_terms.is_empty() {
        return Ok(Vec::new());
    }

    let devices = BlockDevice::flatten(roots);
    let mut selected = BTreeSet::new();

    for term in &selector.pv_selector_terms {
        for device in &devices {
            let mut matches = 0;
            for requirement in &term.match_lsblk {
                if matches_requirement(device, requirement)? {
                    matches += 1;
                }
            }
            if matches == term.match_lsblk.len() {
                match device.get(COLUMN_PATH) {
                    Some(AttributeValue::Text(path)) => {
                        selected.insert(path.clone());
                    }
                    _ => return Err(SelectorError::MissingPath),
                }
            }
        }
    }

    Ok(selected.into_iter().collect())
}

fn matches_requirement(
    device: &BlockDevice,
    requirement: &LsblkRequirement,
) -> Result<bool, SelectorError> {
    let value = device.get(&requirement.key);

    match requirement.operator {
        SelectorOperator::Exists => Ok(value.is_some()),
        SelectorOperator::DoesNotExist => Ok(value.is_none()),
        SelectorOperator::In => match value {
            None => Ok(false),
            Some(AttributeValue::Text(text)) => {
                Ok(requirement.values.iter().any(|v| v == text))
            }
            Some(found) => Err(SelectorError::TypeMismatch {
                key: requirement.key.clone(),
                device: device_label(device),
                expected: "string",
                found: found.to_string(),
            }),
        },
        SelectorOperator::Gt => {
            let [threshold] = requirement.values.as_slice() else {
                return Err(SelectorError::InvalidRequirement {
                    key: requirement.key.clone(),
                    operator: requirement.operator,
                    reason: format!("expected exactly one value, got {}", requirement.values.len()),
                });
            };
            let threshold =
                parse_exact(threshold).map_err(|reason| SelectorError::MalformedQuantity {
                    key: requirement.key.clone(),
                    value: threshold.clone(),
                    reason,
                })?;

            match value {
                None => Ok(false),
                Some(AttributeValue::Number(n)) => Ok(threshold.is_exceeded_by(*n)),
                Some(found) => Err(SelectorError::TypeMismatch {
                    key: requirement.key.clone(),
                    device: device_label(device),
                    expected: "number",
                    found: found.to_string(),
                }),
            }
        }
    }
}

fn device_label(device: &BlockDevice) -> String {
    device
        .get(COLUMN_PATH)
        .map(|p| p.to_string())
        .unwrap_or_else(|| "<unknown device>".to_string())
}
