//! lsblk Inventory Source
//!
//! Lists block devices with `lsblk --json --bytes` and decodes the device
//! tree into typed attributes. When running in a container the command is
//! executed in the host namespaces through `nsenter`.

use crate::domain::ports::{AttributeValue, BlockDevice, InventorySource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

// =============================================================================
// Constants
// =============================================================================

/// Columns whose values are sizes or counts, even when lsblk prints them as strings
const NUMERIC_COLUMNS: &[&str] = &[
    "SIZE", "FSAVAIL", "FSSIZE", "FSUSED", "RA", "ALIGNMENT", "MIN-IO", "OPT-IO", "PHY-SEC",
    "LOG-SEC", "RQ-SIZE", "DISC-ALN", "DISC-GRAN", "DISC-MAX", "WSAME",
];

const CHILDREN_KEY: &str = "children";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the lsblk inventory source
#[derive(Debug, Clone)]
pub struct LsblkConfig {
    pub lsblk_path: PathBuf,
    pub nsenter_path: PathBuf,
    /// Run through nsenter into the host's namespaces
    pub containerized: bool,
}

impl Default for LsblkConfig {
    fn default() -> Self {
        Self {
            lsblk_path: PathBuf::from("/usr/bin/lsblk"),
            nsenter_path: PathBuf::from("/usr/bin/nsenter"),
            containerized: false,
        }
    }
}

// =============================================================================
// lsblk Inventory
// =============================================================================

pub struct LsblkInventory {
    config: LsblkConfig,
}

impl LsblkInventory {
    pub fn new(config: LsblkConfig) -> Self {
        Self { config }
    }

    fn command(&self, columns: &[String]) -> Command {
        let lsblk_args = ["--json".to_string(), "--bytes".to_string(), "-o".to_string(), columns.join(",")];

        let mut cmd = if self.config.containerized {
            let mut cmd = Command::new(&self.config.nsenter_path);
            cmd.args(["-m", "-u", "-i", "-n", "-p", "-t", "1"])
                .arg(&self.config.lsblk_path);
            cmd
        } else {
            Command::new(&self.config.lsblk_path)
        };
        cmd.args(lsblk_args).env("LC_ALL", "C");
        cmd
    }

    /// Decode `lsblk --json` output
    pub fn parse(output: &[u8]) -> Result<Vec<BlockDevice>> {
        let json: Value = serde_json::from_slice(output)?;
        let roots = json
            .get("blockdevices")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Internal("lsblk output has no blockdevices array".into()))?;

        roots.iter().map(parse_device).collect()
    }
}

#[async_trait]
impl InventorySource for LsblkInventory {
    async fn query(&self, columns: &[String]) -> Result<Vec<BlockDevice>> {
        let output = self.command(columns).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::operation("lsblk", stderr.trim()));
        }

        let devices = Self::parse(&output.stdout)?;
        debug!(roots = devices.len(), "listed block devices");
        Ok(devices)
    }
}

fn parse_device(value: &Value) -> Result<BlockDevice> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::Internal(format!("lsblk device is not an object: {}", value)))?;

    let mut device = BlockDevice::default();
    for (key, raw) in object {
        if key == CHILDREN_KEY {
            if let Some(children) = raw.as_array() {
                device.children = children.iter().map(parse_device).collect::<Result<_>>()?;
            }
            continue;
        }

        let column = key.to_ascii_uppercase();
        if let Some(attribute) = convert_attribute(&column, raw) {
            device.attributes.insert(column, attribute);
        }
    }
    Ok(device)
}

/// Map one JSON value onto the attribute union. `null` and empty lists are absent.
fn convert_attribute(column: &str, raw: &Value) -> Option<AttributeValue> {
    match raw {
        Value::Null | Value::Object(_) => None,
        Value::Bool(b) => Some(AttributeValue::Text(if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => AttributeValue::Number(i as i128),
            None => match n.as_u64() {
                Some(u) => AttributeValue::Number(u as i128),
                None => AttributeValue::Text(n.to_string()),
            },
        }),
        Value::String(s) => {
            if NUMERIC_COLUMNS.contains(&column) {
                if let Ok(n) = s.trim().parse::<i128>() {
                    return Some(AttributeValue::Number(n));
                }
            }
            Some(AttributeValue::Text(s.clone()))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| convert_attribute(column, item))
                .map(|a| a.to_string())
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(AttributeValue::Text(parts.join(",")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = r#"{
        "blockdevices": [
            {"path": "/dev/sda", "size": 21474836480, "rota": true, "mountpoints": [null],
             "children": [
                {"path": "/dev/sda1", "size": "1073741824", "rota": true, "mountpoints": ["/boot"]},
                {"path": "/dev/sda2", "size": 20400000000, "rota": true, "mountpoints": ["/", "/home"]}
             ]},
            {"path": "/dev/nvme0n1", "size": 512110190592, "rota": false, "fstype": null}
        ]
    }"#;

    #[test]
    fn test_parse_tree() {
        let devices = LsblkInventory::parse(OUTPUT.as_bytes()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].children.len(), 2);
        assert_eq!(BlockDevice::flatten(&devices).len(), 4);
    }

    #[test]
    fn test_attribute_typing() {
        let devices = LsblkInventory::parse(OUTPUT.as_bytes()).unwrap();
        let sda = &devices[0];
        let sda1 = &sda.children[0];
        let nvme = &devices[1];

        assert_eq!(sda.get("SIZE"), Some(&AttributeValue::Number(21474836480)));
        assert_eq!(sda1.get("size"), Some(&AttributeValue::Number(1073741824)));
        assert_eq!(sda.get("ROTA"), Some(&AttributeValue::Text("1".into())));
        assert_eq!(nvme.get("ROTA"), Some(&AttributeValue::Text("0".into())));
        assert_eq!(sda.get("MOUNTPOINTS"), None);
        assert_eq!(
            sda.children[1].get("MOUNTPOINTS"),
            Some(&AttributeValue::Text("/,/home".into()))
        );
        assert_eq!(nvme.get("FSTYPE"), None);
    }

    #[test]
    fn test_parse_rejects_unexpected_output() {
        assert!(LsblkInventory::parse(b"{}").is_err());
        assert!(LsblkInventory::parse(b"not json").is_err());
    }

    #[test]
    fn test_command_line() {
        let inventory = LsblkInventory::new(LsblkConfig {
            containerized: true,
            ..Default::default()
        });
        let cmd = inventory.command(&["PATH".into(), "SIZE".into()]);
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "/usr/bin/nsenter");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(
            args,
            vec!["-m", "-u", "-i", "-n", "-p", "-t", "1", "/usr/bin/lsblk", "--json", "--bytes", "-o", "PATH,SIZE"]
        );
    }
}
