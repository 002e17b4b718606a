//! Domain Ports - Core trait definitions for the volume group operator
//!
//! These traits define the boundaries between the reconciliation logic and
//! the systems it drives: the LVM2 subsystem on the host, the block device
//! inventory, and the store that holds VolumeGroup resources.

use crate::crd::{AllocationPolicy, AutoActivation, VolumeGroup};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Observed State
// =============================================================================

/// Volume group as reported by the host. Sizes keep the host representation
/// (decimal bytes) until they are projected into the status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedVolumeGroup {
    pub name: String,
    pub uuid: String,
    pub sys_id: String,
    pub attributes: String,
    pub tags: Vec<String>,
    pub extent_size: String,
    pub extent_count: i64,
    pub seq_no: i64,
    pub size: String,
    pub free: String,
    pub pv_count: i64,
    pub missing_pv_count: i64,
    pub max_pv: i64,
    pub lv_count: i64,
    pub max_lv: i64,
    pub snap_count: i64,
    pub mda_count: i64,
    pub mda_used_count: i64,
    pub mda_copies: i64,
    /// Host name of the policy, e.g. `normal` or `cling_by_tags`
    pub allocation_policy: String,
    pub auto_activation: bool,
}

/// Physical volume as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedPhysicalVolume {
    pub name: String,
    pub uuid: String,
    pub device_size: String,
    pub size: String,
    pub free: String,
    pub used: String,
    pub mda_free: String,
    pub mda_size: String,
    pub pe_start: String,
    pub mda_count: i64,
    pub mda_used_count: i64,
    pub tags: Vec<String>,
    pub device_id: String,
    pub device_id_type: String,
    pub attributes: String,
    pub major: i64,
    pub minor: i64,
}

/// Snapshot of one volume group and its members, taken once per pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub volume_group: ObservedVolumeGroup,
    pub physical_volumes: Vec<ObservedPhysicalVolume>,
}

impl ObservedState {
    /// Device paths of the current members
    pub fn member_devices(&self) -> Vec<String> {
        self.physical_volumes.iter().map(|pv| pv.name.clone()).collect()
    }
}

// =============================================================================
// Subsystem Requests
// =============================================================================

/// Parameters for creating a volume group
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOptions {
    pub name: String,
    pub physical_volumes: Vec<String>,
    pub tags: Vec<String>,
    pub auto_activation: AutoActivation,
    pub zero: Option<bool>,
    pub allocation_policy: Option<AllocationPolicy>,
    pub maximum_physical_volumes: Option<u32>,
    pub maximum_logical_volumes: Option<u32>,
    /// Host size arguments, e.g. `4194304b`
    pub physical_extent_size: Option<String>,
    pub metadata_size: Option<String>,
    pub data_alignment: Option<String>,
    pub data_alignment_offset: Option<String>,
    pub devices: Vec<String>,
    pub devices_file: Option<String>,
}

/// A single attribute mutation of an existing volume group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeChange {
    AddTags(Vec<String>),
    DelTags(Vec<String>),
    MaximumPhysicalVolumes(u32),
    MaximumLogicalVolumes(u32),
    AllocationPolicy(AllocationPolicy),
    AutoActivation(bool),
}

impl std::fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeChange::AddTags(tags) => write!(f, "add tags {}", tags.join(",")),
            AttributeChange::DelTags(tags) => write!(f, "delete tags {}", tags.join(",")),
            AttributeChange::MaximumPhysicalVolumes(n) => write!(f, "maximum physical volumes {}", n),
            AttributeChange::MaximumLogicalVolumes(n) => write!(f, "maximum logical volumes {}", n),
            AttributeChange::AllocationPolicy(p) => write!(f, "allocation policy {}", p),
            AttributeChange::AutoActivation(on) => write!(f, "auto activation {}", on),
        }
    }
}

// =============================================================================
// Volume Group Subsystem Port
// =============================================================================

/// Port for the host volume group subsystem (LVM2)
#[async_trait]
pub trait VolumeGroupSubsystem: Send + Sync {
    /// Look up a volume group by name. Absence is `Error::SubsystemNotFound`.
    async fn volume_group(&self, name: &str) -> Result<ObservedVolumeGroup>;

    /// Look up a volume group by UUID
    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<ObservedVolumeGroup>>;

    /// List the physical volumes of a volume group
    async fn physical_volumes(&self, name: &str) -> Result<Vec<ObservedPhysicalVolume>>;

    async fn create(&self, options: &CreateOptions) -> Result<()>;

    /// Remove a volume group. Absence is not an error.
    async fn remove(&self, name: &str) -> Result<()>;

    async fn extend(&self, name: &str, devices: &[String]) -> Result<()>;

    async fn reduce(&self, name: &str, devices: &[String], force: bool) -> Result<()>;

    /// Drop physical volumes the host can no longer find
    async fn reduce_missing(&self, name: &str, force: bool) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn change(&self, name: &str, change: &AttributeChange) -> Result<()>;

    /// Move allocated extents off `device` onto any of `destinations`
    async fn move_data(&self, device: &str, destinations: &[String]) -> Result<()>;
}

// =============================================================================
// Inventory Port
// =============================================================================

/// Value of one inventory attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Text(String),
    Number(i128),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A block device and its descendants (partitions, holders)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Attributes keyed by upper-case column name. Absent columns are missing.
    pub attributes: BTreeMap<String, AttributeValue>,
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    pub fn get(&self, column: &str) -> Option<&AttributeValue> {
        self.attributes.get(&column.to_ascii_uppercase())
    }

    /// This device followed by all descendants, depth first
    pub fn flatten(devices: &[BlockDevice]) -> Vec<&BlockDevice> {
        let mut flat = Vec::new();
        for device in devices {
            flat.push(device);
            flat.extend(BlockDevice::flatten(&device.children));
        }
        flat
    }
}

/// Port for querying the block device inventory
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Query the device tree with exactly the given columns
    async fn query(&self, columns: &[String]) -> Result<Vec<BlockDevice>>;
}

// =============================================================================
// Resource Store Port
// =============================================================================

/// Identifies a VolumeGroup resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Port for reading and writing VolumeGroup resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the current record, `None` if it no longer exists
    async fn get(&self, key: &ResourceKey) -> Result<Option<VolumeGroup>>;

    /// Write metadata and spec (finalizers live here)
    async fn update(&self, vg: &VolumeGroup) -> Result<VolumeGroup>;

    /// Write the status subresource
    async fn update_status(&self, vg: &VolumeGroup) -> Result<VolumeGroup>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type VolumeGroupSubsystemRef = Arc<dyn VolumeGroupSubsystem>;
pub type InventorySourceRef = Arc<dyn InventorySource>;
pub type ResourceStoreRef = Arc<dyn ResourceStore>;
