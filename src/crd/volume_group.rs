//! VolumeGroup CRD
//!
//! Declares an LVM2 volume group that should exist on one node, the devices
//! that belong to it (either listed or selected from the block device
//! inventory) and its mutable attributes.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer that guards removal of the volume group from the host
pub const VOLUME_GROUP_FINALIZER: &str = "topolvm.io/volumegroup-removal-on-node";

// =============================================================================
// VolumeGroup CRD
// =============================================================================

/// VolumeGroup declares a volume group on a single node.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "topolvm.io",
    version = "v1alpha1",
    kind = "VolumeGroup",
    plural = "volumegroups",
    shortname = "vg",
    status = "VolumeGroupStatus",
    namespaced,
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeName"}"#,
    printcolumn = r#"{"name": "Host Name", "type": "string", "jsonPath": ".status.name"}"#,
    printcolumn = r#"{"name": "PVs", "type": "integer", "jsonPath": ".status.pvCount"}"#,
    printcolumn = r#"{"name": "Size", "type": "string", "jsonPath": ".status.size"}"#,
    printcolumn = r#"{"name": "Free", "type": "string", "jsonPath": ".status.free"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupSpec {
    /// Node that owns the volume group. Immutable once set.
    pub node_name: String,

    /// Name of the volume group on the host. Defaults to the resource UID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_on_node: Option<String>,

    /// Explicit list of physical volume devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvs: Option<Vec<String>>,

    /// Dynamic device selection from the block device inventory.
    /// Ignored when `pvs` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv_selector: Option<PvSelector>,

    /// Restricts the devices LVM may use while creating the volume group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<String>>,

    /// Devices file LVM should consult while creating the volume group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices_file: Option<String>,

    /// Tags on the volume group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_logical_volumes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_physical_volumes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_extent_size: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_size: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_alignment: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_alignment_offset: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_policy: Option<AllocationPolicy>,

    /// Wipe signatures on new physical volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero: Option<bool>,

    /// Unset leaves the host default in place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_activation: Option<bool>,

    #[serde(default)]
    pub device_loss_synchronization_policy: DeviceLossPolicy,

    #[serde(default)]
    pub device_removal_volume_policy: DeviceRemovalPolicy,

    /// Where data is moved to under the `MoveAndReduce` removal policy
    #[serde(default)]
    pub device_removal_move_target: MoveTarget,
}

// =============================================================================
// Selector
// =============================================================================

/// OR of selector terms
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvSelector {
    #[serde(default)]
    pub pv_selector_terms: Vec<PvSelectorTerm>,
}

/// AND of requirements. An empty term matches every device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvSelectorTerm {
    #[serde(default, rename = "matchLSBLK")]
    pub match_lsblk: Vec<LsblkRequirement>,
}

/// A requirement on one lsblk column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LsblkRequirement {
    /// lsblk column name, e.g. `PATH`, `SIZE`, `ROTA`
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SelectorOperator {
    In,
    Exists,
    DoesNotExist,
    Gt,
}

impl std::fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectorOperator::In => write!(f, "In"),
            SelectorOperator::Exists => write!(f, "Exists"),
            SelectorOperator::DoesNotExist => write!(f, "DoesNotExist"),
            SelectorOperator::Gt => write!(f, "Gt"),
        }
    }
}

// =============================================================================
// Policies
// =============================================================================

/// LVM allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AllocationPolicy {
    Contiguous,
    Cling,
    ClingByTags,
    Normal,
    Anywhere,
    Inherit,
}

impl AllocationPolicy {
    /// Name used by the LVM tools
    pub fn as_host_str(&self) -> &'static str {
        match self {
            AllocationPolicy::Contiguous => "contiguous",
            AllocationPolicy::Cling => "cling",
            AllocationPolicy::ClingByTags => "cling_by_tags",
            AllocationPolicy::Normal => "normal",
            AllocationPolicy::Anywhere => "anywhere",
            AllocationPolicy::Inherit => "inherit",
        }
    }
}

impl std::fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_host_str())
    }
}

/// What to do when the volume group reports missing physical volumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeviceLossPolicy {
    #[default]
    Fail,
    RemoveMissing,
    ForceRemoveMissing,
}

/// How devices that left the desired set are removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeviceRemovalPolicy {
    #[default]
    Reduce,
    ForceReduce,
    MoveAndReduce,
}

/// Destination candidates for `MoveAndReduce`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum MoveTarget {
    /// Every desired device, including devices added in the same pass
    #[default]
    Desired,
    /// Only desired devices that were already members before the pass
    Retained,
}

/// Auto-activation setting after resolving the optional spec field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoActivation {
    Unset,
    Enabled,
    Disabled,
}

impl From<Option<bool>> for AutoActivation {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => AutoActivation::Unset,
            Some(true) => AutoActivation::Enabled,
            Some(false) => AutoActivation::Disabled,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of the volume group on its node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, rename = "sysid", skip_serializing_if = "String::is_empty")]
    pub sys_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attributes: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent_size: Option<Quantity>,
    #[serde(default)]
    pub extent_count: i64,
    #[serde(default, rename = "seqno")]
    pub seq_no: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<Quantity>,

    #[serde(default)]
    pub pv_count: i64,
    #[serde(default)]
    pub missing_pv_count: i64,
    #[serde(default)]
    pub max_pv: i64,
    #[serde(default)]
    pub lv_count: i64,
    #[serde(default)]
    pub max_lv: i64,
    #[serde(default)]
    pub snap_count: i64,

    #[serde(default)]
    pub mda_count: i64,
    #[serde(default)]
    pub mda_used_count: i64,
    #[serde(default)]
    pub mda_copies: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub physical_volumes: Vec<PhysicalVolumeStatus>,

    #[serde(default)]
    pub conditions: Vec<VolumeGroupCondition>,
}

/// Observed state of one physical volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalVolumeStatus {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_area_free: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_area_size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_extent_start: Option<Quantity>,
    #[serde(default)]
    pub metadata_area_count: i64,
    #[serde(default)]
    pub metadata_area_used_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attributes: String,
    #[serde(default)]
    pub major: i64,
    #[serde(default)]
    pub minor: i64,
}

/// Condition status value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Volume group condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupCondition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Generation of the spec this condition was computed against
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// Implementations
// =============================================================================

impl VolumeGroup {
    /// Name of the volume group on the host
    pub fn name_on_node(&self) -> String {
        match &self.spec.name_on_node {
            Some(name) => name.clone(),
            None => self.uid().unwrap_or_else(|| self.name_any()),
        }
    }

    /// Whether deletion of the resource was requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == VOLUME_GROUP_FINALIZER)
    }

    /// Add the removal finalizer, returning whether the resource changed
    pub fn add_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.finalizers_mut().push(VOLUME_GROUP_FINALIZER.to_string());
        true
    }

    /// Remove the removal finalizer, returning whether the resource changed
    pub fn remove_finalizer(&mut self) -> bool {
        let before = self.finalizers().len();
        self.finalizers_mut().retain(|f| f != VOLUME_GROUP_FINALIZER);
        before != self.finalizers().len()
    }

    /// Desired tags, empty when unset
    pub fn desired_tags(&self) -> &[String] {
        self.spec.tags.as_deref().unwrap_or_default()
    }

    pub fn status_uuid(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.uuid.as_str())
            .filter(|uuid| !uuid.is_empty())
    }
}

impl VolumeGroupStatus {
    /// Set a condition, replacing any condition of the same type.
    /// The transition time only moves when the status value changes.
    pub fn set_condition(&mut self, mut condition: VolumeGroupCondition) {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.status == condition.status && existing.last_transition_time.is_some() {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
    }

    pub fn condition(&self, r#type: &str) -> Option<&VolumeGroupCondition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}
