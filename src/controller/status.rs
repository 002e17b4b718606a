//! Status Projector
//!
//! Converts an observed volume group into the resource status and builds the
//! `VolumeGroupSyncedOnNode` condition.

use crate::crd::{
    ConditionStatus, PhysicalVolumeStatus, VolumeGroupCondition, VolumeGroupStatus,
};
use crate::domain::ports::{ObservedPhysicalVolume, ObservedState};
use crate::error::Result;
use crate::quantity::host_size_to_quantity;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const CONDITION_SYNCED_ON_NODE: &str = "VolumeGroupSyncedOnNode";

pub const REASON_SYNC_PENDING: &str = "VolumeGroupSyncPending";
pub const REASON_SYNCED: &str = "VolumeGroupSynced";
pub const REASON_SYNC_FAILED: &str = "VolumeGroupSyncFailed";

pub const MESSAGE_SYNC_PENDING: &str = "The volume group is waiting to be synchronized with the node.";
pub const MESSAGE_SYNCED: &str =
    "The volume group is present on the node and discoverable in the lvm2 subsystem.";

/// Project observed state into a fresh status without conditions.
///
/// Any unparseable size aborts the projection.
pub fn project(observed: &ObservedState) -> Result<VolumeGroupStatus> {
    let vg = &observed.volume_group;

    let physical_volumes = observed
        .physical_volumes
        .iter()
        .map(project_physical_volume)
        .collect::<Result<Vec<_>>>()?;

    Ok(VolumeGroupStatus {
        name: vg.name.clone(),
        uuid: vg.uuid.clone(),
        sys_id: vg.sys_id.clone(),
        attributes: vg.attributes.clone(),
        tags: vg.tags.clone(),
        extent_size: Some(host_size_to_quantity("extentSize", &vg.extent_size)?),
        extent_count: vg.extent_count,
        seq_no: vg.seq_no,
        size: Some(host_size_to_quantity("size", &vg.size)?),
        free: Some(host_size_to_quantity("free", &vg.free)?),
        pv_count: vg.pv_count,
        missing_pv_count: vg.missing_pv_count,
        max_pv: vg.max_pv,
        lv_count: vg.lv_count,
        max_lv: vg.max_lv,
        snap_count: vg.snap_count,
        mda_count: vg.mda_count,
        mda_used_count: vg.mda_used_count,
        mda_copies: vg.mda_copies,
        physical_volumes,
        conditions: Vec::new(),
    })
}

fn project_physical_volume(pv: &ObservedPhysicalVolume) -> Result<PhysicalVolumeStatus> {
    Ok(PhysicalVolumeStatus {
        name: pv.name.clone(),
        uuid: pv.uuid.clone(),
        device_size: member_size("physicalVolumes.deviceSize", &pv.device_size)?,
        size: member_size("physicalVolumes.size", &pv.size)?,
        free: member_size("physicalVolumes.free", &pv.free)?,
        used: member_size("physicalVolumes.used", &pv.used)?,
        metadata_area_free: member_size("physicalVolumes.metadataAreaFree", &pv.mda_free)?,
        metadata_area_size: member_size("physicalVolumes.metadataAreaSize", &pv.mda_size)?,
        physical_extent_start: member_size("physicalVolumes.physicalExtentStart", &pv.pe_start)?,
        metadata_area_count: pv.mda_count,
        metadata_area_used_count: pv.mda_used_count,
        tags: pv.tags.clone(),
        device_id: pv.device_id.clone(),
        device_id_type: pv.device_id_type.clone(),
        attributes: pv.attributes.clone(),
        major: pv.major,
        minor: pv.minor,
    })
}

/// Missing devices report empty sizes
fn member_size(field: &str, size: &str) -> Result<Option<Quantity>> {
    if size.trim().is_empty() {
        return Ok(None);
    }
    host_size_to_quantity(field, size).map(Some)
}

// =============================================================================
// Conditions
// =============================================================================

fn synced_condition(
    status: ConditionStatus,
    generation: Option<i64>,
    reason: &str,
    message: String,
) -> VolumeGroupCondition {
    VolumeGroupCondition {
        r#type: CONDITION_SYNCED_ON_NODE.to_string(),
        status,
        observed_generation: generation,
        last_transition_time: Some(Utc::now()),
        reason: reason.to_string(),
        message,
    }
}

pub fn synced_pending(generation: Option<i64>) -> VolumeGroupCondition {
    synced_condition(
        ConditionStatus::Unknown,
        generation,
        REASON_SYNC_PENDING,
        MESSAGE_SYNC_PENDING.to_string(),
    )
}

pub fn synced_ok(generation: Option<i64>) -> VolumeGroupCondition {
    synced_condition(
        ConditionStatus::True,
        generation,
        REASON_SYNCED,
        MESSAGE_SYNCED.to_string(),
    )
}

pub fn synced_failed(generation: Option<i64>, error: &impl std::fmt::Display) -> VolumeGroupCondition {
    synced_condition(
        ConditionStatus::False,
        generation,
        REASON_SYNC_FAILED,
        error.to_string(),
    )
}

pub fn creation_failed(generation: Option<i64>, error: &impl std::fmt::Display) -> VolumeGroupCondition {
    synced_condition(
        ConditionStatus::False,
        generation,
        REASON_SYNC_FAILED,
        format!("volume group creation failed: {}", error),
    )
}
