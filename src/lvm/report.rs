//! LVM2 JSON Reports
//!
//! Decodes `vgs`/`pvs` output produced with `--reportformat json --units b
//! --nosuffix`. LVM prints every field as a string; counts are parsed here
//! while sizes stay in host form until status projection.

use crate::domain::ports::{ObservedPhysicalVolume, ObservedVolumeGroup};
use crate::error::{Error, Result};
use serde::Deserialize;

/// Fields requested from `vgs`
pub const VG_FIELDS: &[&str] = &[
    "vg_name",
    "vg_uuid",
    "vg_sysid",
    "vg_attr",
    "vg_tags",
    "vg_extent_size",
    "vg_extent_count",
    "vg_seqno",
    "vg_size",
    "vg_free",
    "pv_count",
    "vg_missing_pv_count",
    "max_pv",
    "lv_count",
    "max_lv",
    "snap_count",
    "vg_mda_count",
    "vg_mda_used_count",
    "vg_mda_copies",
    "vg_allocation_policy",
    "vg_autoactivation",
];

/// Fields requested from `pvs`
pub const PV_FIELDS: &[&str] = &[
    "pv_name",
    "pv_uuid",
    "dev_size",
    "pv_size",
    "pv_free",
    "pv_used",
    "pv_mda_free",
    "pv_mda_size",
    "pe_start",
    "pv_mda_count",
    "pv_mda_used_count",
    "pv_tags",
    "pv_device_id",
    "pv_device_id_type",
    "pv_attr",
    "pv_major",
    "pv_minor",
];

#[derive(Debug, Deserialize)]
struct Report {
    report: Vec<ReportSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportSection {
    #[serde(default)]
    vg: Vec<VgRecord>,
    #[serde(default)]
    pv: Vec<PvRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VgRecord {
    vg_name: String,
    vg_uuid: String,
    vg_sysid: String,
    vg_attr: String,
    vg_tags: String,
    vg_extent_size: String,
    vg_extent_count: String,
    vg_seqno: String,
    vg_size: String,
    vg_free: String,
    pv_count: String,
    vg_missing_pv_count: String,
    max_pv: String,
    lv_count: String,
    max_lv: String,
    snap_count: String,
    vg_mda_count: String,
    vg_mda_used_count: String,
    vg_mda_copies: String,
    vg_allocation_policy: String,
    vg_autoactivation: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PvRecord {
    pv_name: String,
    pv_uuid: String,
    dev_size: String,
    pv_size: String,
    pv_free: String,
    pv_used: String,
    pv_mda_free: String,
    pv_mda_size: String,
    pe_start: String,
    pv_mda_count: String,
    pv_mda_used_count: String,
    pv_tags: String,
    pv_device_id: String,
    pv_device_id_type: String,
    pv_attr: String,
    pv_major: String,
    pv_minor: String,
}

/// Parse a `vgs` report into volume groups
pub fn parse_volume_groups(output: &[u8]) -> Result<Vec<ObservedVolumeGroup>> {
    let report: Report = serde_json::from_slice(output)?;
    report
        .report
        .into_iter()
        .flat_map(|section| section.vg)
        .map(VgRecord::into_observed)
        .collect()
}

/// Parse a `pvs` report into physical volumes
pub fn parse_physical_volumes(output: &[u8]) -> Result<Vec<ObservedPhysicalVolume>> {
    let report: Report = serde_json::from_slice(output)?;
    report
        .report
        .into_iter()
        .flat_map(|section| section.pv)
        .map(PvRecord::into_observed)
        .collect()
}

impl VgRecord {
    fn into_observed(self) -> Result<ObservedVolumeGroup> {
        Ok(ObservedVolumeGroup {
            extent_count: count("vg_extent_count", &self.vg_extent_count)?,
            seq_no: count("vg_seqno", &self.vg_seqno)?,
            pv_count: count("pv_count", &self.pv_count)?,
            missing_pv_count: count("vg_missing_pv_count", &self.vg_missing_pv_count)?,
            max_pv: count("max_pv", &self.max_pv)?,
            lv_count: count("lv_count", &self.lv_count)?,
            max_lv: count("max_lv", &self.max_lv)?,
            snap_count: count("snap_count", &self.snap_count)?,
            mda_count: count("vg_mda_count", &self.vg_mda_count)?,
            mda_used_count: count("vg_mda_used_count", &self.vg_mda_used_count)?,
            // "unmanaged" is reported when metadata copies are left to LVM
            mda_copies: count("vg_mda_copies", &self.vg_mda_copies).unwrap_or(0),
            auto_activation: self.vg_autoactivation == "enabled",
            name: self.vg_name,
            uuid: self.vg_uuid,
            sys_id: self.vg_sysid,
            attributes: self.vg_attr,
            tags: split_tags(&self.vg_tags),
            extent_size: self.vg_extent_size,
            size: self.vg_size,
            free: self.vg_free,
            allocation_policy: self.vg_allocation_policy,
        })
    }
}

impl PvRecord {
    fn into_observed(self) -> Result<ObservedPhysicalVolume> {
        Ok(ObservedPhysicalVolume {
            mda_count: count("pv_mda_count", &self.pv_mda_count)?,
            mda_used_count: count("pv_mda_used_count", &self.pv_mda_used_count)?,
            major: count("pv_major", &self.pv_major)?,
            minor: count("pv_minor", &self.pv_minor)?,
            tags: split_tags(&self.pv_tags),
            name: self.pv_name,
            uuid: self.pv_uuid,
            device_size: self.dev_size,
            size: self.pv_size,
            free: self.pv_free,
            used: self.pv_used,
            mda_free: self.pv_mda_free,
            mda_size: self.pv_mda_size,
            pe_start: self.pe_start,
            device_id: self.pv_device_id,
            device_id_type: self.pv_device_id_type,
            attributes: self.pv_attr,
        })
    }
}

/// Counts are empty for missing devices and `-1` for unknown major/minor
fn count(field: &str, value: &str) -> Result<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    value.parse::<i64>().map_err(|e| {
        Error::operation(
            "report",
            format!("field {} has non-numeric value {:?}: {}", field, value, e),
        )
    })
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
