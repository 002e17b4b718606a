//! State Diff/Sync Engine
//!
//! Each attribute of a volume group is reconciled by a pure planner that
//! turns `(desired, observed)` into a list of [`Operation`]s. The engine runs
//! the planners in a fixed order and applies their operations through the
//! subsystem port:
//!
//! 1. tags
//! 2. membership
//! 3. volume count ceilings
//! 4. allocation policy
//! 5. auto-activation
//! 6. rename
//!
//! A failing operation ends its own sub-sync only. Failures of all sub-syncs
//! are returned together as one [`Error::Aggregate`].

use crate::controller::metrics::ReconcileMetrics;
use crate::crd::{
    AllocationPolicy, AutoActivation, DeviceRemovalPolicy, MoveTarget, VolumeGroup,
};
use crate::domain::ports::{
    AttributeChange, ObservedState, ObservedVolumeGroup, VolumeGroupSubsystemRef,
};
use crate::error::{Error, Result};
use crate::inventory::DeviceSelector;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Operations
// =============================================================================

/// One imperative step against the host volume group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Change(AttributeChange),
    Extend(Vec<String>),
    Reduce { devices: Vec<String>, force: bool },
    MoveData { device: String, destinations: Vec<String> },
    Rename { to: String },
}

impl Operation {
    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Change(_) => "change",
            Operation::Extend(_) => "extend",
            Operation::Reduce { .. } => "reduce",
            Operation::MoveData { .. } => "move",
            Operation::Rename { .. } => "rename",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Change(change) => write!(f, "{}", change),
            Operation::Extend(devices) => write!(f, "extend with {}", devices.join(",")),
            Operation::Reduce { devices, force } => {
                write!(f, "reduce {} (force: {})", devices.join(","), force)
            }
            Operation::MoveData {
                device,
                destinations,
            } => write!(f, "move {} to {}", device, destinations.join(",")),
            Operation::Rename { to } => write!(f, "rename to {}", to),
        }
    }
}

// =============================================================================
// Planners
// =============================================================================

/// Elements of `left` missing from `right`, in `left` order without repeats
fn difference(left: &[String], right: &[String]) -> Vec<String> {
    let right: BTreeSet<&String> = right.iter().collect();
    let mut seen = BTreeSet::new();
    left.iter()
        .filter(|x| !right.contains(x) && seen.insert(*x))
        .cloned()
        .collect()
}

/// Additions first, then removals, one call each
pub fn plan_tags(desired: &[String], observed: &[String]) -> Vec<Operation> {
    let mut ops = Vec::new();
    let add = difference(desired, observed);
    if !add.is_empty() {
        ops.push(Operation::Change(AttributeChange::AddTags(add)));
    }
    let remove = difference(observed, desired);
    if !remove.is_empty() {
        ops.push(Operation::Change(AttributeChange::DelTags(remove)));
    }
    ops
}

/// Extend with new devices, then reduce devices that left the desired set
pub fn plan_membership(
    desired: &[String],
    observed: &[String],
    policy: DeviceRemovalPolicy,
    move_target: MoveTarget,
) -> Vec<Operation> {
    let mut ops = Vec::new();

    let add = difference(desired, observed);
    if !add.is_empty() {
        ops.push(Operation::Extend(add));
    }

    let remove = difference(observed, desired);
    if remove.is_empty() {
        return ops;
    }

    if policy == DeviceRemovalPolicy::MoveAndReduce {
        let destinations = match move_target {
            MoveTarget::Desired => difference(desired, &[]),
            MoveTarget::Retained => difference(desired, &difference(desired, observed)),
        };
        for device in &remove {
            ops.push(Operation::MoveData {
                device: device.clone(),
                destinations: destinations.clone(),
            });
        }
    }

    ops.push(Operation::Reduce {
        devices: remove,
        force: policy == DeviceRemovalPolicy::ForceReduce,
    });
    ops
}

/// Ceilings are applied only when set and different
pub fn plan_ceilings(
    max_pv: Option<u32>,
    max_lv: Option<u32>,
    observed: &ObservedVolumeGroup,
) -> Vec<Operation> {
    let mut ops = Vec::new();
    if let Some(max) = max_pv {
        if i64::from(max) != observed.max_pv {
            ops.push(Operation::Change(AttributeChange::MaximumPhysicalVolumes(max)));
        }
    }
    if let Some(max) = max_lv {
        if i64::from(max) != observed.max_lv {
            ops.push(Operation::Change(AttributeChange::MaximumLogicalVolumes(max)));
        }
    }
    ops
}

pub fn plan_allocation_policy(
    desired: Option<AllocationPolicy>,
    observed: &ObservedVolumeGroup,
) -> Vec<Operation> {
    match desired {
        Some(policy) if policy.as_host_str() != observed.allocation_policy => {
            vec![Operation::Change(AttributeChange::AllocationPolicy(policy))]
        }
        _ => Vec::new(),
    }
}

/// `Unset` leaves the host default alone
pub fn plan_auto_activation(desired: AutoActivation, observed: bool) -> Vec<Operation> {
    let wanted = match desired {
        AutoActivation::Unset => return Vec::new(),
        AutoActivation::Enabled => true,
        AutoActivation::Disabled => false,
    };
    if wanted == observed {
        Vec::new()
    } else {
        vec![Operation::Change(AttributeChange::AutoActivation(wanted))]
    }
}

pub fn plan_rename(desired: &str, observed: &str) -> Vec<Operation> {
    if desired == observed {
        Vec::new()
    } else {
        vec![Operation::Rename {
            to: desired.to_string(),
        }]
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Applies planned operations through the subsystem port
pub struct SyncEngine {
    subsystem: VolumeGroupSubsystemRef,
    selector: DeviceSelector,
    metrics: Arc<ReconcileMetrics>,
}

impl SyncEngine {
    pub fn new(
        subsystem: VolumeGroupSubsystemRef,
        selector: DeviceSelector,
        metrics: Arc<ReconcileMetrics>,
    ) -> Self {
        Self {
            subsystem,
            selector,
            metrics,
        }
    }

    pub fn subsystem(&self) -> &VolumeGroupSubsystemRef {
        &self.subsystem
    }

    pub fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// Look up the volume group by name, then by the UUID recorded in status.
    /// `None` means the volume group does not exist on the host.
    pub async fn observe(&self, vg: &VolumeGroup, name: &str) -> Result<Option<ObservedState>> {
        let volume_group = match self.subsystem.volume_group(name).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                let Some(uuid) = vg.status_uuid() else {
                    return Ok(None);
                };
                match self.subsystem.find_by_uuid(uuid).await? {
                    Some(found) => {
                        debug!(vg = %name, host_name = %found.name, "found volume group by uuid");
                        found
                    }
                    None => return Ok(None),
                }
            }
            Err(e) => return Err(e),
        };

        let physical_volumes = self.subsystem.physical_volumes(&volume_group.name).await?;
        Ok(Some(ObservedState {
            volume_group,
            physical_volumes,
        }))
    }

    /// Desired member devices: the explicit list, else the selector result
    pub async fn desired_devices(&self, vg: &VolumeGroup) -> Result<Vec<String>> {
        if let Some(pvs) = &vg.spec.pvs {
            return Ok(difference(pvs, &[]));
        }
        match &vg.spec.pv_selector {
            Some(selector) => Ok(self.selector.evaluate(selector).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Run every sub-sync and return all failures combined
    pub async fn sync(&self, vg: &VolumeGroup, observed: &ObservedState) -> Result<()> {
        let spec = &vg.spec;
        let current = &observed.volume_group;
        let name = current.name.as_str();
        let mut errors = Vec::new();

        let tags = plan_tags(vg.desired_tags(), &current.tags);
        self.record(self.apply("tags", name, tags).await, &mut errors);

        let membership = match self.desired_devices(vg).await {
            Ok(desired) => {
                let ops = plan_membership(
                    &desired,
                    &observed.member_devices(),
                    spec.device_removal_volume_policy,
                    spec.device_removal_move_target,
                );
                self.apply("membership", name, ops).await
            }
            Err(e) => Err(e),
        };
        self.record(membership, &mut errors);

        let ceilings = plan_ceilings(
            spec.maximum_physical_volumes,
            spec.maximum_logical_volumes,
            current,
        );
        self.record(self.apply("ceilings", name, ceilings).await, &mut errors);

        let policy = plan_allocation_policy(spec.allocation_policy, current);
        self.record(self.apply("allocation policy", name, policy).await, &mut errors);

        let activation = plan_auto_activation(spec.auto_activation.into(), current.auto_activation);
        self.record(self.apply("auto activation", name, activation).await, &mut errors);

        let rename = plan_rename(&vg.name_on_node(), name);
        self.record(self.apply("rename", name, rename).await, &mut errors);

        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record(&self, result: Result<()>, errors: &mut Vec<Error>) {
        if let Err(e) = result {
            errors.push(e);
        }
    }

    /// Apply operations in order, stopping at the first failure
    async fn apply(&self, sub_sync: &str, name: &str, ops: Vec<Operation>) -> Result<()> {
        if ops.is_empty() {
            debug!(vg = %name, sub_sync, "in sync");
            return Ok(());
        }

        for op in ops {
            info!(vg = %name, sub_sync, operation = %op, "applying");
            self.metrics.record_operation(op.kind());
            match &op {
                Operation::Change(change) => self.subsystem.change(name, change).await?,
                Operation::Extend(devices) => self.subsystem.extend(name, devices).await?,
                Operation::Reduce { devices, force } => {
                    self.subsystem.reduce(name, devices, *force).await?
                }
                Operation::MoveData {
                    device,
                    destinations,
                } => self.subsystem.move_data(device, destinations).await?,
                Operation::Rename { to } => self.subsystem.rename(name, to).await?,
            }
        }
        Ok(())
    }
}
