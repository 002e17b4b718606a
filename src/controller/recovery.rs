//! Failure Classifier & Recovery Policy
//!
//! Recognises missing-device failures inside (possibly aggregated) sync
//! errors and applies the volume group's device loss policy.

use crate::controller::sync::SyncEngine;
use crate::crd::{DeviceLossPolicy, VolumeGroup};
use crate::domain::ports::ObservedState;
use crate::error::{DeviceLossDetails, Error, Result};
use tracing::{info, warn};

/// Result of inspecting a sync error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The host reported missing physical volumes
    DeviceLoss(DeviceLossDetails),
    Other,
}

impl Classification {
    pub fn is_device_loss(&self) -> bool {
        matches!(self, Classification::DeviceLoss(_))
    }
}

/// Classify an error, looking through aggregates for the first device loss
pub fn classify(error: &Error) -> Classification {
    match error {
        Error::DeviceLossDetected { details, .. } => Classification::DeviceLoss(details.clone()),
        Error::Aggregate(errors) => errors
            .iter()
            .map(classify)
            .find(Classification::is_device_loss)
            .unwrap_or(Classification::Other),
        _ => Classification::Other,
    }
}

/// Run the sync engine and, on device loss, apply the device loss policy.
///
/// `RemoveMissing` and `ForceRemoveMissing` drop the missing physical volumes
/// and sync once more against a fresh observation. The second sync is never
/// recovered again.
pub async fn sync_with_recovery(
    engine: &SyncEngine,
    vg: &VolumeGroup,
    observed: &ObservedState,
) -> Result<()> {
    let error = match engine.sync(vg, observed).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    let Classification::DeviceLoss(details) = classify(&error) else {
        return Err(error);
    };

    let force = match vg.spec.device_loss_synchronization_policy {
        DeviceLossPolicy::Fail => {
            warn!(
                vg = %observed.volume_group.name,
                missing_vg = ?details.missing_vg,
                missing_pv = ?details.missing_pv,
                last_write_path = ?details.last_write_path,
                "device loss detected"
            );
            return Err(error);
        }
        DeviceLossPolicy::RemoveMissing => false,
        DeviceLossPolicy::ForceRemoveMissing => true,
    };

    let name = observed.volume_group.name.as_str();
    warn!(
        vg = %name,
        missing_pv = ?details.missing_pv,
        last_write_path = ?details.last_write_path,
        force,
        "device loss detected, removing missing physical volumes"
    );

    engine.metrics().record_operation("reduce_missing");
    engine
        .subsystem()
        .reduce_missing(name, force)
        .await
        .map_err(|e| Error::Aggregate(vec![error, e]))?;
    engine.metrics().record_recovery();

    let refreshed = engine
        .observe(vg, name)
        .await?
        .ok_or_else(|| Error::SubsystemNotFound {
            name: name.to_string(),
        })?;

    info!(vg = %name, "missing physical volumes removed, syncing again");
    engine.sync(vg, &refreshed).await
}
