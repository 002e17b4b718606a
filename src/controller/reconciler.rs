//! Reconciliation State Machine
//!
//! One pass per call of [`Reconciler::reconcile_once`]:
//!
//! ```text
//!   record on other node ─────────────► Unmanaged (no-op)
//!   deletion requested ───────────────► PendingDeletion: remove VG, drop finalizer
//!   no VG on host ────────────────────► Absent: create VG, attach finalizer
//!   VG on host ───────────────────────► Present: attach finalizer, or sync,
//!                                       project status and persist
//! ```

use crate::controller::metrics::{PassOutcome, ReconcileMetrics};
use crate::controller::recovery::sync_with_recovery;
use crate::controller::status::{
    creation_failed, project, synced_failed, synced_ok, synced_pending, CONDITION_SYNCED_ON_NODE,
};
use crate::controller::sync::SyncEngine;
use crate::controller::ControllerConfig;
use crate::crd::{VolumeGroup, VolumeGroupStatus};
use crate::domain::ports::{CreateOptions, ObservedState, ResourceKey, ResourceStoreRef};
use crate::error::{Error, Result};
use crate::quantity::quantity_to_host_bytes;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Lifecycle state of a record on this node
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    /// Owned by another node
    Unmanaged,
    PendingDeletion,
    /// No volume group on the host
    Absent,
    Present(Box<ObservedState>),
}

pub struct Reconciler {
    config: ControllerConfig,
    store: ResourceStoreRef,
    engine: SyncEngine,
    metrics: Arc<ReconcileMetrics>,
}

impl Reconciler {
    pub fn new(
        config: ControllerConfig,
        store: ResourceStoreRef,
        engine: SyncEngine,
        metrics: Arc<ReconcileMetrics>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            metrics,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one bounded reconciliation pass.
    ///
    /// Returns the delay until the next periodic pass, or `None` when the
    /// record needs no further polling.
    #[instrument(skip(self), fields(node = %self.config.node_name))]
    pub async fn reconcile_once(&self, key: &ResourceKey) -> Result<Option<Duration>> {
        let result = match tokio::time::timeout(self.config.pass_timeout, self.pass(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(resource = %key, timeout = ?self.config.pass_timeout, "pass abandoned");
                self.metrics.record_pass(PassOutcome::TimedOut);
                return Err(Error::Timeout(self.config.pass_timeout));
            }
        };

        match result {
            Ok((outcome, requeue)) => {
                self.metrics.record_pass(outcome);
                Ok(requeue)
            }
            Err(e) => {
                self.metrics.record_pass(PassOutcome::Failed);
                Err(e)
            }
        }
    }

    async fn pass(&self, key: &ResourceKey) -> Result<(PassOutcome, Option<Duration>)> {
        let Some(mut vg) = self.store.get(key).await? else {
            debug!(resource = %key, "resource no longer exists");
            return Ok((PassOutcome::Skipped, None));
        };

        let name = vg.name_on_node();
        let (observed, outcome) = match self.lifecycle(&vg, &name).await? {
            LifecycleState::Unmanaged => {
                debug!(
                    resource = %key,
                    expected = %vg.spec.node_name,
                    "skipping volume group owned by another node"
                );
                return Ok((PassOutcome::Skipped, None));
            }
            LifecycleState::PendingDeletion => {
                let outcome = self.finalize(vg, &name).await?;
                return Ok((outcome, None));
            }
            LifecycleState::Absent => (
                self.initialize(&mut vg, &name).await?,
                PassOutcome::Created,
            ),
            LifecycleState::Present(observed) => (*observed, PassOutcome::FinalizerAttached),
        };

        if vg.add_finalizer() {
            self.store.update(&vg).await?;
            info!(vg = %name, "finalizer attached, sync continues on next pass");
            return Ok((outcome, Some(self.config.sync_interval)));
        }

        let requeue = self.synchronize(vg, &name, observed).await?;
        Ok((PassOutcome::Synced, requeue))
    }

    /// Determine the lifecycle state, observing the host only for records
    /// this node owns and that are not being deleted
    async fn lifecycle(&self, vg: &VolumeGroup, name: &str) -> Result<LifecycleState> {
        if vg.spec.node_name != self.config.node_name {
            return Ok(LifecycleState::Unmanaged);
        }
        if vg.is_deleting() {
            return Ok(LifecycleState::PendingDeletion);
        }
        Ok(match self.engine.observe(vg, name).await? {
            Some(observed) => LifecycleState::Present(Box::new(observed)),
            None => LifecycleState::Absent,
        })
    }

    /// Remove the host volume group, then release the record.
    ///
    /// The target is resolved like any other observation, so a volume group
    /// renamed on the host is found through the UUID in status.
    async fn finalize(&self, mut vg: VolumeGroup, name: &str) -> Result<PassOutcome> {
        if !vg.has_finalizer() {
            debug!(vg = %name, "deletion requested without finalizer, nothing to clean up");
            return Ok(PassOutcome::Skipped);
        }

        match self.engine.observe(&vg, name).await? {
            Some(observed) => {
                let host_name = &observed.volume_group.name;
                info!(vg = %name, %host_name, "removing volume group from host");
                self.engine.subsystem().remove(host_name).await?;
                self.metrics.record_operation("remove");
            }
            None => debug!(vg = %name, "volume group already absent from host"),
        }

        vg.remove_finalizer();
        self.store.update(&vg).await?;
        info!(vg = %name, "finalizer removed");
        Ok(PassOutcome::Deleted)
    }

    /// Create the volume group. A failure is recorded on the status before
    /// it is returned.
    async fn initialize(&self, vg: &mut VolumeGroup, name: &str) -> Result<ObservedState> {
        info!(vg = %name, "creating volume group on host");

        let created = match self.create(vg, name).await {
            Ok(()) => self.engine.observe(vg, name).await,
            Err(e) => Err(e),
        };

        match created {
            Ok(Some(observed)) => Ok(observed),
            Ok(None) => Err(Error::SubsystemNotFound {
                name: name.to_string(),
            }),
            Err(e) => {
                warn!(vg = %name, error = %e, "volume group creation failed");
                let generation = vg.metadata.generation;
                let status = vg.status.get_or_insert_with(VolumeGroupStatus::default);
                status.set_condition(creation_failed(generation, &e));
                match self.store.update_status(vg).await {
                    Ok(_) => Err(e),
                    Err(persist) => Err(Error::Aggregate(vec![e, persist])),
                }
            }
        }
    }

    async fn create(&self, vg: &VolumeGroup, name: &str) -> Result<()> {
        let options = create_options(vg, name, self.engine.desired_devices(vg).await?)?;
        self.metrics.record_operation("create");
        self.engine.subsystem().create(&options).await
    }

    /// Sync attributes, project the status and persist it
    async fn synchronize(
        &self,
        mut vg: VolumeGroup,
        name: &str,
        observed: ObservedState,
    ) -> Result<Option<Duration>> {
        let generation = vg.metadata.generation;
        let mut status = vg.status.clone().unwrap_or_default();
        if status.condition(CONDITION_SYNCED_ON_NODE).is_none() {
            status.set_condition(synced_pending(generation));
        }

        let mut errors = Vec::new();
        if let Err(e) = sync_with_recovery(&self.engine, &vg, &observed).await {
            errors.push(e);
        }

        let projected = match self.engine.observe(&vg, name).await {
            Ok(Some(refreshed)) => project(&refreshed),
            Ok(None) => Err(Error::SubsystemNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(e),
        };
        match projected {
            Ok(mut projected) => {
                projected.conditions = std::mem::take(&mut status.conditions);
                status = projected;
            }
            Err(e) => errors.push(e),
        }

        let error = Error::join(errors);
        match &error {
            Some(e) => status.set_condition(synced_failed(generation, e)),
            None => status.set_condition(synced_ok(generation)),
        }

        vg.status = Some(status);
        self.store.update_status(&vg).await?;

        match error {
            Some(e) => Err(e),
            None => {
                debug!(vg = %name, "volume group in sync");
                Ok(Some(self.config.sync_interval))
            }
        }
    }
}

/// Translate the desired state into create parameters
pub fn create_options(
    vg: &VolumeGroup,
    name: &str,
    physical_volumes: Vec<String>,
) -> Result<CreateOptions> {
    let spec = &vg.spec;
    let host_size = |field: &str, q: &Option<Quantity>| {
        q.as_ref()
            .map(|q| quantity_to_host_bytes(field, q))
            .transpose()
    };

    Ok(CreateOptions {
        name: name.to_string(),
        physical_volumes,
        tags: vg.desired_tags().to_vec(),
        auto_activation: spec.auto_activation.into(),
        zero: spec.zero,
        allocation_policy: spec.allocation_policy,
        maximum_physical_volumes: spec.maximum_physical_volumes,
        maximum_logical_volumes: spec.maximum_logical_volumes,
        physical_extent_size: host_size("physicalExtentSize", &spec.physical_extent_size)?,
        metadata_size: host_size("metadataSize", &spec.metadata_size)?,
        data_alignment: host_size("dataAlignment", &spec.data_alignment)?,
        data_alignment_offset: host_size("dataAlignmentOffset", &spec.data_alignment_offset)?,
        devices: spec.devices.clone().unwrap_or_default(),
        devices_file: spec.devices_file.clone(),
    })
}
